pub mod browser;
pub mod config;
pub mod error;
pub mod relay;

pub use browser::{
    AnalysisResult, BrowserAutomation, BrowserError, BrowserLauncher, BrowserMetrics,
    DiscoveryError, DiscoveryErrorKind, LaunchOverrides, MediaResolver, ObservedResource,
    ResourceKind,
};
pub use config::{load_probe_config, ProbeConfig};
pub use error::{ConfigError, Result};
pub use relay::{FetchedResource, PlaylistRewriter, RelayError, ResourceRelay};
