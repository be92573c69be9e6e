mod automation;
mod classifier;
mod context;
mod error;
mod identity;
mod interaction;
mod metrics;
mod observer;
mod resolver;
mod session;

pub use automation::{
    BrowserAutomation, BrowserContext, BrowserLauncher, ChromiumContextFactory, LaunchOverrides,
};
pub use classifier::{MediaClassifier, MediaKind, ResourceKind};
pub use context::{ContextFactory, DiscoveryContext, ObservedResponse, ResponseStream};
pub use error::{BrowserError, BrowserResult, DiscoveryError, DiscoveryErrorKind};
pub use identity::IdentityPolicy;
pub use interaction::{Interaction, PlaybackNudge};
pub use metrics::{BrowserMetrics, SharedMetrics};
pub use observer::TrafficObserver;
pub use resolver::{AnalysisResult, MediaResolver};
pub use session::{
    finalize, AnalysisRequest, DiscoverySession, ObservedResource, Outcome, SessionState,
};
