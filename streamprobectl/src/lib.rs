use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use streamprobe_core::browser::{
    AnalysisResult, BrowserError, BrowserLauncher, BrowserMetrics, DiscoveryError,
    DiscoveryErrorKind, IdentityPolicy, LaunchOverrides, MediaResolver, ObservedResource,
};
use streamprobe_core::relay::{RelayError, ResourceRelay};
use streamprobe_core::{load_probe_config, ConfigError, ProbeConfig};

mod logging;

pub use logging::init_logging;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("no media found for any of the {0} url(s)")]
    AllFailed(usize),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Discover streaming media behind web pages", long_about = None)]
pub struct Cli {
    /// Path to a streamprobe.toml; built-in defaults otherwise
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load pages in headless Chromium and list the media they request
    Analyze(AnalyzeArgs),
    /// Fetch one resource with the discovery identity
    Fetch(FetchArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Page urls to analyze
    #[arg(required = true, num_args = 1..)]
    pub urls: Vec<String>,
    /// Overall budget per url, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Show the browser window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
    /// Chromium executable
    #[arg(long)]
    pub chrome: Option<String>,
    /// Include browser counters in the output
    #[arg(long, default_value_t = false)]
    pub metrics: bool,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub url: String,
    /// Write the body here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Analyze(args) => {
            if let Some(timeout_ms) = args.timeout_ms {
                config.timing.timeout_ms = timeout_ms;
            }
            config.validate()?;
            let runtime = build_runtime()?;
            let report = runtime.block_on(analyze(config, args))?;
            render(&report, cli.format)?;
            if report.all_failed() {
                return Err(AppError::AllFailed(report.entries.len()));
            }
        }
        Commands::Fetch(args) => {
            let runtime = build_runtime()?;
            let report = runtime.block_on(fetch(&config, args))?;
            render(&report, cli.format)?;
        }
        Commands::Config => {
            render(&config, cli.format)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ProbeConfig> {
    match path {
        Some(path) => Ok(load_probe_config(path)?),
        None => Ok(ProbeConfig::default()),
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

async fn analyze(config: ProbeConfig, args: &AnalyzeArgs) -> Result<AnalyzeReport> {
    let launcher = BrowserLauncher::new(config)?;
    let overrides = LaunchOverrides {
        headless: args.headed.then_some(false),
        executable_path: args.chrome.clone(),
    };
    let automation = Arc::new(launcher.launch_with_overrides(overrides).await?);

    let resolver = MediaResolver::from_automation(Arc::clone(&automation));
    let results = resolver.analyze_many(args.urls.iter().cloned()).await;
    let metrics = args.metrics.then(|| resolver.metrics());
    drop(resolver);

    match Arc::try_unwrap(automation) {
        Ok(automation) => automation.shutdown().await?,
        Err(_) => warn!("browser still referenced after analysis; skipping graceful shutdown"),
    }

    Ok(AnalyzeReport {
        entries: results.into_iter().map(AnalyzeEntry::from).collect(),
        metrics,
    })
}

async fn fetch(config: &ProbeConfig, args: &FetchArgs) -> Result<FetchReport> {
    let identity = Arc::new(IdentityPolicy::from_config(&config.identity)?);
    let timeout = config
        .chromium
        .request_timeout_seconds
        .map(Duration::from_secs);
    let relay = ResourceRelay::new(identity, timeout)?;
    let fetched = relay.fetch(&args.url).await?;

    let (output, body) = match &args.output {
        Some(path) => {
            fs::write(path, &fetched.bytes)?;
            (Some(path.display().to_string()), None)
        }
        None => (None, Some(String::from_utf8_lossy(&fetched.bytes).into_owned())),
    };
    Ok(FetchReport {
        url: args.url.clone(),
        content_type: fetched.content_type,
        bytes: fetched.bytes.len(),
        output,
        body,
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct AnalyzeReport {
    pub entries: Vec<AnalyzeEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BrowserMetrics>,
}

impl AnalyzeReport {
    pub fn all_failed(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|entry| !entry.success)
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeEntry {
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<ObservedResource>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<DiscoveryErrorKind>,
}

impl From<(String, std::result::Result<AnalysisResult, DiscoveryError>)> for AnalyzeEntry {
    fn from((url, result): (String, std::result::Result<AnalysisResult, DiscoveryError>)) -> Self {
        match result {
            Ok(result) => Self {
                url,
                success: result.success,
                videos: result.videos,
                partial: result.partial,
                elapsed_ms: Some(result.elapsed_ms),
                error: None,
                error_kind: None,
            },
            Err(err) => Self {
                url,
                success: false,
                videos: Vec::new(),
                partial: false,
                elapsed_ms: None,
                error: Some(err.to_string()),
                error_kind: Some(err.kind()),
            },
        }
    }
}

impl DisplayFallback for AnalyzeReport {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in &self.entries {
            match &entry.error {
                Some(error) => lines.push(format!("{}: error: {error}", entry.url)),
                None => {
                    let elapsed = entry
                        .elapsed_ms
                        .map(|ms| format!("{ms} ms"))
                        .unwrap_or_else(|| "-".to_string());
                    let partial = if entry.partial { ", partial" } else { "" };
                    lines.push(format!("{} ({elapsed}{partial})", entry.url));
                    for video in &entry.videos {
                        lines.push(format!("  {:<12} {}", video.kind.to_string(), video.url));
                    }
                }
            }
        }
        if let Some(metrics) = &self.metrics {
            lines.push("Metrics:".to_string());
            lines.push(format!(
                "  contexts: {} opened, {} disposed",
                metrics.contexts_opened, metrics.contexts_disposed
            ));
            lines.push(format!("  responses observed: {}", metrics.network_responses));
            lines.push(format!(
                "  collected: {} playlist(s), {} direct",
                metrics.playlists_collected, metrics.direct_media_collected
            ));
            lines.push(format!(
                "  failures: {} load, {} interaction, {} timeout",
                metrics.load_failures, metrics.interaction_failures, metrics.timeouts
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl DisplayFallback for FetchReport {
    fn display(&self) -> String {
        if let Some(body) = &self.body {
            return body.clone();
        }
        format!(
            "{} bytes ({}) written to {}",
            self.bytes,
            self.content_type.as_deref().unwrap_or("unknown type"),
            self.output.as_deref().unwrap_or("-")
        )
    }
}

impl DisplayFallback for ProbeConfig {
    fn display(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|err| format!("<unrenderable config: {err}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use streamprobe_core::browser::{AnalysisRequest, ResourceKind};

    fn success(url: &str) -> AnalyzeEntry {
        AnalyzeEntry::from((
            url.to_string(),
            Ok(AnalysisResult {
                success: true,
                videos: vec![
                    ObservedResource::new(ResourceKind::Playlist, "https://host/master.m3u8"),
                    ObservedResource::new(ResourceKind::DirectMedia, "https://host/clip.mp4"),
                ],
                request_id: AnalysisRequest::new(url).unwrap().id,
                url: url.to_string(),
                elapsed_ms: 8_050,
                partial: false,
            }),
        ))
    }

    #[test]
    fn analyze_accepts_several_urls_and_overrides() {
        let cli = Cli::try_parse_from([
            "streamprobectl",
            "--format",
            "json",
            "analyze",
            "https://a/1",
            "https://a/2",
            "--timeout-ms",
            "5000",
            "--headed",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.urls, vec!["https://a/1", "https://a/2"]);
                assert_eq!(args.timeout_ms, Some(5000));
                assert!(args.headed);
                assert!(!args.metrics);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn analyze_requires_a_url() {
        assert!(Cli::try_parse_from(["streamprobectl", "analyze"]).is_err());
    }

    #[test]
    fn failures_carry_reason_and_kind() {
        let entry = AnalyzeEntry::from((
            "https://a/1".to_string(),
            Err(DiscoveryError::NoMediaDetected),
        ));
        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("no media resources detected"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["error_kind"], "no_media_detected");
        assert!(json.get("videos").is_none());
    }

    #[test]
    fn report_fails_only_when_every_url_failed() {
        let failed = || {
            AnalyzeEntry::from(("https://a/x".to_string(), Err(DiscoveryError::TimedOut)))
        };
        let report = AnalyzeReport {
            entries: vec![failed(), success("https://a/ok")],
            metrics: None,
        };
        assert!(!report.all_failed());
        let report = AnalyzeReport {
            entries: vec![failed(), failed()],
            metrics: None,
        };
        assert!(report.all_failed());
    }

    #[test]
    fn text_output_lists_playlists_first() {
        let report = AnalyzeReport {
            entries: vec![success("https://a/ok")],
            metrics: Some(BrowserMetrics::default()),
        };
        let text = report.display();
        let playlist = text.find("PLAYLIST").unwrap();
        let direct = text.find("DIRECT_MEDIA").unwrap();
        assert!(playlist < direct);
        assert!(text.starts_with("https://a/ok (8050 ms)"));
        assert!(text.contains("Metrics:"));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timing]\ntimeout_ms = 3000").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.timing.timeout_ms, 3000);
        assert_eq!(
            config.timing.settle_after_interaction_ms,
            ProbeConfig::default().timing.settle_after_interaction_ms
        );
        assert!(config.display().contains("timeout_ms = 3000"));
    }
}
