use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ProbeConfig {
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub identity: IdentitySection,
    pub timing: TimingSection,
    pub interaction: InteractionSection,
    pub classifier: ClassifierSection,
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timing.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timing.timeout_ms must be positive".into()));
        }
        if self.timing.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "timing.max_concurrent must be at least 1".into(),
            ));
        }
        if self.identity.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("identity.user_agent is empty".into()));
        }
        let viewport = &self.identity.viewport;
        if viewport.width == 0 || viewport.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "identity.viewport must be non-zero, got {}x{}",
                viewport.width, viewport.height
            )));
        }
        for rule in &self.identity.header_rules {
            if rule.url_patterns.is_empty() {
                return Err(ConfigError::Invalid(
                    "identity.header_rules entry without url_patterns".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: true,
            disable_gpu: true,
            request_timeout_seconds: Some(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsSection {
    pub mute_audio: bool,
    pub autoplay_policy: String,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for FlagsSection {
    fn default() -> Self {
        Self {
            mute_audio: true,
            autoplay_policy: "no-user-gesture-required".to_string(),
            lang: None,
            accept_language: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub user_agent: String,
    pub viewport: ViewportSection,
    pub header_rules: Vec<HeaderRuleSection>,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport: ViewportSection::default(),
            header_rules: vec![HeaderRuleSection::default()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportSection {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

impl Default for ViewportSection {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            device_scale_factor: 1.0,
        }
    }
}

/// Requests matching `url_patterns` (`*` wildcards, Chrome match-pattern
/// style) are sent with the configured Referer/Origin and the identity user
/// agent, whatever the page asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderRuleSection {
    pub url_patterns: Vec<String>,
    pub referer: Option<String>,
    pub origin: Option<String>,
}

impl Default for HeaderRuleSection {
    fn default() -> Self {
        Self {
            url_patterns: vec![
                "*://*.twimg.com/*".to_string(),
                "*://*.twitter.com/*".to_string(),
                "*://*.x.com/*".to_string(),
            ],
            referer: Some("https://twitter.com/".to_string()),
            origin: Some("https://twitter.com/".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub timeout_ms: u64,
    pub settle_after_interaction_ms: u64,
    pub settle_after_failure_ms: u64,
    pub max_concurrent: usize,
}

impl TimingSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle_after_interaction(&self) -> Duration {
        Duration::from_millis(self.settle_after_interaction_ms)
    }

    pub fn settle_after_failure(&self) -> Duration {
        Duration::from_millis(self.settle_after_failure_ms)
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            settle_after_interaction_ms: 8_000,
            settle_after_failure_ms: 5_000,
            max_concurrent: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionSection {
    pub initial_scroll_px: u32,
    pub initial_pause_ms: u64,
    pub follow_up_scroll_px: u32,
    pub follow_up_pause_ms: u64,
    pub play_selectors: Vec<String>,
}

impl Default for InteractionSection {
    fn default() -> Self {
        Self {
            initial_scroll_px: 100,
            initial_pause_ms: 500,
            follow_up_scroll_px: 500,
            follow_up_pause_ms: 1_000,
            play_selectors: vec![
                r#"[aria-label="Play video"]"#.to_string(),
                r#"[data-testid="playButton"]"#.to_string(),
                r#"div[role="button"][aria-label*="Play"]"#.to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub playlist_extensions: Vec<String>,
    pub playlist_content_types: Vec<String>,
    pub direct_content_types: Vec<String>,
    pub live_markers: Vec<String>,
    pub fragment_markers: Vec<String>,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            playlist_extensions: vec![".m3u8".to_string()],
            playlist_content_types: vec![
                "application/vnd.apple.mpegurl".to_string(),
                "application/x-mpegurl".to_string(),
                "audio/mpegurl".to_string(),
            ],
            direct_content_types: vec!["video/mp4".to_string()],
            live_markers: vec!["live_video".to_string()],
            fragment_markers: vec![".m4s".to_string()],
        }
    }
}

pub fn load_probe_config<P: AsRef<Path>>(path: P) -> Result<ProbeConfig> {
    let config: ProbeConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_carry_discovery_constants() {
        let config = ProbeConfig::default();
        assert_eq!(config.timing.timeout(), Duration::from_secs(20));
        assert_eq!(config.timing.settle_after_interaction(), Duration::from_secs(8));
        assert_eq!(config.timing.settle_after_failure(), Duration::from_secs(5));
        assert_eq!(config.identity.viewport.width, 1280);
        assert!(config.flags.mute_audio);
        assert_eq!(config.identity.header_rules.len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let file = write_config(
            r#"
[timing]
timeout_ms = 5000

[chromium]
headless = false
"#,
        );
        let config = load_probe_config(file.path()).expect("partial config should parse");
        assert_eq!(config.timing.timeout_ms, 5000);
        assert_eq!(config.timing.settle_after_interaction_ms, 8_000);
        assert!(!config.chromium.headless);
        assert!(config.chromium.sandbox);
        assert_eq!(config.classifier.live_markers, vec!["live_video"]);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let file = write_config("[timing]\ntimeout_ms = 0\n");
        let err = load_probe_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_probe_config("/nonexistent/streamprobe.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert!(path.ends_with("streamprobe.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let file = write_config("[timing\ntimeout_ms = 1");
        assert!(matches!(
            load_probe_config(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
