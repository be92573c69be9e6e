use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, HeaderEntry, RequestPattern,
    RequestStage,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::IdentitySection;

use super::error::{BrowserError, BrowserResult};

const OVERRIDDEN: [&str; 3] = ["user-agent", "referer", "origin"];

#[derive(Debug, Clone)]
struct HeaderRule {
    patterns: Vec<String>,
    matchers: Vec<Regex>,
    referer: Option<String>,
    origin: Option<String>,
}

/// Browsing identity asserted by every context: a fixed user agent plus
/// provenance headers for the media-hosting domains.
#[derive(Debug, Clone)]
pub struct IdentityPolicy {
    user_agent: String,
    rules: Vec<HeaderRule>,
}

impl IdentityPolicy {
    pub fn from_config(config: &IdentitySection) -> BrowserResult<Self> {
        let mut rules = Vec::with_capacity(config.header_rules.len());
        for rule in &config.header_rules {
            let matchers = rule
                .url_patterns
                .iter()
                .map(|pattern| pattern_to_regex(pattern))
                .collect::<BrowserResult<Vec<_>>>()?;
            rules.push(HeaderRule {
                patterns: rule.url_patterns.clone(),
                matchers,
                referer: rule.referer.clone(),
                origin: rule.origin.clone(),
            });
        }
        Ok(Self {
            user_agent: config.user_agent.clone(),
            rules,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Headers to force onto a request for `url`, or `None` when no rule
    /// covers it.
    pub fn headers_for(&self, url: &str) -> Option<Vec<(String, String)>> {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.matchers.iter().any(|matcher| matcher.is_match(url)))?;
        let mut headers = vec![("User-Agent".to_string(), self.user_agent.clone())];
        if let Some(referer) = &rule.referer {
            headers.push(("Referer".to_string(), referer.clone()));
        }
        if let Some(origin) = &rule.origin {
            headers.push(("Origin".to_string(), origin.clone()));
        }
        Some(headers)
    }

    /// Replaces identity headers in `original`, keeping everything else.
    pub fn merge_headers(
        &self,
        url: &str,
        original: &serde_json::Value,
    ) -> Option<Vec<(String, String)>> {
        let forced = self.headers_for(url)?;
        let mut merged = Vec::new();
        if let Some(map) = original.as_object() {
            for (name, value) in map {
                if OVERRIDDEN.contains(&name.to_ascii_lowercase().as_str()) {
                    continue;
                }
                let value = match value {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                merged.push((name.clone(), value));
            }
        }
        merged.extend(forced);
        Some(merged)
    }

    /// Pauses matching requests through the CDP Fetch domain and resumes
    /// them with the policy headers. Returns `None` when there is nothing to
    /// override.
    pub async fn install(self: &Arc<Self>, page: &Page) -> BrowserResult<Option<JoinHandle<()>>> {
        if !self.has_rules() {
            return Ok(None);
        }

        let patterns = self
            .rules
            .iter()
            .flat_map(|rule| rule.patterns.iter())
            .map(|pattern| {
                RequestPattern::builder()
                    .url_pattern(pattern.clone())
                    .request_stage(RequestStage::Request)
                    .build()
            })
            .collect::<Vec<_>>();

        let mut paused = page.event_listener::<EventRequestPaused>().await?;
        page.execute(EnableParams::builder().patterns(patterns).build())
            .await?;

        let policy = Arc::clone(self);
        let page = page.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let mut builder = ContinueRequestParams::builder().request_id(event.request_id.clone());
                if let Some(headers) =
                    policy.merge_headers(&event.request.url, event.request.headers.inner())
                {
                    debug!(url = %event.request.url, "overriding identity headers");
                    builder = builder.headers(
                        headers
                            .into_iter()
                            .map(|(name, value)| HeaderEntry::new(name, value)),
                    );
                }
                let params = match builder.build() {
                    Ok(params) => params,
                    Err(err) => {
                        warn!(error = %err, "failed to build continue request");
                        continue;
                    }
                };
                if let Err(err) = page.execute(params).await {
                    debug!(error = %err, url = %event.request.url, "continue request failed");
                }
            }
        });
        Ok(Some(task))
    }
}

/// `*://*.example.com/*` style pattern to an anchored regex, with the same
/// wildcards `Fetch.enable` uses: `*` is any run, `?` is one character and
/// a backslash makes the next character literal.
fn pattern_to_regex(pattern: &str) -> BrowserResult<Regex> {
    let mut body = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => body.push_str(".*"),
            '?' => body.push('.'),
            '\\' => {
                let literal = chars.next().unwrap_or('\\');
                body.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4])));
            }
            other => body.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    Regex::new(&format!("^{body}$")).map_err(|err| {
        BrowserError::Configuration(format!("invalid url pattern {pattern}: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeaderRuleSection, IdentitySection};
    use serde_json::json;

    fn policy() -> IdentityPolicy {
        IdentityPolicy::from_config(&IdentitySection::default()).unwrap()
    }

    #[test]
    fn media_hosts_get_provenance_headers() {
        let headers = policy()
            .headers_for("https://video.twimg.com/ext_tw_video/1/pu/pl/master.m3u8")
            .expect("twimg is a media host");
        assert!(headers.contains(&("Referer".to_string(), "https://twitter.com/".to_string())));
        assert!(headers.contains(&("Origin".to_string(), "https://twitter.com/".to_string())));
        assert!(headers.iter().any(|(name, _)| name == "User-Agent"));
    }

    #[test]
    fn unrelated_hosts_are_left_alone() {
        let policy = policy();
        assert!(policy.headers_for("https://example.com/clip.mp4").is_none());
        assert!(policy.headers_for("https://nottwimg.com/a").is_none());
    }

    #[test]
    fn merge_replaces_identity_headers_case_insensitively() {
        let original = json!({
            "referer": "https://evil.example/",
            "Accept": "*/*",
            "user-agent": "HeadlessChrome",
        });
        let merged = policy()
            .merge_headers("https://pbs.twimg.com/media/a.jpg", &original)
            .unwrap();
        assert!(merged.contains(&("Accept".to_string(), "*/*".to_string())));
        assert!(!merged.iter().any(|(_, value)| value == "https://evil.example/"));
        assert!(!merged.iter().any(|(_, value)| value == "HeadlessChrome"));
        assert_eq!(
            merged.iter().filter(|(name, _)| name.eq_ignore_ascii_case("referer")).count(),
            1
        );
    }

    fn policy_for(pattern: &str) -> IdentityPolicy {
        let config = IdentitySection {
            header_rules: vec![HeaderRuleSection {
                url_patterns: vec![pattern.into()],
                referer: Some("https://example.com/".into()),
                origin: None,
            }],
            ..IdentitySection::default()
        };
        IdentityPolicy::from_config(&config).unwrap()
    }

    #[test]
    fn question_mark_matches_exactly_one_character() {
        let policy = policy_for("https://cdn.example.com/v?/*");
        assert!(policy.headers_for("https://cdn.example.com/va/a.mp4").is_some());
        assert!(policy.headers_for("https://cdn.example.com/v?/a.mp4").is_some());
        assert!(policy.headers_for("https://cdn.example.com/v/a.mp4").is_none());
        assert!(policy.headers_for("https://cdn.example.com/vab/a.mp4").is_none());
        let headers = policy.headers_for("https://cdn.example.com/va/a.mp4").unwrap();
        assert!(!headers.iter().any(|(name, _)| name == "Origin"));
    }

    #[test]
    fn escaped_wildcards_and_regex_metacharacters_are_literal() {
        let policy = policy_for(r"https://cdn.example.com/v\?/a+b.mp4\*");
        assert!(policy.headers_for("https://cdn.example.com/v?/a+b.mp4*").is_some());
        assert!(policy.headers_for("https://cdn.example.com/va/a+b.mp4*").is_none());
        assert!(policy.headers_for("https://cdn.example.com/v?/aab.mp4*").is_none());
        assert!(policy.headers_for("https://cdn.example.com/v?/a+b.mp4x").is_none());
    }
}
