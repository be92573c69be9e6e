use std::sync::Arc;
use std::time::Duration;

use regex::{Captures, Regex};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::browser::IdentityPolicy;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Fetches a discovered resource with the discovery identity, rewriting
/// playlist bodies so their references resolve without the playlist url.
#[derive(Debug, Clone)]
pub struct ResourceRelay {
    client: Client,
    identity: Arc<IdentityPolicy>,
    rewriter: PlaylistRewriter,
}

impl ResourceRelay {
    pub fn new(identity: Arc<IdentityPolicy>, timeout: Option<Duration>) -> RelayResult<Self> {
        let mut builder = Client::builder().user_agent(identity.user_agent());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            identity,
            rewriter: PlaylistRewriter::new(),
        })
    }

    pub async fn fetch(&self, url: &str) -> RelayResult<FetchedResource> {
        let parsed = Url::parse(url).map_err(|source| RelayError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let mut request = self.client.get(parsed.clone());
        if let Some(headers) = self.identity.headers_for(url) {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let mut bytes = response.bytes().await?.to_vec();
        info!(url, bytes = bytes.len(), content_type = ?content_type, "resource fetched");

        if is_playlist(url, content_type.as_deref()) {
            let text = String::from_utf8_lossy(&bytes);
            bytes = self.rewriter.rewrite(&text, &parsed).into_bytes();
            debug!(url, "playlist references rewritten");
        }
        Ok(FetchedResource {
            content_type,
            bytes,
        })
    }
}

pub fn is_playlist(url: &str, content_type: Option<&str>) -> bool {
    url.contains(".m3u8")
        || content_type
            .map(|value| value.to_ascii_lowercase().contains("mpegurl"))
            .unwrap_or(false)
}

/// Resolves relative segment and variant references against the playlist's
/// own location. Absolute references and plain tags are left untouched.
#[derive(Debug, Clone)]
pub struct PlaylistRewriter {
    uri_attribute: Regex,
}

impl Default for PlaylistRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaylistRewriter {
    pub fn new() -> Self {
        Self {
            uri_attribute: Regex::new(r#"URI="([^"]*)""#).expect("valid regex"),
        }
    }

    pub fn rewrite(&self, body: &str, playlist_url: &Url) -> String {
        let mut rewritten = body
            .lines()
            .map(|line| {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    line.to_string()
                } else if trimmed.starts_with('#') {
                    self.uri_attribute
                        .replace_all(line, |caps: &Captures<'_>| {
                            format!("URI=\"{}\"", absolutize(&caps[1], playlist_url))
                        })
                        .into_owned()
                } else {
                    absolutize(trimmed, playlist_url)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        if body.ends_with('\n') {
            rewritten.push('\n');
        }
        rewritten
    }
}

fn absolutize(reference: &str, base: &Url) -> String {
    if Url::parse(reference).is_ok() {
        return reference.to_string();
    }
    base.join(reference)
        .map(|joined| joined.to_string())
        .unwrap_or_else(|_| reference.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://video.twimg.com/ext_tw_video/1/pu/pl/master.m3u8?tag=12").unwrap()
    }

    #[test]
    fn relative_references_become_absolute() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=256000\n320x568/low.m3u8\n#EXTINF:3.0,\nseg0.ts\n/ext_tw_video/1/pu/vid/clip.mp4\n";
        let rewritten = PlaylistRewriter::new().rewrite(body, &base());
        assert_eq!(
            rewritten,
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=256000\nhttps://video.twimg.com/ext_tw_video/1/pu/pl/320x568/low.m3u8\n#EXTINF:3.0,\nhttps://video.twimg.com/ext_tw_video/1/pu/pl/seg0.ts\nhttps://video.twimg.com/ext_tw_video/1/pu/vid/clip.mp4\n"
        );
    }

    #[test]
    fn absolute_references_are_untouched() {
        let body = "#EXTM3U\nhttps://cdn.example.com/a.ts\n";
        assert_eq!(PlaylistRewriter::new().rewrite(body, &base()), body);
    }

    #[test]
    fn uri_attributes_in_tags_are_rewritten() {
        let body = "#EXT-X-MAP:URI=\"init.mp4\"\n#EXT-X-MEDIA:TYPE=AUDIO,URI=\"https://cdn.example.com/audio.m3u8\"";
        let rewritten = PlaylistRewriter::new().rewrite(body, &base());
        assert_eq!(
            rewritten,
            "#EXT-X-MAP:URI=\"https://video.twimg.com/ext_tw_video/1/pu/pl/init.mp4\"\n#EXT-X-MEDIA:TYPE=AUDIO,URI=\"https://cdn.example.com/audio.m3u8\""
        );
    }

    #[test]
    fn playlist_detection_uses_url_or_content_type() {
        assert!(is_playlist("https://host/a.m3u8?x=1", None));
        assert!(is_playlist("https://host/manifest", Some("Application/X-MpegURL")));
        assert!(!is_playlist("https://host/clip.mp4", Some("video/mp4")));
        assert!(!is_playlist("https://host/clip", None));
    }
}
