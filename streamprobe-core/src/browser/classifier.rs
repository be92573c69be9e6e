use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Playlist,
    DirectMedia,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::Playlist => "PLAYLIST",
            ResourceKind::DirectMedia => "DIRECT_MEDIA",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Playlist,
    DirectMedia,
    Ignore,
}

impl MediaKind {
    pub fn resource(self) -> Option<ResourceKind> {
        match self {
            MediaKind::Playlist => Some(ResourceKind::Playlist),
            MediaKind::DirectMedia => Some(ResourceKind::DirectMedia),
            MediaKind::Ignore => None,
        }
    }
}

/// Separates manifests and single-file containers from the rest of a page's
/// traffic. Live playlists and adaptive fragments are rejected.
#[derive(Debug, Clone)]
pub struct MediaClassifier {
    config: ClassifierSection,
}

impl Default for MediaClassifier {
    fn default() -> Self {
        Self::new(ClassifierSection::default())
    }
}

impl MediaClassifier {
    pub fn new(mut config: ClassifierSection) -> Self {
        for list in [
            &mut config.playlist_extensions,
            &mut config.playlist_content_types,
            &mut config.direct_content_types,
        ] {
            for entry in list.iter_mut() {
                *entry = entry.to_ascii_lowercase();
            }
        }
        Self { config }
    }

    pub fn classify(&self, url: &str, content_type: &str) -> MediaKind {
        let mime = essence(content_type);
        let is_live = self
            .config
            .live_markers
            .iter()
            .any(|marker| url.contains(marker.as_str()));

        if (self.has_playlist_extension(url) || self.matches(&self.config.playlist_content_types, &mime))
            && !is_live
        {
            return MediaKind::Playlist;
        }

        let is_fragment = self
            .config
            .fragment_markers
            .iter()
            .any(|marker| url.contains(marker.as_str()));
        if self.matches(&self.config.direct_content_types, &mime) && !is_fragment {
            return MediaKind::DirectMedia;
        }

        MediaKind::Ignore
    }

    fn has_playlist_extension(&self, url: &str) -> bool {
        let path = url_path(url).to_ascii_lowercase();
        self.config
            .playlist_extensions
            .iter()
            .any(|extension| path.ends_with(extension.as_str()))
    }

    fn matches(&self, candidates: &[String], mime: &str) -> bool {
        !mime.is_empty() && candidates.iter().any(|candidate| candidate == mime)
    }
}

/// `text/html; charset=utf-8` -> `text/html`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn url_path(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}
