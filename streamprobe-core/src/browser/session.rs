use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::classifier::ResourceKind;
use super::context::DiscoveryContext;
use super::error::{BrowserResult, DiscoveryError};

/// One discovery request. Lives only as long as the operation.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn new(url: impl Into<String>) -> Result<Self, DiscoveryError> {
        let url = url.into().trim().to_string();
        if url.is_empty() {
            return Err(DiscoveryError::InvalidRequest("url must not be empty".into()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            url,
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservedResource {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub url: String,
}

impl ObservedResource {
    pub fn new(kind: ResourceKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Empty,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "outcome")]
pub enum SessionState {
    Init,
    Navigating,
    Loaded,
    Interacting,
    Settling,
    Done(Outcome),
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Init => f.write_str("init"),
            SessionState::Navigating => f.write_str("navigating"),
            SessionState::Loaded => f.write_str("loaded"),
            SessionState::Interacting => f.write_str("interacting"),
            SessionState::Settling => f.write_str("settling"),
            SessionState::Done(outcome) => write!(f, "done({outcome:?})"),
        }
    }
}

/// Mutable aggregate for one request: accumulated resources, the settle-once
/// flag and the owned browsing context.
pub struct DiscoverySession {
    request: AnalysisRequest,
    resources: Mutex<Vec<ObservedResource>>,
    settled: AtomicBool,
    disposed: AtomicBool,
    state: Mutex<SessionState>,
    context: tokio::sync::Mutex<Box<dyn DiscoveryContext>>,
}

impl fmt::Debug for DiscoverySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoverySession")
            .field("request", &self.request)
            .field("settled", &self.is_settled())
            .field("state", &self.state())
            .finish()
    }
}

impl DiscoverySession {
    pub fn new(request: AnalysisRequest, context: Box<dyn DiscoveryContext>) -> Self {
        Self {
            request,
            resources: Mutex::new(Vec::new()),
            settled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            state: Mutex::new(SessionState::Init),
            context: tokio::sync::Mutex::new(context),
        }
    }

    pub fn request(&self) -> &AnalysisRequest {
        &self.request
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `next` unless the session already reached `Done`.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            return false;
        }
        debug!(request_id = %self.request.id, from = %*state, to = %next, "session transition");
        *state = next;
        true
    }

    /// Appends unless the session has settled. Returns whether it was kept.
    pub fn push(&self, resource: ObservedResource) -> bool {
        if self.is_settled() {
            return false;
        }
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource);
        true
    }

    pub fn len(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Atomic check-and-set; only the first caller gets `true`.
    pub fn try_settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Deduplicated, ranked view of what has been collected so far.
    pub fn finalize(&self) -> Vec<ObservedResource> {
        let resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        finalize(&resources)
    }

    /// Exclusive access to the owned context for the driving task.
    pub async fn context(&self) -> tokio::sync::MutexGuard<'_, Box<dyn DiscoveryContext>> {
        self.context.lock().await
    }

    /// Releases the context once; later calls are no-ops even when the
    /// first one failed.
    pub async fn dispose_context(&self) -> BrowserResult<()> {
        let mut context = self.context.lock().await;
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        context.dispose().await
    }
}

impl Drop for DiscoverySession {
    fn drop(&mut self) {
        let disposed = *self.disposed.get_mut() || self.context.get_mut().is_disposed();
        if !disposed {
            warn!(request_id = %self.request.id, "DiscoverySession dropped with a live context");
        }
    }
}

/// Playlists first, then direct media; first occurrence of a url wins, so a
/// url seen as both kinds is reported once, as a playlist.
pub fn finalize(resources: &[ObservedResource]) -> Vec<ObservedResource> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::with_capacity(resources.len());
    for kind in [ResourceKind::Playlist, ResourceKind::DirectMedia] {
        for resource in resources.iter().filter(|resource| resource.kind == kind) {
            if seen.insert(resource.url.as_str()) {
                ordered.push(resource.clone());
            }
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(url: &str) -> ObservedResource {
        ObservedResource::new(ResourceKind::Playlist, url)
    }

    fn direct(url: &str) -> ObservedResource {
        ObservedResource::new(ResourceKind::DirectMedia, url)
    }

    #[test]
    fn finalize_ranks_playlists_first_and_dedupes() {
        let observed = vec![
            direct("https://host/a.mp4"),
            playlist("https://host/master.m3u8"),
            direct("https://host/b.mp4"),
            direct("https://host/a.mp4"),
            playlist("https://host/audio.m3u8"),
            playlist("https://host/master.m3u8"),
        ];
        let urls: Vec<_> = finalize(&observed)
            .into_iter()
            .map(|resource| resource.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://host/master.m3u8",
                "https://host/audio.m3u8",
                "https://host/a.mp4",
                "https://host/b.mp4",
            ]
        );
    }

    #[test]
    fn finalize_prefers_playlist_on_kind_conflict() {
        let observed = vec![direct("https://host/x"), playlist("https://host/x")];
        assert_eq!(finalize(&observed), vec![playlist("https://host/x")]);
    }

    #[test]
    fn finalize_never_emits_duplicates() {
        let mut observed = Vec::new();
        for round in 0..20 {
            let url = format!("https://host/{}.mp4", round % 7);
            if round % 3 == 0 {
                observed.push(playlist(&url));
            } else {
                observed.push(direct(&url));
            }
        }
        let finalized = finalize(&observed);
        let unique: HashSet<_> = finalized.iter().map(|resource| &resource.url).collect();
        assert_eq!(unique.len(), finalized.len());
        let first_direct = finalized
            .iter()
            .position(|resource| resource.kind == ResourceKind::DirectMedia)
            .unwrap_or(finalized.len());
        assert!(finalized[first_direct..]
            .iter()
            .all(|resource| resource.kind == ResourceKind::DirectMedia));
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(matches!(
            AnalysisRequest::new("   "),
            Err(DiscoveryError::InvalidRequest(_))
        ));
        let request = AnalysisRequest::new(" https://host/page ").unwrap();
        assert_eq!(request.url, "https://host/page");
    }

    #[test]
    fn resource_serializes_with_type_field() {
        let value = serde_json::to_value(playlist("https://host/master.m3u8")).unwrap();
        assert_eq!(value["type"], "PLAYLIST");
        assert_eq!(value["url"], "https://host/master.m3u8");
    }
}
