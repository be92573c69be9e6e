use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::classifier::ResourceKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserMetrics {
    pub contexts_opened: u64,
    pub contexts_disposed: u64,
    pub network_responses: u64,
    pub playlists_collected: u64,
    pub direct_media_collected: u64,
    pub interaction_failures: u64,
    pub load_failures: u64,
    pub timeouts: u64,
}

impl BrowserMetrics {
    pub fn record_context_open(&mut self) {
        self.contexts_opened = self.contexts_opened.saturating_add(1);
    }

    pub fn record_context_disposed(&mut self) {
        self.contexts_disposed = self.contexts_disposed.saturating_add(1);
    }

    pub fn record_network_response(&mut self) {
        self.network_responses = self.network_responses.saturating_add(1);
    }

    pub fn record_resource(&mut self, kind: ResourceKind) {
        match kind {
            ResourceKind::Playlist => {
                self.playlists_collected = self.playlists_collected.saturating_add(1)
            }
            ResourceKind::DirectMedia => {
                self.direct_media_collected = self.direct_media_collected.saturating_add(1)
            }
        }
    }

    pub fn record_interaction_failure(&mut self) {
        self.interaction_failures = self.interaction_failures.saturating_add(1);
    }

    pub fn record_load_failure(&mut self) {
        self.load_failures = self.load_failures.saturating_add(1);
    }

    pub fn record_timeout(&mut self) {
        self.timeouts = self.timeouts.saturating_add(1);
    }

    pub fn open_contexts(&self) -> u64 {
        self.contexts_opened.saturating_sub(self.contexts_disposed)
    }
}

/// Counters shared between the launcher, its contexts and the resolver.
#[derive(Debug, Clone, Default)]
pub struct SharedMetrics {
    inner: Arc<Mutex<BrowserMetrics>>,
}

impl SharedMetrics {
    pub fn snapshot(&self) -> BrowserMetrics {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut BrowserMetrics) -> R,
    {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = SharedMetrics::default();
        let handle = metrics.clone();
        handle.record(|m| {
            m.record_context_open();
            m.record_resource(ResourceKind::Playlist);
        });
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.contexts_opened, 1);
        assert_eq!(snapshot.playlists_collected, 1);
        assert_eq!(snapshot.open_contexts(), 1);
    }
}
