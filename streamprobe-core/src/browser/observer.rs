use tracing::debug;

use super::classifier::{MediaClassifier, ResourceKind};
use super::context::ObservedResponse;
use super::metrics::SharedMetrics;
use super::session::{DiscoverySession, ObservedResource};

/// Classifies completed responses and appends the keepers to a session.
#[derive(Debug, Clone)]
pub struct TrafficObserver {
    classifier: MediaClassifier,
    metrics: SharedMetrics,
}

impl TrafficObserver {
    pub fn new(classifier: MediaClassifier, metrics: SharedMetrics) -> Self {
        Self {
            classifier,
            metrics,
        }
    }

    pub fn record(
        &self,
        session: &DiscoverySession,
        response: ObservedResponse,
    ) -> Option<ResourceKind> {
        self.metrics.record(|metrics| metrics.record_network_response());
        let kind = self
            .classifier
            .classify(&response.url, &response.content_type)
            .resource()?;
        if !session.push(ObservedResource::new(kind, response.url.clone())) {
            debug!(url = %response.url, "response arrived after settle");
            return None;
        }
        debug!(
            request_id = %session.request().id,
            kind = %kind,
            url = %response.url,
            "media resource observed"
        );
        self.metrics.record(|metrics| metrics.record_resource(kind));
        Some(kind)
    }
}
