use std::sync::Arc;
use std::time::Duration;

use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ProbeConfig, TimingSection};

use super::automation::{BrowserAutomation, ChromiumContextFactory};
use super::classifier::MediaClassifier;
use super::context::{ContextFactory, ResponseStream};
use super::error::{BrowserError, DiscoveryError};
use super::interaction::{Interaction, PlaybackNudge};
use super::metrics::{BrowserMetrics, SharedMetrics};
use super::observer::TrafficObserver;
use super::session::{AnalysisRequest, DiscoverySession, ObservedResource, Outcome, SessionState};

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub videos: Vec<ObservedResource>,
    pub request_id: Uuid,
    pub url: String,
    pub elapsed_ms: u64,
    /// Set when the timeout cut discovery short but something was found.
    pub partial: bool,
}

const DISPOSE_GRACE: Duration = Duration::from_secs(5);

/// What ended a session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    Settled,
    LoadFailed(String),
    TimedOut,
}

/// Drives one isolated context per request until it settles exactly once.
pub struct MediaResolver {
    factory: Arc<dyn ContextFactory>,
    interaction: Arc<dyn Interaction>,
    observer: TrafficObserver,
    timing: TimingSection,
    metrics: SharedMetrics,
}

impl MediaResolver {
    pub fn new(factory: Arc<dyn ContextFactory>, config: &ProbeConfig, metrics: SharedMetrics) -> Self {
        Self {
            factory,
            interaction: Arc::new(PlaybackNudge::new(config.interaction.clone())),
            observer: TrafficObserver::new(
                MediaClassifier::new(config.classifier.clone()),
                metrics.clone(),
            ),
            timing: config.timing.clone(),
            metrics,
        }
    }

    pub fn from_automation(automation: Arc<BrowserAutomation>) -> Self {
        let config = automation.config().clone();
        let metrics = automation.metrics_handle();
        Self::new(Arc::new(ChromiumContextFactory::new(automation)), &config, metrics)
    }

    pub fn with_interaction(mut self, interaction: Arc<dyn Interaction>) -> Self {
        self.interaction = interaction;
        self
    }

    pub fn metrics(&self) -> BrowserMetrics {
        self.metrics.snapshot()
    }

    pub async fn analyze(&self, url: &str) -> Result<AnalysisResult, DiscoveryError> {
        let request = AnalysisRequest::new(url)?;
        let started = Instant::now();
        let deadline = started + self.timing.timeout();
        info!(request_id = %request.id, url = %request.url, "analysis started");

        let context = match timeout_at(deadline, self.factory.open()).await {
            Ok(opened) => opened?,
            Err(_) => {
                warn!(request_id = %request.id, "context did not open before the deadline");
                self.metrics.record(|metrics| metrics.record_timeout());
                return Err(DiscoveryError::TimedOut);
            }
        };
        let session = DiscoverySession::new(request, context);
        let observed = timeout_at(deadline, async { session.context().await.observe().await }).await;
        let responses = match observed {
            Ok(Ok(responses)) => responses,
            Ok(Err(err)) => {
                session.transition(SessionState::Done(Outcome::Error));
                self.dispose(&session).await;
                return Err(err.into());
            }
            Err(_) => {
                self.metrics.record(|metrics| metrics.record_timeout());
                session.transition(SessionState::Done(Outcome::Empty));
                self.dispose(&session).await;
                return Err(DiscoveryError::TimedOut);
            }
        };

        let trigger = self.run_until_triggered(&session, responses, deadline).await;
        let outcome = self.settle(&session, trigger);
        self.dispose(&session).await;

        let request = session.request();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok((videos, partial)) => info!(
                request_id = %request.id,
                videos = videos.len(),
                partial,
                elapsed_ms,
                "analysis finished"
            ),
            Err(err) => warn!(request_id = %request.id, error = %err, elapsed_ms, "analysis failed"),
        }
        let (videos, partial) = outcome?;
        Ok(AnalysisResult {
            success: true,
            videos,
            request_id: request.id,
            url: request.url.clone(),
            elapsed_ms,
            partial,
        })
    }

    /// Analyzes every url, at most `max_concurrent` at a time; results keep
    /// input order.
    pub async fn analyze_many<I, S>(
        &self,
        urls: I,
    ) -> Vec<(String, Result<AnalysisResult, DiscoveryError>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let limit = self.timing.max_concurrent.max(1);
        stream::iter(urls.into_iter().map(Into::into))
            .map(|url: String| async move {
                let result = self.analyze(&url).await;
                (url, result)
            })
            .buffered(limit)
            .collect()
            .await
    }

    /// Races the drive sequence against the global deadline while feeding
    /// observed responses into the session.
    async fn run_until_triggered(
        &self,
        session: &DiscoverySession,
        responses: ResponseStream,
        deadline: Instant,
    ) -> Trigger {
        let mut responses = responses;
        let deadline = sleep_until(deadline);
        tokio::pin!(deadline);
        let drive = self.drive(session);
        tokio::pin!(drive);

        let trigger = loop {
            tokio::select! {
                biased;
                () = &mut deadline => break Trigger::TimedOut,
                trigger = &mut drive => break trigger,
                Some(response) = responses.next() => {
                    self.observer.record(session, response);
                }
            }
        };

        while let Some(Some(response)) = responses.next().now_or_never() {
            self.observer.record(session, response);
        }
        trigger
    }

    async fn drive(&self, session: &DiscoverySession) -> Trigger {
        let mut context = session.context().await;
        session.transition(SessionState::Navigating);
        if let Err(err) = context.navigate(&session.request().url).await {
            let reason = match err {
                BrowserError::Navigation(message) => message,
                other => other.to_string(),
            };
            return Trigger::LoadFailed(reason);
        }
        session.transition(SessionState::Loaded);

        session.transition(SessionState::Interacting);
        let settle = match self.interaction.run(&mut **context).await {
            Ok(()) => self.timing.settle_after_interaction(),
            Err(err) => {
                warn!(
                    request_id = %session.request().id,
                    error = %err,
                    "interaction failed; settling early"
                );
                self.metrics
                    .record(|metrics| metrics.record_interaction_failure());
                self.timing.settle_after_failure()
            }
        };
        drop(context);

        session.transition(SessionState::Settling);
        debug!(request_id = %session.request().id, settle_ms = settle.as_millis() as u64, "settling");
        sleep(settle).await;
        Trigger::Settled
    }

    fn settle(
        &self,
        session: &DiscoverySession,
        trigger: Trigger,
    ) -> Result<(Vec<ObservedResource>, bool), DiscoveryError> {
        if !session.try_settle() {
            return Err(BrowserError::Unexpected("session settled twice".into()).into());
        }
        let videos = session.finalize();
        let (outcome, result) = match trigger {
            Trigger::LoadFailed(reason) => {
                self.metrics.record(|metrics| metrics.record_load_failure());
                (Outcome::Error, Err(DiscoveryError::LoadFailure(reason)))
            }
            Trigger::Settled if videos.is_empty() => {
                (Outcome::Empty, Err(DiscoveryError::NoMediaDetected))
            }
            Trigger::Settled => (Outcome::Success, Ok((videos, false))),
            Trigger::TimedOut => {
                self.metrics.record(|metrics| metrics.record_timeout());
                if videos.is_empty() {
                    (Outcome::Empty, Err(DiscoveryError::TimedOut))
                } else {
                    (Outcome::Success, Ok((videos, true)))
                }
            }
        };
        session.transition(SessionState::Done(outcome));
        result
    }

    /// The outcome is already decided here; cleanup gets its own bound.
    async fn dispose(&self, session: &DiscoverySession) {
        match timeout(DISPOSE_GRACE, session.dispose_context()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(request_id = %session.request().id, error = %err, "context dispose failed")
            }
            Err(_) => warn!(request_id = %session.request().id, "context dispose timed out"),
        }
    }
}
