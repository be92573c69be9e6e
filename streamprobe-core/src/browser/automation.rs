use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetFocusEmulationEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventResponseReceived, Response,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;

use super::context::{ContextFactory, DiscoveryContext, ObservedResponse, ResponseStream};
use super::error::{BrowserError, BrowserResult};
use super::identity::IdentityPolicy;
use super::metrics::{BrowserMetrics, SharedMetrics};

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
    pub executable_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<ProbeConfig>,
    identity: Arc<IdentityPolicy>,
}

impl BrowserLauncher {
    pub fn new(config: ProbeConfig) -> BrowserResult<Self> {
        config
            .validate()
            .map_err(|err| BrowserError::Configuration(err.to_string()))?;
        let identity = Arc::new(IdentityPolicy::from_config(&config.identity)?);
        Ok(Self {
            config: Arc::new(config),
            identity,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn identity(&self) -> Arc<IdentityPolicy> {
        Arc::clone(&self.identity)
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        self.launch_with_overrides(LaunchOverrides::default()).await
    }

    pub async fn launch_with_overrides(
        &self,
        overrides: LaunchOverrides,
    ) -> BrowserResult<BrowserAutomation> {
        let profile = tempfile::Builder::new()
            .prefix("streamprobe-profile-")
            .tempdir()?;
        let headless = overrides.headless.unwrap_or(self.config.chromium.headless);
        let executable = overrides
            .executable_path
            .or_else(|| self.config.chromium.executable_path.clone());
        let chromium_config =
            self.build_chromium_config(&profile, executable.as_deref(), headless)?;
        info!(
            profile = %profile.path().display(),
            ua = %self.identity.user_agent(),
            width = self.config.identity.viewport.width,
            height = self.config.identity.viewport.height,
            headless,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            profile: Some(profile),
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
            identity: Arc::clone(&self.identity),
            metrics: SharedMetrics::default(),
        })
    }

    fn build_chromium_config(
        &self,
        profile: &TempDir,
        executable: Option<&str>,
        headless: bool,
    ) -> BrowserResult<ChromiumConfig> {
        let viewport = &self.config.identity.viewport;
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile.path())
            .viewport(ChromiumViewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: Some(viewport.device_scale_factor),
                emulating_mobile: false,
                is_landscape: viewport.width >= viewport.height,
                has_touch: false,
            });

        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            format!("--user-agent={}", self.identity.user_agent()),
            format!("--window-size={},{}", viewport.width, viewport.height),
        ];

        if self.config.chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if self.config.flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if !self.config.flags.autoplay_policy.is_empty() {
            args.push(format!(
                "--autoplay-policy={}",
                self.config.flags.autoplay_policy
            ));
        }
        if let Some(lang) = &self.config.flags.lang {
            args.push(format!("--lang={lang}"));
        }
        if let Some(accept) = &self.config.flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.push("--no-first-run".into());
        args.push("--disable-background-timer-throttling".into());
        args.push("--disable-backgrounding-occluded-windows".into());
        args.push("--disable-renderer-backgrounding".into());
        args.push("--password-store=basic".into());
        args.extend(self.config.flags.extra_args.iter().cloned());

        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

/// A running Chromium process. Discovery contexts are carved out of it.
#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    profile: Option<TempDir>,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<ProbeConfig>,
    identity: Arc<IdentityPolicy>,
    metrics: SharedMetrics,
}

impl BrowserAutomation {
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn metrics(&self) -> BrowserMetrics {
        self.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Opens a fresh CDP browser context holding a single configured page.
    pub async fn new_context(self: &Arc<Self>) -> BrowserResult<BrowserContext> {
        let created = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?;
        let context_id = created.result.browser_context_id.clone();

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = match self.browser.new_page(params).await {
            Ok(page) => page,
            Err(err) => {
                self.dispose_browser_context(context_id).await;
                return Err(err.into());
            }
        };

        let mut context = BrowserContext {
            id: context_id.inner().clone(),
            page: Some(page),
            browser_context_id: Some(context_id),
            automation: Arc::clone(self),
            interceptor: None,
        };
        self.metrics.record(|metrics| metrics.record_context_open());

        if let Err(err) = context.configure().await {
            if let Err(dispose_err) = context.dispose().await {
                warn!(error = %dispose_err, "failed to dispose half-configured context");
            }
            return Err(err);
        }
        Ok(context)
    }

    async fn dispose_browser_context(&self, id: BrowserContextId) {
        if let Err(err) = self
            .browser
            .execute(DisposeBrowserContextParams::new(id))
            .await
        {
            warn!(error = %err, "failed to dispose browser context");
        }
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        if let Some(profile) = self.profile.take() {
            if let Err(err) = profile.close() {
                debug!(error = %err, "failed to remove temporary profile");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

/// Page plus its private CDP browser context. Owned by exactly one
/// discovery session.
#[derive(Debug)]
pub struct BrowserContext {
    id: String,
    page: Option<Page>,
    browser_context_id: Option<BrowserContextId>,
    automation: Arc<BrowserAutomation>,
    interceptor: Option<JoinHandle<()>>,
}

impl BrowserContext {
    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    fn live_page(&self) -> BrowserResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected(format!("context {} already disposed", self.id)))
    }

    async fn configure(&mut self) -> BrowserResult<()> {
        let config = Arc::clone(&self.automation.config);
        let identity = Arc::clone(&self.automation.identity);
        let page = self.live_page()?;

        let mut ua_builder =
            SetUserAgentOverrideParams::builder().user_agent(identity.user_agent().to_string());
        if let Some(accept) = &config.flags.accept_language {
            ua_builder = ua_builder.accept_language(accept.clone());
        }
        page.set_user_agent(ua_builder.build().map_err(BrowserError::Configuration)?)
            .await?;

        let viewport = &config.identity.viewport;
        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(viewport.width as i64)
                .height(viewport.height as i64)
                .device_scale_factor(viewport.device_scale_factor)
                .mobile(false)
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;
        // Keeps timers and media running as if the tab were in front.
        page.execute(SetFocusEmulationEnabledParams::new(true)).await?;
        page.execute(NetworkEnableParams::default()).await?;

        let interceptor = identity.install(page).await?;
        self.interceptor = interceptor;
        Ok(())
    }
}

#[async_trait]
impl DiscoveryContext for BrowserContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn observe(&mut self) -> BrowserResult<ResponseStream> {
        let events = self
            .live_page()?
            .event_listener::<EventResponseReceived>()
            .await?;
        Ok(events
            .map(|event| ObservedResponse::new(event.response.url.clone(), content_type(&event.response)))
            .boxed())
    }

    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        let page = self.live_page()?;
        let mut loads = page.event_listener::<EventLoadEventFired>().await?;
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let navigation = page.execute(params).await?;
        if let Some(error) = &navigation.result.error_text {
            return Err(BrowserError::Navigation(format!("{url}: {error}")));
        }
        match loads.next().await {
            Some(_) => Ok(()),
            None => Err(BrowserError::Navigation(format!(
                "{url}: page closed before load completed"
            ))),
        }
    }

    async fn evaluate(&mut self, script: &str) -> BrowserResult<()> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.live_page()?
            .evaluate_expression(params)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        Ok(())
    }

    async fn dispose(&mut self) -> BrowserResult<()> {
        if let Some(task) = self.interceptor.take() {
            task.abort();
        }
        let page = self.page.take();
        let context_id = self.browser_context_id.take();
        if page.is_none() && context_id.is_none() {
            return Ok(());
        }
        if let Some(page) = page {
            if let Err(err) = page.close().await {
                debug!(context = %self.id, error = %err, "page close failed");
            }
        }
        if let Some(context_id) = context_id {
            self.automation.dispose_browser_context(context_id).await;
        }
        self.automation
            .metrics
            .record(|metrics| metrics.record_context_disposed());
        debug!(context = %self.id, "browsing context disposed");
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.page.is_none() && self.browser_context_id.is_none()
    }
}

impl Drop for BrowserContext {
    fn drop(&mut self) {
        if !self.is_disposed() {
            warn!(context = %self.id, "BrowserContext dropped without dispose");
        }
    }
}

/// The `content-type` response header, or empty when the server sent none.
/// The engine's sniffed MIME type is never consulted.
fn content_type(response: &Response) -> String {
    header_content_type(response.headers.inner())
}

fn header_content_type(headers: &serde_json::Value) -> String {
    headers
        .as_object()
        .and_then(|headers| {
            headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                .and_then(|(_, value)| value.as_str())
        })
        .map(|value| value.to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ChromiumContextFactory {
    automation: Arc<BrowserAutomation>,
}

impl ChromiumContextFactory {
    pub fn new(automation: Arc<BrowserAutomation>) -> Self {
        Self { automation }
    }
}

#[async_trait]
impl ContextFactory for ChromiumContextFactory {
    async fn open(&self) -> BrowserResult<Box<dyn DiscoveryContext>> {
        let context = self.automation.new_context().await?;
        Ok(Box::new(context))
    }
}

#[cfg(test)]
mod tests {
    use chromiumoxide::cdp::browser_protocol::network::Headers;
    use chromiumoxide::cdp::browser_protocol::security::SecurityState;
    use serde_json::json;

    use super::*;
    use crate::browser::classifier::{MediaClassifier, MediaKind};

    #[test]
    fn header_lookup_ignores_case() {
        let headers = json!({ "Content-Type": "application/vnd.apple.mpegurl" });
        assert_eq!(header_content_type(&headers), "application/vnd.apple.mpegurl");
    }

    #[test]
    fn missing_header_is_ignored_even_when_sniffed_as_video() {
        let response = Response::builder()
            .url("https://cdn.example.com/blob")
            .status(200)
            .status_text("OK")
            .headers(Headers::new(json!({})))
            .mime_type("video/mp4")
            .connection_reused(false)
            .connection_id(0.0)
            .encoded_data_length(0.0)
            .security_state(SecurityState::Secure)
            .build()
            .unwrap();
        let content_type = content_type(&response);
        assert_eq!(content_type, "");
        assert_eq!(
            MediaClassifier::default().classify(&response.url, &content_type),
            MediaKind::Ignore
        );
    }
}
