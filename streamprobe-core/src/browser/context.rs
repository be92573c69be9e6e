use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::BrowserResult;

/// A completed network response as seen by the rendering engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResponse {
    pub url: String,
    /// Empty when the response carried no content type.
    pub content_type: String,
}

impl ObservedResponse {
    pub fn new(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
        }
    }
}

pub type ResponseStream = BoxStream<'static, ObservedResponse>;

/// One isolated, disposable rendering context.
#[async_trait]
pub trait DiscoveryContext: Send + Sync {
    fn id(&self) -> &str;

    /// Subscribes to completed responses. The stream ends once the context
    /// is disposed.
    async fn observe(&mut self) -> BrowserResult<ResponseStream>;

    /// Navigates and resolves once the page signals load completion.
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    async fn evaluate(&mut self, script: &str) -> BrowserResult<()>;

    /// Idempotent; later calls are no-ops.
    async fn dispose(&mut self) -> BrowserResult<()>;

    fn is_disposed(&self) -> bool;
}

#[async_trait]
pub trait ContextFactory: Send + Sync {
    async fn open(&self) -> BrowserResult<Box<dyn DiscoveryContext>>;
}
