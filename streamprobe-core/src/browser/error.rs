use serde::Serialize;
use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page script failed: {0}")]
    Script(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}

/// Caller-visible failure of one discovery request.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to load page: {0}")]
    LoadFailure(String),
    #[error("no media resources detected")]
    NoMediaDetected,
    #[error("operation timed out")]
    TimedOut,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryErrorKind {
    LoadFailure,
    NoMediaDetected,
    TimedOut,
    InvalidRequest,
    Browser,
}

impl DiscoveryError {
    pub fn kind(&self) -> DiscoveryErrorKind {
        match self {
            DiscoveryError::LoadFailure(_) => DiscoveryErrorKind::LoadFailure,
            DiscoveryError::NoMediaDetected => DiscoveryErrorKind::NoMediaDetected,
            DiscoveryError::TimedOut => DiscoveryErrorKind::TimedOut,
            DiscoveryError::InvalidRequest(_) => DiscoveryErrorKind::InvalidRequest,
            DiscoveryError::Browser(_) => DiscoveryErrorKind::Browser,
        }
    }
}
