//! Error types for Furnace.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("manifest unreachable: {0}")]
    ManifestUnreachable(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error belongs to the environment-resolution checkpoint.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Error::ManifestUnreachable(_) | Error::InvalidManifest(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Bound an outbound call by `limit`, mapping an elapsed deadline to
/// [`Error::Timeout`].
pub async fn with_timeout<T, F>(limit: std::time::Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{} exceeded {:?}", what, limit))),
    }
}
