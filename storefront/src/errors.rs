use crate::config::ValidationError;
use crate::upstream::UpstreamError;
use thiserror::Error;

/// Result type alias for storefront operations
pub type Result<T, E = StorefrontError> = std::result::Result<T, E>;

/// Errors that stop the service
#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Upstream client error: {0}")]
    UpstreamClient(#[from] UpstreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported to the caller of a route.
///
/// Only these abort a response. Per-item enrichment failures never become an
/// `ApiError`; see [`crate::aggregator::EnrichmentError`].
#[derive(Error, Debug)]
pub enum ApiError {
    /// A required parameter is missing or empty. Upstream is never called.
    #[error("{0}")]
    MissingParameter(&'static str),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// The primary upstream call failed or returned something unusable.
    #[error("{reason}: {source}")]
    Upstream {
        reason: &'static str,
        #[source]
        source: UpstreamError,
    },
}

impl ApiError {
    pub fn upstream(reason: &'static str) -> impl FnOnce(UpstreamError) -> ApiError {
        move |source| ApiError::Upstream { reason, source }
    }
}
