//! The seam between the ingestion pipeline and the external data provider.
//!
//! A [`SourceFetcher`] retrieves the published dataset as [`RawRow`]s and
//! performs lightweight existence checks on arbitrary links. The HTTP
//! implementation lives in the application crate; tests substitute
//! in-memory doubles.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::RawRow;

/// Container-level result of one dataset fetch.
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    /// Where the rows came from (URL or path), for logging.
    pub origin: String,
    pub rows: Vec<RawRow>,
}

/// Failures of `fetch_raw_dataset`. All of them abort an ingestion run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Transport error or non-success response from the provider.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The provider did not answer within the configured bound.
    #[error("source timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The payload could not be read at the container level
    /// (corrupt archive, missing worksheet, malformed JSON).
    #[error("source format error: {0}")]
    Format(String),
}

impl SourceError {
    /// Stable machine-readable code for outcomes and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SourceError::Unavailable(_) => "SourceUnavailable",
            SourceError::Timeout { .. } => "SourceTimeout",
            SourceError::Format(_) => "SourceFormatError",
        }
    }
}

/// Failures of a link check. An unreachable link is *not* an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("invalid link format: {0}")]
    InvalidLinkFormat(String),
}

/// Retrieves the raw dataset and checks link reachability.
///
/// Implementations must be `Send + Sync`; one instance is shared between
/// the ingestion coordinator and the link validator.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch and decode the currently published dataset.
    async fn fetch_raw_dataset(&self) -> Result<RawDataset, SourceError>;

    /// Existence check against `url` without retrieving a body.
    ///
    /// Returns `Ok(false)` for refused connections, non-success statuses
    /// and timeouts. Only a malformed URL is an error.
    async fn fetch_link(&self, url: &str) -> Result<bool, LinkError>;
}
