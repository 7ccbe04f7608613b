//! Page fetch seam.
//!
//! The storage backend that answers page queries lives behind this trait.
//! It classifies its own failures: the pagination controller's retry
//! decision relies entirely on that classification.

use async_trait::async_trait;
use thiserror::Error;

use tidepool_protocol::{Cursor, Page};

/// Result type for page fetches.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors a page fetch can fail with.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network/timeout class failure. Safe to retry.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Definitive application rejection (bad request, auth). Never retried.
    #[error("fetch rejected: {0}")]
    Terminal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Fetches one page of conversation history.
///
/// `cursor` is `None` for the initial (newest) page; afterwards the opaque
/// token from the previous page is threaded back unmodified.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> FetchResult<Page>;
}
