//! Pagination controller.
//!
//! Owns cursor state for one conversation: issues the initial fetch and
//! on-demand older-page fetches, merges results into the message log,
//! retries transient failures with a capped exponential backoff, and keeps
//! strict single-flight semantics — at most one outstanding fetch per
//! conversation, a `load_more` while one is in flight is a no-op.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tidepool_protocol::{Cursor, Message};

use super::fetch::{FetchError, PageFetcher};
use super::log::MessageLog;

/// Retry timing for transient fetch failures.
///
/// A policy object rather than hard-coded timing: delays run on
/// `tokio::time::sleep`, so tests drive them with tokio's paused clock.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (so `max_retries = 2` means up to
    /// three attempts total).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the backoff curve.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): capped exponential.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        (self.initial_delay * factor).min(self.max_delay)
    }
}

/// A page load that did not produce a page.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Transient failures exhausted the retry budget.
    #[error("page fetch failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    /// The backend rejected the request outright; never retried.
    #[error("page fetch rejected: {0}")]
    Rejected(#[source] FetchError),
}

/// What a load call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page was fetched and merged; `merged` counts newly inserted ids.
    Loaded { merged: usize },
    /// A fetch for this conversation was already in flight; nothing was
    /// queued or duplicated.
    AlreadyLoading,
    /// No further history exists.
    NoMore,
}

/// UI-facing view of pagination state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PaginationSnapshot {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct PageState {
    cursor: Option<Cursor>,
    has_more: bool,
    in_flight: bool,
    is_loading: bool,
    is_loading_more: bool,
    error: Option<String>,
}

/// Pagination controller for one conversation.
pub struct PaginationController<F: PageFetcher> {
    conversation_id: String,
    fetcher: Arc<F>,
    log: Arc<MessageLog>,
    limit: u32,
    policy: RetryPolicy,
    state: Mutex<PageState>,
}

/// Clears the in-flight flags when a load future completes or is dropped
/// mid-fetch, so a cancelled fetch can never wedge single-flight.
struct FlightGuard<'a> {
    state: &'a Mutex<PageState>,
    more: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.in_flight = false;
        if self.more {
            state.is_loading_more = false;
        } else {
            state.is_loading = false;
        }
    }
}

/// A poisoned lock only means another thread panicked while holding it;
/// the state itself stays consistent, so recover the guard.
fn lock(state: &Mutex<PageState>) -> MutexGuard<'_, PageState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<F: PageFetcher> PaginationController<F> {
    pub fn new(
        conversation_id: impl Into<String>,
        fetcher: Arc<F>,
        log: Arc<MessageLog>,
        limit: u32,
    ) -> Self {
        Self::with_policy(conversation_id, fetcher, log, limit, RetryPolicy::default())
    }

    pub fn with_policy(
        conversation_id: impl Into<String>,
        fetcher: Arc<F>,
        log: Arc<MessageLog>,
        limit: u32,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            fetcher,
            log,
            limit,
            policy,
            state: Mutex::new(PageState::default()),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Fetch the first (newest) page and populate the log.
    pub async fn load_initial(&self) -> Result<LoadOutcome, LoadError> {
        {
            let mut state = lock(&self.state);
            if state.in_flight {
                return Ok(LoadOutcome::AlreadyLoading);
            }
            state.in_flight = true;
            state.is_loading = true;
            state.error = None;
        }
        let guard = FlightGuard {
            state: &self.state,
            more: false,
        };

        let result = self.fetch_with_retry(None).await;
        let outcome = self.apply_fetch_result(result);
        drop(guard);
        outcome
    }

    /// Fetch the next older page.
    ///
    /// Valid only when more history exists and no fetch is in flight for
    /// this conversation; otherwise a no-op. Callers gate UI on the
    /// snapshot's loading flags rather than calling repeatedly.
    pub async fn load_more(&self) -> Result<LoadOutcome, LoadError> {
        let cursor = {
            let mut state = lock(&self.state);
            if state.in_flight {
                return Ok(LoadOutcome::AlreadyLoading);
            }
            if !state.has_more {
                return Ok(LoadOutcome::NoMore);
            }
            state.in_flight = true;
            state.is_loading_more = true;
            state.error = None;
            state.cursor.clone()
        };
        let guard = FlightGuard {
            state: &self.state,
            more: true,
        };

        let result = self.fetch_with_retry(cursor).await;
        let outcome = self.apply_fetch_result(result);
        drop(guard);
        outcome
    }

    /// Discard cursor state and the conversation's log content (used when
    /// switching conversations).
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.cursor = None;
        state.has_more = false;
        state.error = None;
        self.log.reset(&self.conversation_id);
        tracing::debug!("Reset pagination state for conversation {}", self.conversation_id);
    }

    /// Current UI-facing view.
    pub fn snapshot(&self) -> PaginationSnapshot {
        let state = lock(&self.state);
        PaginationSnapshot {
            messages: self.log.messages(&self.conversation_id),
            has_more: state.has_more,
            is_loading: state.is_loading,
            is_loading_more: state.is_loading_more,
            error: state.error.clone(),
        }
    }

    /// Fetch one page, retrying transient failures per the policy.
    ///
    /// A retry that succeeds is indistinguishable from a first-attempt
    /// success to the caller: one logical page result either way.
    async fn fetch_with_retry(
        &self,
        cursor: Option<Cursor>,
    ) -> Result<tidepool_protocol::Page, LoadError> {
        let mut attempt: u32 = 0;
        loop {
            tracing::debug!(
                "Fetching page for conversation {} (attempt {})",
                self.conversation_id,
                attempt + 1
            );
            match self
                .fetcher
                .fetch_page(&self.conversation_id, cursor.as_ref(), self.limit)
                .await
            {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "Transient fetch failure for conversation {} (retry {} of {} in {:?}): {}",
                        self.conversation_id,
                        attempt,
                        self.policy.max_retries,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(LoadError::Exhausted {
                        attempts: attempt + 1,
                        source: err,
                    });
                }
                Err(err) => return Err(LoadError::Rejected(err)),
            }
        }
    }

    /// Merge a fetched page and update cursor state, or record the failure.
    ///
    /// The merge and the cursor update run synchronously after the fetch
    /// resolves — no await point in between — so cancellation can only land
    /// before the page exists or after it is fully merged, never halfway. A
    /// failed load leaves previously merged log state untouched.
    fn apply_fetch_result(
        &self,
        result: Result<tidepool_protocol::Page, LoadError>,
    ) -> Result<LoadOutcome, LoadError> {
        match result {
            Ok(page) => {
                let merged = self.log.merge_page(&self.conversation_id, &page);
                let mut state = lock(&self.state);
                state.cursor = page.continuation().cloned();
                state.has_more = page.has_more;
                state.error = None;
                Ok(LoadOutcome::Loaded { merged })
            }
            Err(err) => {
                tracing::error!(
                    "Page load failed for conversation {}: {}",
                    self.conversation_id,
                    err
                );
                let mut state = lock(&self.state);
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }
}
