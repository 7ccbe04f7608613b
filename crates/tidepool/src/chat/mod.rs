//! Conversation history loading.
//!
//! Handles cursor-based pagination of a conversation's message history:
//! fetching pages from the storage collaborator, merging them into the
//! per-conversation message log, and recovering from transient fetch
//! failures.

mod fetch;
mod log;
mod pagination;

pub use fetch::{FetchError, FetchResult, PageFetcher};
pub use log::MessageLog;
pub use pagination::{
    LoadError, LoadOutcome, PaginationController, PaginationSnapshot, RetryPolicy,
};
