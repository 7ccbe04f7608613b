//! Pagination page and cursor types.

use serde::{Deserialize, Serialize};

use crate::messages::Message;

/// Opaque continuation token for fetching the next older page.
///
/// Cursors are scoped to one conversation and carry no client-visible
/// structure: they are never compared, ordered, or inspected, only threaded
/// back unmodified into the next fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of one pagination fetch. Messages are ordered oldest-first within
/// the page; each subsequent page is older than the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,

    pub has_more: bool,
}

impl Page {
    /// The cursor to use for the next fetch.
    ///
    /// Normalizes the `has_more == false implies no cursor` invariant: a
    /// backend that sends a dangling cursor on the last page is treated as
    /// exhausted.
    pub fn continuation(&self) -> Option<&Cursor> {
        if self.has_more {
            self.next_cursor.as_ref()
        } else {
            None
        }
    }
}
