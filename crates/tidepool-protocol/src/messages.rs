//! Canonical message types.
//!
//! Messages are the persistent units of a conversation. The backend is the
//! authoritative store; the client holds them in an in-memory log keyed by
//! conversation. Field names on the wire are camelCase to match the backend's
//! JSON records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique within a conversation.
    pub id: String,

    /// Conversation this message belongs to.
    pub conversation_id: String,

    /// Message role.
    pub role: Role,

    /// Text content. May be partial while the message is still streaming.
    #[serde(default)]
    pub content: String,

    /// Reasoning trace, when the backend exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Ordered tool invocation results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,

    /// Structured annotations: source citations, token counts, etc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    /// Monotonic ordering key within the conversation. Not wall-clock, so
    /// ordering stays stable under fetch retries.
    pub created_at_seq: u64,

    /// Unix milliseconds. Informational only; ordering always uses
    /// `created_at_seq`.
    pub created_at: i64,

    /// Token counts, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// True once the message has been verified-persisted or a historical
    /// page confirms it. Final messages are immutable.
    #[serde(default)]
    pub is_final: bool,

    /// Error marker attached when a stream closed abnormally. The partial
    /// content stays visible alongside it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    /// A provisional assistant message, registered before the first stream
    /// event for it is processed.
    pub fn provisional(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        created_at_seq: u64,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role: Role::Assistant,
            content: String::new(),
            reasoning: None,
            tool_results: Vec::new(),
            metadata: None,
            created_at_seq,
            created_at,
            usage: None,
            is_final: false,
            error: None,
        }
    }
}

// ============================================================================
// Message metadata types
// ============================================================================

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// One tool invocation result attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub result: Value,
}

/// Token usage for a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
