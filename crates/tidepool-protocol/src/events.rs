//! Generation stream protocol events.
//!
//! While the backend generates a response it emits an ordered sequence of
//! JSON frames, each shaped as `{"type": <kind>, ...}`. The transport is
//! opaque here (HTTP chunks, WebSocket text frames, SSE data lines all
//! carry the same frames). A stream always ends with exactly one terminal
//! event: `persisted` on success, `error` otherwise.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::messages::Message;

// ============================================================================
// Events (streamed from the backend during generation)
// ============================================================================

/// Events streamed from the backend while a response is being generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Pipeline activity update. Never carries message content.
    Progress {
        stage: ProgressStage,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        urls: Option<Vec<String>>,
        #[serde(rename = "currentUrl", default, skip_serializing_if = "Option::is_none")]
        current_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queries: Option<Vec<String>>,
        #[serde(rename = "sourcesUsed", default, skip_serializing_if = "Option::is_none")]
        sources_used: Option<Vec<String>>,
        #[serde(rename = "toolReasoning", default, skip_serializing_if = "Option::is_none")]
        tool_reasoning: Option<String>,
        #[serde(rename = "toolQuery", default, skip_serializing_if = "Option::is_none")]
        tool_query: Option<String>,
        #[serde(rename = "toolUrl", default, skip_serializing_if = "Option::is_none")]
        tool_url: Option<String>,
    },

    /// Reasoning-trace delta.
    Reasoning { content: String },

    /// Content update: either an incremental `delta` to append or a
    /// wholesale `content` replacement. At most one of the two is set;
    /// a frame carrying both is malformed.
    Content {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },

    /// Structured metadata to merge into the in-progress message. An
    /// optional nonce announces the token the terminal `persisted` event
    /// must echo.
    Metadata {
        metadata: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
    },

    /// A completed tool invocation.
    ToolResult {
        #[serde(rename = "toolName")]
        tool_name: String,
        result: Value,
    },

    /// Terminal: generation failed.
    Error { error: String },

    /// Terminal: the backend's durable record of the message, signed so the
    /// client can verify it before treating the message as final.
    Persisted {
        payload: Message,
        nonce: String,
        signature: String,
    },
}

impl StreamEvent {
    /// Wire tag of this event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Reasoning { .. } => "reasoning",
            Self::Content { .. } => "content",
            Self::Metadata { .. } => "metadata",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Persisted { .. } => "persisted",
        }
    }
}

/// Where the generation pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Thinking,
    Planning,
    Searching,
    Scraping,
    Analyzing,
    Generating,
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thinking => write!(f, "thinking"),
            Self::Planning => write!(f, "planning"),
            Self::Searching => write!(f, "searching"),
            Self::Scraping => write!(f, "scraping"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Generating => write!(f, "generating"),
        }
    }
}

// ============================================================================
// Frame decoding
// ============================================================================

/// A frame that could not be decoded into a [`StreamEvent`].
///
/// Decode failures are unrecoverable for the stream they occur on: the
/// sequence is a single monotonic run and cannot be replayed from the
/// middle.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON at all.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    /// The frame parsed as JSON but is not a known event: unrecognized
    /// `type` tag or a missing required field.
    #[error("frame rejected: {0}")]
    InvalidEvent(String),

    /// A `content` event carrying both a full value and a delta.
    #[error("content event carries both a full value and a delta")]
    AmbiguousContent,
}

/// Decode one inbound protocol frame.
pub fn decode_frame(frame: &str) -> Result<StreamEvent, DecodeError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let event: StreamEvent =
        serde_json::from_value(value).map_err(|e| DecodeError::InvalidEvent(e.to_string()))?;

    if let StreamEvent::Content {
        content: Some(_),
        delta: Some(_),
    } = &event
    {
        return Err(DecodeError::AmbiguousContent);
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_progress() {
        let frame = r#"{
            "type": "progress",
            "stage": "scraping",
            "message": "Fetching sources",
            "currentUrl": "https://example.com/a",
            "urls": ["https://example.com/a", "https://example.com/b"]
        }"#;
        let event = decode_frame(frame).unwrap();
        match event {
            StreamEvent::Progress {
                stage,
                message,
                current_url,
                urls,
                ..
            } => {
                assert_eq!(stage, ProgressStage::Scraping);
                assert_eq!(message, "Fetching sources");
                assert_eq!(current_url.as_deref(), Some("https://example.com/a"));
                assert_eq!(urls.unwrap().len(), 2);
            }
            other => panic!("expected progress, got {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_content_delta() {
        let event = decode_frame(r#"{"type":"content","delta":"Hel"}"#).unwrap();
        assert!(matches!(
            event,
            StreamEvent::Content {
                content: None,
                delta: Some(_)
            }
        ));
    }

    #[test]
    fn test_decode_content_with_both_fields_is_rejected() {
        let err = decode_frame(r#"{"type":"content","content":"full","delta":"d"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::AmbiguousContent));
    }

    #[test]
    fn test_decode_content_with_neither_field_is_allowed() {
        // Both-absent is a wire-legal no-op; the assembler ignores it.
        let event = decode_frame(r#"{"type":"content"}"#).unwrap();
        assert!(matches!(
            event,
            StreamEvent::Content {
                content: None,
                delta: None
            }
        ));
    }

    #[test]
    fn test_decode_tool_result() {
        let event =
            decode_frame(r#"{"type":"tool_result","toolName":"web_search","result":{"n":1}}"#)
                .unwrap();
        match event {
            StreamEvent::ToolResult { tool_name, result } => {
                assert_eq!(tool_name, "web_search");
                assert_eq!(result["n"], 1);
            }
            other => panic!("expected tool_result, got {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_unknown_type_is_rejected() {
        let err = decode_frame(r#"{"type":"telemetry","data":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEvent(_)));
    }

    #[test]
    fn test_decode_missing_required_field_is_rejected() {
        // error events require the error string
        let err = decode_frame(r#"{"type":"error"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEvent(_)));
    }

    #[test]
    fn test_decode_garbage_is_invalid_json() {
        let err = decode_frame("not json").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn test_persisted_roundtrip() {
        let payload = Message::provisional("msg-9", "conv-1", 7, 1738764000000);
        let event = StreamEvent::Persisted {
            payload,
            nonce: "n-123".to_string(),
            signature: "deadbeef".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"persisted\""));

        let decoded = decode_frame(&json).unwrap();
        match decoded {
            StreamEvent::Persisted { payload, nonce, .. } => {
                assert_eq!(payload.id, "msg-9");
                assert_eq!(nonce, "n-123");
            }
            other => panic!("expected persisted, got {}", other.kind()),
        }
    }
}
