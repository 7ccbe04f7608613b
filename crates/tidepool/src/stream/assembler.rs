//! Stream assembler.
//!
//! Per-message state machine that folds stream events into one growing
//! in-progress message. The message id is reserved at construction, before
//! the first event is processed, so pagination writes never collide with
//! the streaming message.
//!
//! Events are applied in strict arrival order; content deltas are not
//! idempotent, so the assembler is the only place that tracks how much of
//! the stream has been folded.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use tidepool_protocol::{Message, ProgressStage, StreamEvent, ToolResult};

use crate::verify::{PersistenceVerifier, VerifyError};

/// Lifecycle of an in-progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    /// Events are still being folded.
    Open,
    /// Terminal `persisted` event accepted; the message is final.
    Completed,
    /// Closed abnormally; the partial message carries an error marker.
    Failed,
}

impl StreamPhase {
    pub fn is_closed(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Transient "what the backend is doing right now" view, fed by progress
/// events. Never part of the message itself.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub stage: ProgressStage,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_url: Option<String>,
}

/// UI-facing view of the active stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub message: Message,
    pub phase: StreamPhase,
}

/// Protocol violations and rejected finalizations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// An event arrived after the stream already closed. The sequence is
    /// strictly ordered with the terminal event last, so this is a
    /// protocol error, never silently applied.
    #[error("{kind} event arrived after the stream closed")]
    EventAfterClose { kind: &'static str },

    /// The terminal persisted record failed verification. The message
    /// keeps its locally assembled state, non-final, with a marker.
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// Folds a stream of events into one in-progress message.
pub struct StreamAssembler {
    message: Message,
    phase: StreamPhase,
    activity: Option<Activity>,
    announced_nonce: Option<String>,
    verifier: PersistenceVerifier,
}

impl StreamAssembler {
    /// Reserve an id and register a provisional assistant message.
    ///
    /// `created_at_seq` orders the message after everything currently in
    /// the conversation (see `MessageLog::next_seq`).
    pub fn new(
        conversation_id: impl Into<String>,
        created_at_seq: u64,
        verifier: PersistenceVerifier,
    ) -> Self {
        let id = format!("msg_{}", Uuid::new_v4());
        let created_at = chrono::Utc::now().timestamp_millis();
        Self {
            message: Message::provisional(id, conversation_id, created_at_seq, created_at),
            phase: StreamPhase::Open,
            activity: None,
            announced_nonce: None,
            verifier,
        }
    }

    /// The reserved message id.
    pub fn message_id(&self) -> &str {
        &self.message.id
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            message: self.message.clone(),
            phase: self.phase,
        }
    }

    /// Apply the next event in arrival order.
    ///
    /// Returns the phase after the event. On a rejected finalization the
    /// assembler keeps the last good assembled state, marks the message,
    /// and returns the verification error — the caller surfaces it while
    /// the partial content stays usable.
    pub fn apply(&mut self, event: StreamEvent) -> Result<StreamPhase, StreamError> {
        if self.phase.is_closed() {
            return Err(StreamError::EventAfterClose { kind: event.kind() });
        }

        match event {
            StreamEvent::Progress {
                stage,
                message,
                urls,
                current_url,
                queries,
                sources_used,
                tool_reasoning,
                tool_query,
                tool_url,
            } => {
                self.activity = Some(Activity {
                    stage,
                    message,
                    urls: urls.unwrap_or_default(),
                    current_url,
                    queries: queries.unwrap_or_default(),
                    sources_used: sources_used.unwrap_or_default(),
                    tool_reasoning,
                    tool_query,
                    tool_url,
                });
            }

            StreamEvent::Reasoning { content } => {
                self.message
                    .reasoning
                    .get_or_insert_with(String::new)
                    .push_str(&content);
            }

            StreamEvent::Content { content, delta } => match (content, delta) {
                // Wholesale replacement wins over previously folded deltas.
                (Some(content), _) => self.message.content = content,
                (None, Some(delta)) => self.message.content.push_str(&delta),
                (None, None) => {}
            },

            StreamEvent::ToolResult { tool_name, result } => {
                self.message.tool_results.push(ToolResult { tool_name, result });
            }

            StreamEvent::Metadata { metadata, nonce } => {
                let target = self.message.metadata.get_or_insert_with(Default::default);
                for (key, value) in metadata {
                    target.insert(key, value);
                }
                if let Some(nonce) = nonce {
                    if let Some(previous) = &self.announced_nonce {
                        if previous != &nonce {
                            tracing::debug!(
                                "Nonce re-announced for message {} ({previous:?} -> {nonce:?})",
                                self.message.id
                            );
                        }
                    }
                    self.announced_nonce = Some(nonce);
                }
            }

            StreamEvent::Error { error } => {
                tracing::warn!("Stream for message {} failed: {}", self.message.id, error);
                self.message.error = Some(error);
                self.phase = StreamPhase::Failed;
            }

            StreamEvent::Persisted {
                payload,
                nonce,
                signature,
            } => {
                if let Err(err) = self.verifier.verify(
                    &payload,
                    &nonce,
                    &signature,
                    self.announced_nonce.as_deref(),
                ) {
                    tracing::warn!(
                        "Rejected persisted payload for message {}: {}",
                        self.message.id,
                        err
                    );
                    self.message.error = Some(format!("could not verify persisted payload: {err}"));
                    self.phase = StreamPhase::Failed;
                    return Err(err.into());
                }

                // The backend record is authoritative over locally folded
                // state (server-side normalization may differ from the
                // streamed deltas). Only the ordering key is kept local:
                // it was reserved against this conversation's log.
                let seq = self.message.created_at_seq;
                self.message = payload;
                self.message.created_at_seq = seq;
                self.message.is_final = true;
                self.message.error = None;
                self.phase = StreamPhase::Completed;
            }
        }

        Ok(self.phase)
    }

    /// Close the stream abnormally without a terminal event (transport
    /// error, EOF before the terminal event, undecodable frame). The
    /// partial message is retained with the marker.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.phase.is_closed() {
            return;
        }
        self.message.error = Some(reason.into());
        self.phase = StreamPhase::Failed;
    }
}
