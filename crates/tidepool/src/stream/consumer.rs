//! Stream consumer.
//!
//! Drives an ordered frame sequence from the transport into a
//! [`StreamAssembler`] and records the closed message in the
//! [`MessageLog`]. The transport itself is a collaborator: HTTP chunks,
//! WebSocket text frames, and SSE data lines all arrive here as the same
//! `Result<String, TransportError>` items.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;

use tidepool_protocol::{DecodeError, decode_frame};

use crate::chat::MessageLog;
use crate::verify::VerifyError;

use super::assembler::{StreamAssembler, StreamError, StreamPhase};

/// Transport-level delivery failure.
#[derive(Debug, Error)]
#[error("transport failed: {0}")]
pub struct TransportError(pub String);

/// Why a stream closed abnormally.
#[derive(Debug, Error)]
pub enum StreamFailReason {
    /// The backend sent a terminal error event.
    #[error("backend reported: {0}")]
    Backend(String),

    /// A frame could not be decoded; the sequence cannot be resumed from
    /// the middle.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The persisted record failed verification.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// An event violated the stream protocol (e.g. arrived after close).
    #[error(transparent)]
    Protocol(StreamError),

    /// The transport failed mid-stream.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The stream ended without a terminal event.
    #[error("stream ended without a terminal event")]
    UnexpectedEof,
}

/// How a consumed stream ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// The persisted record was verified and the final message recorded in
    /// the log.
    Completed,
    /// The stream closed abnormally. The partial message was recorded in
    /// the log, non-final, with its error marker — partial content stays
    /// visible.
    Failed(StreamFailReason),
    /// Shutdown was signalled (conversation closed or switched). Remaining
    /// frames are discarded, not buffered, and nothing is written.
    Detached,
}

/// Consumes one generation stream for a conversation.
pub struct StreamConsumer {
    log: Arc<MessageLog>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl StreamConsumer {
    pub fn new(log: Arc<MessageLog>, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self { log, shutdown_rx }
    }

    /// Drive `frames` into the assembler until the stream closes, shutdown
    /// is signalled, or the transport gives out.
    pub async fn consume<S>(&mut self, mut frames: S, assembler: &mut StreamAssembler) -> StreamEnd
    where
        S: Stream<Item = Result<String, TransportError>> + Unpin,
    {
        let log = Arc::clone(&self.log);
        let shutdown_rx = &mut self.shutdown_rx;

        // If the shutdown sender is gone no signal can ever arrive;
        // disable that select arm instead of treating it as a detach.
        let mut shutdown_open = true;

        loop {
            tokio::select! {
                signal = shutdown_rx.recv(), if shutdown_open => {
                    match signal {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            tracing::debug!(
                                "Detaching from stream for message {}",
                                assembler.message_id()
                            );
                            return StreamEnd::Detached;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            shutdown_open = false;
                        }
                    }
                }

                frame = frames.next() => match frame {
                    None => {
                        return fail(&log, assembler, StreamFailReason::UnexpectedEof);
                    }
                    Some(Err(err)) => {
                        return fail(&log, assembler, err.into());
                    }
                    Some(Ok(text)) => match decode_frame(&text) {
                        Err(err) => {
                            return fail(&log, assembler, err.into());
                        }
                        Ok(event) => match assembler.apply(event) {
                            Ok(StreamPhase::Open) => {}
                            Ok(StreamPhase::Completed) => {
                                log.append_streamed(assembler.message().clone());
                                tracing::debug!(
                                    "Stream completed, message {} finalized",
                                    assembler.message_id()
                                );
                                return StreamEnd::Completed;
                            }
                            Ok(StreamPhase::Failed) => {
                                let reason = assembler
                                    .message()
                                    .error
                                    .clone()
                                    .unwrap_or_else(|| "generation failed".to_string());
                                log.append_streamed(assembler.message().clone());
                                return StreamEnd::Failed(StreamFailReason::Backend(reason));
                            }
                            Err(StreamError::Verify(err)) => {
                                // The assembler already marked the message;
                                // retain the partial state and surface the
                                // recoverable integrity error.
                                log.append_streamed(assembler.message().clone());
                                return StreamEnd::Failed(err.into());
                            }
                            Err(err) => {
                                return fail(&log, assembler, StreamFailReason::Protocol(err));
                            }
                        },
                    },
                },
            }
        }
    }
}

/// Close abnormally: mark the partial message, retain it, report why.
fn fail(log: &MessageLog, assembler: &mut StreamAssembler, reason: StreamFailReason) -> StreamEnd {
    tracing::warn!(
        "Stream for message {} closed abnormally: {}",
        assembler.message_id(),
        reason
    );
    assembler.abort(reason.to_string());
    log.append_streamed(assembler.message().clone());
    StreamEnd::Failed(reason)
}
