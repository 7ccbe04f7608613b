//! Generation stream consumption.
//!
//! Folds the backend's typed event sequence into one growing in-progress
//! message. The assembler is the per-message state machine; the consumer
//! drives it from a transport-agnostic frame stream and records the closed
//! message in the log.

mod assembler;
mod consumer;

pub use assembler::{Activity, StreamAssembler, StreamError, StreamPhase, StreamSnapshot};
pub use consumer::{StreamConsumer, StreamEnd, StreamFailReason, TransportError};
