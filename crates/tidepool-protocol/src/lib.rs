//! Canonical protocol types for the Tidepool conversation client.
//!
//! This crate defines the wire-level vocabulary shared by the client core and
//! its collaborators: conversation messages, pagination pages, and the typed
//! event stream emitted by the backend while a response is being generated.

pub mod events;
pub mod messages;
pub mod pages;

pub use events::{DecodeError, ProgressStage, StreamEvent, decode_frame};
pub use messages::{Message, Role, ToolResult, Usage};
pub use pages::{Cursor, Page};
