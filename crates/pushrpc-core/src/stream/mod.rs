//! Server-push event stream.
//!
//! The reader owns the single long-lived `GET` connection, decodes its
//! `text/event-stream` framing, and forwards each event over a bounded channel
//! to whoever consumes the [`EventStream`].
//!
//! ```text
//! event: endpoint
//! data: /messages/?session_id=abc123
//!
//! data: {"jsonrpc":"2.0","id":7,"result":{"ok":true}}
//!
//! ```

mod decoder;
mod reader;

pub use decoder::{EventKind, SseDecoder, StreamEvent};
pub use reader::{EventStream, StreamReader};
