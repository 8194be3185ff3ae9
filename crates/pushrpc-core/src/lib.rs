//! PushRPC Core - request/response JSON-RPC over a server-push event stream.
//!
//! The server pushes every message down one long-lived `text/event-stream`
//! connection; the client submits requests as short HTTP POSTs bound to that
//! stream by a session token. This crate hides the split behind a single
//! `request` call that resolves exactly once with a response, a remote error,
//! a timeout, or a cancellation.
//!
//! # Example
//!
//! ```rust,ignore
//! use pushrpc_core::{McpClient, SseTransport, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> pushrpc_core::Result<()> {
//!     let config = TransportConfig::new("127.0.0.1:8081/sse")?;
//!     let client = McpClient::new(SseTransport::new(config)?);
//!
//!     client.connect().await?;
//!     for tool in client.list_tools().await? {
//!         println!("{}", tool.name);
//!     }
//!
//!     let result = client
//!         .call_tool("list_functions", serde_json::json!({}))
//!         .await?;
//!     println!("{}", result.text());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod mcp;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod submission;
pub mod transport;

// Re-export commonly used types
pub use config::{TransportConfig, TransportDefaults};
pub use correlator::{PendingResponse, RequestCorrelator};
pub use dispatcher::{Dispatcher, NotificationObserver, Routed};
pub use error::{Result, TransportError};
pub use mcp::{ClientInfo, ContentItem, InitializeResult, McpClient, ToolCallResult, ToolDescriptor};
pub use protocol::{RpcErrorObject, RpcMessage, RpcNotification, RpcOutcome, RpcRequest};
pub use session::Session;
pub use stream::{EventKind, EventStream, StreamEvent, StreamReader};
pub use submission::{SubmissionClient, SubmissionReply};
pub use transport::{SseTransport, TransportStatus};
