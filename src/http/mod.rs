//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! raw socket bytes
//!     → message.rs (incremental decode: start line → headers → body)
//!     → request.rs (correlation ID stamped before forwarding)
//!     → message.rs (serialize, optional gzip via encoding.rs)
//!     → response.rs (canned error replies)
//! ```

pub mod encoding;
pub mod message;
pub mod request;
pub mod response;

pub use message::{Message, MessageKind, ParseState};
pub use request::{RequestId, REQUEST_ID_HEADER};
