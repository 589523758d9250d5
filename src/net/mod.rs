//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (opaque ConnectionId)
//!     → transport.rs (reader/writer tasks → Event channel)
//!     → Engine task
//!
//! Upstream sockets:
//!     Engine → Transport::dial → connect with backoff → Event::Connected
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Sockets are addressed by monotonic IDs, never raw handles
//! - TLS is not supported

pub mod connection;
pub mod listener;
pub mod transport;

pub use connection::ConnectionId;
pub use transport::{Event, IoOp, TcpTransport, Transport};
