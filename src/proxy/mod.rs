//! Caching proxy subsystem.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → engine.rs (decode request)
//!         → cache hit: cached response → client write queue
//!         → miss: stamp request-id → pool.rs (idle upstream or pending FIFO)
//!             → upstream write queue
//! upstream bytes
//!     → engine.rs (stream to client, decode response)
//!         → complete: cache by request-id, return upstream to pool
//! ```
//!
//! `server.rs` owns the engine on one task and feeds it socket events.
//!
//! # Design Decisions
//! - Pool capacity bounds concurrent upstream use; excess demand queues
//! - Write queues give each socket its own backpressure

pub mod engine;
pub mod pool;
pub mod server;
pub mod write_queue;

pub use engine::{Engine, EngineStats};
pub use pool::{PendingRequest, SlotState, UpstreamPool};
pub use server::{ProxyServer, ServerError};
