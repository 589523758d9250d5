//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! Completed client request
//!     → store.rs lookup (METHOD:URI, lazy expiry)
//!     → hit: cached Message re-serialized to the client
//!     → miss: forwarded upstream
//!
//! Completed upstream response
//!     → policy.rs (GET + 200 + positive max-age?)
//!     → store.rs insert with absolute expiry
//! ```
//!
//! # Design Decisions
//! - Owned by the engine task; no locking
//! - No size bound, no background sweeper
//! - Not persisted across restarts

pub mod policy;
pub mod store;

pub use store::{CacheEntry, ResponseCache};
