//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → engine loop exits → admin server drains
//! ```
//!
//! # Design Decisions
//! - One broadcast coordinator shared by every long-running task
//! - In-flight client exchanges are dropped on shutdown, not drained

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
