//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream dial fails or times out
//!     → backoff.rs (exponential delay with jitter)
//!     → dial again, until connected
//! ```
//!
//! # Design Decisions
//! - Every connect attempt has a deadline (`upstream.connect_timeout_secs`)
//! - Upstream dials retry forever; the pool never shrinks
//! - Jitter keeps a pool of replacements from reconnecting in lockstep

pub mod backoff;
