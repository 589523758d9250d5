//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine, cache, transport:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout via the fmt layer
//!     → Prometheus scrape endpoint (optional)
//!     → admin API (engine stats snapshot)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`connection_id`, `bytes`) rather than formatted text
//! - Metrics go through the `metrics` facade; recording is a no-op until an
//!   exporter is installed

pub mod logging;
pub mod metrics;
