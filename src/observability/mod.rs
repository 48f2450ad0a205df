//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Handshake, stream manager, stream handlers, server dispatch:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config log_level)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metric updates are macro calls; with no recorder installed they are no-ops
//! - Logging init tolerates being called twice so tests can share a process

pub mod logging;
pub mod metrics;
