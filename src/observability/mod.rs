//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! proxy core, http server, admin API
//!     → logging.rs (tracing events with proxy_id / route fields)
//!     → metrics.rs (session counters, handshake failures)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (when enabled)
//! ```

pub mod logging;
pub mod metrics;
