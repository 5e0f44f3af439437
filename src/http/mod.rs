//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, graceful shutdown)
//!     → websocket.rs (route match, per-session proxy, handshake)
//!     → proxy core (dial backend, upgrade, relay)
//! ```

pub mod server;
pub mod websocket;

pub use server::{AppState, HttpServer};
pub use websocket::ProxyRoute;
