//! WebSocket reverse proxy library.
//!
//! The [`proxy`] module is the engine: backend resolution, handshake header
//! translation, dial/upgrade orchestration, the frame relay and the session
//! lifecycle. The remaining modules turn it into a server.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{ConnectionRegistry, Shutdown};
pub use proxy::{ProxyOptions, WebsocketProxy};
