//! Network layer subsystem.
//!
//! Plain TCP listeners are bound by `main` and handed to the HTTP server;
//! when `[listener.tls]` is configured the server terminates TLS with the
//! material loaded by `tls.rs`.

pub mod tls;
