//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl+C → broadcast → stop accepting, close every session → exit
//!
//! Sessions (registry.rs):
//!     upgrade accepted → register → relay → remove_connection
//! ```

pub mod registry;
pub mod shutdown;

pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use shutdown::Shutdown;
