//! Proxy options.
//!
//! These types double as configuration schema: `config::schema` embeds them
//! directly under each `[[proxies]]` table.

use serde::{Deserialize, Serialize};

/// How the relay treats the backend-to-client direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// Both directions forward data frames.
    #[default]
    FullDuplex,
    /// Client frames reach the backend; backend frames are only handed to the viewer.
    HalfDuplex,
}

/// Parameters for the client-facing upgrade.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpgraderConfig {
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,

    /// Write buffer size in bytes.
    pub write_buffer_size: usize,

    /// Subprotocols the proxy negotiates itself, in preference order.
    /// When empty, the protocol chosen by the backend is echoed to the client.
    pub subprotocols: Vec<String>,

    /// Allowed `Origin` values. Empty means same-origin only; `"*"` allows any.
    pub allowed_origins: Vec<String>,
}

impl Default for UpgraderConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            subprotocols: Vec::new(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Parameters for the backend dial.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Upper bound for connect + handshake, in seconds.
    pub handshake_timeout_secs: u64,

    /// Maximum message size accepted from the backend, in bytes.
    pub max_message_size: Option<usize>,

    /// Maximum frame size accepted from the backend, in bytes.
    pub max_frame_size: Option<usize>,

    /// Disable Nagle's algorithm on the backend socket.
    pub disable_nagle: bool,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 45,
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            disable_nagle: true,
        }
    }
}

/// Behavioural switches of a single proxy instance.
#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    /// Correlation key; a UUID is generated when absent.
    pub unique_id: Option<String>,

    /// Pass the client's headers through instead of the restricted allow-list.
    pub natural_tunnel: bool,

    pub relay_mode: RelayMode,

    /// Keep the base URL path as a prefix of the request path.
    pub preserve_base_path: bool,

    pub upgrader: UpgraderConfig,
    pub dialer: DialerConfig,
}
