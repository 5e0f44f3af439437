//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::proxy::{DialerConfig, ProxyOptions, RelayMode, UpgraderConfig};

/// Root configuration for the WebSocket proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Proxied endpoints, one per `[[proxies]]` table.
    pub proxies: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration. When present the listener terminates TLS
    /// and backends see `X-Forwarded-Proto: https`.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// One proxied endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging and the admin API.
    pub name: String,

    /// Path prefix served by this route.
    pub path: String,

    /// Base backend URL (`ws://` or `wss://`).
    pub backend_url: Url,

    /// Forward the client's headers instead of the restricted allow-list.
    #[serde(default)]
    pub natural_tunnel: bool,

    #[serde(default)]
    pub relay_mode: RelayMode,

    /// Keep the backend URL path as a prefix of the request path.
    #[serde(default)]
    pub preserve_base_path: bool,

    /// Log every backend payload at debug level.
    #[serde(default)]
    pub log_messages: bool,

    /// Headers set on every backend dial, after translation.
    #[serde(default)]
    pub set_headers: BTreeMap<String, String>,

    #[serde(default)]
    pub upgrader: UpgraderConfig,

    #[serde(default)]
    pub dialer: DialerConfig,
}

impl RouteConfig {
    /// Options for one session of this route. A fresh identifier is generated
    /// per instance.
    pub fn options(&self) -> ProxyOptions {
        ProxyOptions {
            unique_id: None,
            natural_tunnel: self.natural_tunnel,
            relay_mode: self.relay_mode,
            preserve_base_path: self.preserve_base_path,
            upgrader: self.upgrader.clone(),
            dialer: self.dialer.clone(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Also write logs to this file, appending. Disabled when absent.
    pub log_file: Option<PathBuf>,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Default admin key; validation refuses it while the admin API is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
