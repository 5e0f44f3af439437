//! Extension points exposed to the surrounding application.
//!
//! Each capability is a one-method trait. An instance holds them as
//! `Option<Arc<dyn ...>>`; an absent callback is a no-op.

use std::collections::BTreeMap;

use axum::http::{request::Parts, HeaderMap, HeaderName, HeaderValue};

/// Boxed error returned by callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Adjusts the dial headers before the backend connection is opened.
///
/// Runs after every built-in header rule, so anything set here wins.
pub trait Director: Send + Sync {
    fn adjust_headers(&self, incoming: &Parts, out: &mut HeaderMap);
}

/// Observes text and binary payloads travelling from the backend to the client.
pub trait Viewer: Send + Sync {
    fn handle_message(&self, payload: &[u8]) -> Result<(), BoxError>;
}

/// Notified by the application layer once a proxied session has ended.
pub trait ConnectionManager: Send + Sync {
    fn remove_connection(&self, unique_id: &str);
}

/// Director that inserts a fixed set of headers.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaderDirector {
    headers: HeaderMap,
}

impl StaticHeaderDirector {
    /// Build from name/value pairs; invalid names or values are skipped with a warning.
    pub fn from_pairs(pairs: &BTreeMap<String, String>) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Skipping invalid static header"),
            }
        }
        Self { headers }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl Director for StaticHeaderDirector {
    fn adjust_headers(&self, _incoming: &Parts, out: &mut HeaderMap) {
        for (name, value) in &self.headers {
            out.insert(name.clone(), value.clone());
        }
    }
}

/// Viewer that logs the size of every observed payload.
#[derive(Debug, Clone)]
pub struct LoggingViewer {
    proxy: String,
}

impl LoggingViewer {
    pub fn new(proxy: impl Into<String>) -> Self {
        Self { proxy: proxy.into() }
    }
}

impl Viewer for LoggingViewer {
    fn handle_message(&self, payload: &[u8]) -> Result<(), BoxError> {
        tracing::debug!(proxy = %self.proxy, bytes = payload.len(), "Backend message observed");
        Ok(())
    }
}
