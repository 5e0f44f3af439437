//! Client-side WebSocket upgrade.
//!
//! Validates the inbound handshake, builds the `101 Switching Protocols`
//! response and turns the upgraded HTTP connection into a WebSocket stream.

use axum::{
    body::Body,
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio_tungstenite::{
    tungstenite::{handshake::derive_accept_key, protocol::Role, protocol::WebSocketConfig},
    WebSocketStream,
};
use url::Url;

use crate::proxy::error::UpgradeError;
use crate::proxy::options::UpgraderConfig;

pub type ClientStream = WebSocketStream<TokioIo<Upgraded>>;

/// Headers the upgrader owns in the 101 response.
const RESERVED_RESPONSE_HEADERS: [header::HeaderName; 6] = [
    header::CONNECTION,
    header::UPGRADE,
    header::SEC_WEBSOCKET_ACCEPT,
    header::SEC_WEBSOCKET_PROTOCOL,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::CONTENT_LENGTH,
];

/// A validated client handshake.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    accept_key: String,
    offered_protocols: Vec<String>,
}

impl ClientHandshake {
    pub fn offered_protocols(&self) -> &[String] {
        &self.offered_protocols
    }
}

#[derive(Debug, Clone)]
pub struct Upgrader {
    config: UpgraderConfig,
}

impl Upgrader {
    pub fn new(config: UpgraderConfig) -> Self {
        Self { config }
    }

    /// Check that `parts` is a WebSocket upgrade this upgrader accepts.
    pub fn validate(&self, parts: &Parts) -> Result<ClientHandshake, UpgradeError> {
        let headers = &parts.headers;

        if !header_contains_token(headers, header::CONNECTION, "upgrade") {
            return Err(UpgradeError::MissingConnectionUpgrade);
        }
        if !header_contains_token(headers, header::UPGRADE, "websocket") {
            return Err(UpgradeError::MissingUpgradeWebsocket);
        }
        if parts.method != Method::GET {
            return Err(UpgradeError::MethodNotAllowed);
        }
        if !header_contains_token(headers, header::SEC_WEBSOCKET_VERSION, "13") {
            return Err(UpgradeError::UnsupportedVersion);
        }
        if !self.origin_allowed(headers) {
            return Err(UpgradeError::OriginNotAllowed);
        }

        let key = headers
            .get(header::SEC_WEBSOCKET_KEY)
            .map(|v| v.as_bytes())
            .filter(|v| !v.is_empty())
            .ok_or(UpgradeError::MissingKey)?;

        Ok(ClientHandshake {
            accept_key: derive_accept_key(key),
            offered_protocols: header_tokens(headers, header::SEC_WEBSOCKET_PROTOCOL),
        })
    }

    /// Take hyper's upgrade handle out of the request.
    pub fn take_upgrade(parts: &mut Parts) -> Result<OnUpgrade, UpgradeError> {
        parts
            .extensions
            .remove::<OnUpgrade>()
            .ok_or(UpgradeError::NotUpgradable)
    }

    /// Pick the subprotocol announced to the client.
    ///
    /// With configured subprotocols the first client offer found in the list
    /// wins; otherwise the backend's choice is echoed.
    pub fn select_protocol(
        &self,
        handshake: &ClientHandshake,
        backend_protocol: Option<&HeaderValue>,
    ) -> Option<HeaderValue> {
        if self.config.subprotocols.is_empty() {
            return backend_protocol.filter(|v| !v.is_empty()).cloned();
        }
        handshake
            .offered_protocols
            .iter()
            .find(|offered| self.config.subprotocols.contains(offered))
            .and_then(|p| HeaderValue::from_str(p).ok())
    }

    /// Build the 101 response, merging `extra` headers in.
    pub fn switching_protocols(
        &self,
        handshake: &ClientHandshake,
        protocol: Option<HeaderValue>,
        extra: &HeaderMap,
    ) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

        let headers = response.headers_mut();
        for (name, value) in extra {
            if RESERVED_RESPONSE_HEADERS.contains(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        if let Ok(accept) = HeaderValue::from_str(&handshake.accept_key) {
            headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
        }
        if let Some(protocol) = protocol {
            headers.insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);
        }
        response
    }

    /// Wait for hyper to hand over the connection after the 101 was sent.
    pub async fn accept(&self, on_upgrade: OnUpgrade) -> Result<ClientStream, UpgradeError> {
        let upgraded = on_upgrade.await?;
        Ok(WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, Some(self.ws_config())).await)
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.read_buffer_size = self.config.read_buffer_size;
        config.write_buffer_size = self.config.write_buffer_size;
        config
    }

    fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        let Some(origin) = headers.get(header::ORIGIN) else {
            return true;
        };
        let Ok(origin) = origin.to_str() else {
            return false;
        };

        if !self.config.allowed_origins.is_empty() {
            return self
                .config
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin));
        }

        // Same-origin: the origin's authority must match Host.
        let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) else {
            return false;
        };
        match Url::parse(origin) {
            Ok(url) => origin_authority(&url).is_some_and(|authority| authority.eq_ignore_ascii_case(host)),
            Err(_) => false,
        }
    }
}

fn origin_authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn header_tokens(headers: &HeaderMap, name: header::HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn header_contains_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    header_tokens(headers, name)
        .iter()
        .any(|t| t.eq_ignore_ascii_case(token))
}
