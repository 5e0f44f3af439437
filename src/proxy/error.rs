//! Error types of the proxy core.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tokio_tungstenite::tungstenite::{
    error::ProtocolError,
    protocol::frame::coding::CloseCode,
    Error as WsError,
};

/// Close code reported when the peer closed with an empty close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Failure while resolving the backend target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("backend resolver is not defined")]
    NoResolver,
    #[error("backend URL is empty")]
    NoUrl,
}

impl ResolveError {
    pub fn code(&self) -> u8 {
        match self {
            ResolveError::NoResolver => 1,
            ResolveError::NoUrl => 2,
        }
    }
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("internal server error (code: {})", self.code()),
        )
            .into_response()
    }
}

/// HTTP response the backend sent instead of completing the handshake.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl IntoResponse for BackendResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body.unwrap_or_default()));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        // Framing is recomputed from the body we actually hold.
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONNECTION);
        response
    }
}

/// Failure while dialing the backend.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("backend rejected the handshake with status {}", .0.status)]
    Rejected(BackendResponse),
    #[error("couldn't dial to remote backend: {0}")]
    Unavailable(#[source] WsError),
    #[error("backend handshake timed out after {0:?}")]
    Timeout(Duration),
}

impl IntoResponse for DialError {
    fn into_response(self) -> Response {
        match self {
            DialError::Rejected(response) => response.into_response(),
            DialError::Unavailable(_) | DialError::Timeout(_) => service_unavailable(),
        }
    }
}

/// Failure while upgrading the client connection.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("websocket: the client is not using the websocket protocol: 'upgrade' token not found in 'Connection' header")]
    MissingConnectionUpgrade,
    #[error("websocket: the client is not using the websocket protocol: 'websocket' token not found in 'Upgrade' header")]
    MissingUpgradeWebsocket,
    #[error("websocket: the client is not using the websocket protocol: request method is not GET")]
    MethodNotAllowed,
    #[error("websocket: unsupported version: 13 not found in 'Sec-Websocket-Version' header")]
    UnsupportedVersion,
    #[error("websocket: not a websocket handshake: 'Sec-WebSocket-Key' header is missing or blank")]
    MissingKey,
    #[error("websocket: request origin not allowed")]
    OriginNotAllowed,
    #[error("websocket: connection does not support upgrades")]
    NotUpgradable,
    #[error("websocket: upgrade failed: {0}")]
    Upgrade(#[from] hyper::Error),
}

impl UpgradeError {
    pub fn status(&self) -> StatusCode {
        match self {
            UpgradeError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            UpgradeError::OriginNotAllowed => StatusCode::FORBIDDEN,
            UpgradeError::NotUpgradable | UpgradeError::Upgrade(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, self.to_string()).into_response();
        if matches!(self, UpgradeError::UnsupportedVersion) {
            response
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        }
        response
    }
}

/// Why a relay pump stopped.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The peer closed, or the connection dropped and is reported as an abnormal close.
    #[error("websocket: close {code}: {reason}")]
    Close { code: u16, reason: String },
    #[error("control frame write timed out")]
    ControlTimeout,
    #[error(transparent)]
    Transport(#[from] WsError),
}

impl RelayError {
    pub(crate) fn abnormal(reason: impl Into<String>) -> Self {
        RelayError::Close {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
        }
    }

    /// Map a read failure from the connection to its close typing.
    pub(crate) fn from_read(err: WsError) -> Self {
        match err {
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                RelayError::abnormal("unexpected EOF")
            }
            WsError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                RelayError::abnormal("unexpected EOF")
            }
            WsError::ConnectionClosed | WsError::AlreadyClosed => RelayError::abnormal("connection closed"),
            other => RelayError::Transport(other),
        }
    }

    /// Peer-initiated closes are part of normal shutdown; abnormal closes and
    /// transport failures are not.
    pub fn is_expected_shutdown(&self) -> bool {
        matches!(self, RelayError::Close { code, .. } if *code != CLOSE_ABNORMAL)
    }

    pub fn close_code(&self) -> Option<u16> {
        match self {
            RelayError::Close { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Whether a close code may be put on the wire.
pub(crate) fn is_sendable_close_code(code: u16) -> bool {
    CloseCode::from(code).is_allowed()
}

pub(crate) fn service_unavailable() -> Response {
    let status = StatusCode::SERVICE_UNAVAILABLE;
    (status, status.canonical_reason().unwrap_or("Service Unavailable")).into_response()
}
