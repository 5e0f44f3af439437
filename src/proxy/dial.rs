//! Outbound dial to the backend.

use std::time::Duration;

use axum::http::{header, HeaderMap};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest, handshake::client::Request, protocol::WebSocketConfig, Error as WsError,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::proxy::error::{BackendResponse, DialError};
use crate::proxy::options::DialerConfig;

pub type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A completed backend handshake.
pub struct DialedBackend {
    pub stream: BackendStream,
    /// Headers of the backend's 101 response.
    pub response_headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct Dialer {
    config: DialerConfig,
}

impl Dialer {
    pub fn new(config: DialerConfig) -> Self {
        Self { config }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.config.handshake_timeout_secs)
    }

    /// Open a WebSocket connection to `url`, sending `headers` with the handshake.
    pub async fn dial(&self, url: &Url, headers: &HeaderMap) -> Result<DialedBackend, DialError> {
        let request = build_request(url, headers).map_err(DialError::Unavailable)?;
        let timeout = self.handshake_timeout();

        let connect = connect_async_with_config(request, Some(self.ws_config()), self.config.disable_nagle);
        let (stream, response) = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(WsError::Http(response))) => {
                return Err(DialError::Rejected(BackendResponse {
                    status: response.status(),
                    headers: response.headers().clone(),
                    body: response.body().clone(),
                }))
            }
            Ok(Err(e)) => return Err(DialError::Unavailable(e)),
            Err(_) => return Err(DialError::Timeout(timeout)),
        };

        tracing::debug!(backend = %url, status = %response.status(), "Backend handshake complete");
        Ok(DialedBackend {
            stream,
            response_headers: response.headers().clone(),
        })
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = self.config.max_message_size;
        config.max_frame_size = self.config.max_frame_size;
        config
    }
}

/// Handshake request for `url` carrying `headers`.
///
/// Values in `headers` replace the library's defaults of the same name;
/// multi-valued headers keep every value.
pub(crate) fn build_request(url: &Url, headers: &HeaderMap) -> Result<Request, WsError> {
    let mut request = url.as_str().into_client_request()?;
    let out = request.headers_mut();

    for name in headers.keys() {
        out.remove(name);
    }
    for (name, value) in headers {
        if name == header::HOST {
            out.insert(header::HOST, value.clone());
        } else {
            out.append(name.clone(), value.clone());
        }
    }
    Ok(request)
}
