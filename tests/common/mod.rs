//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    handshake::server::{ErrorResponse, Request, Response},
    protocol::CloseFrame,
    Message,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use websocket_proxy::config::RouteConfig;
use websocket_proxy::proxy::RelayMode;
use websocket_proxy::{ConnectionRegistry, HttpServer, ProxyConfig, Shutdown};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subprotocol the echo backend agrees to.
pub const SUPPORTED_PROTOCOL: &str = "test-protocol";

/// One handshake request as the backend saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub uri: String,
    pub headers: HeaderMap,
}

pub struct EchoBackend {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    closes: mpsc::UnboundedReceiver<Option<CloseFrame>>,
}

impl EchoBackend {
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> SeenRequest {
        self.requests().pop().expect("backend saw a handshake")
    }

    /// Next close frame received by the backend.
    pub async fn next_close(&mut self) -> Option<CloseFrame> {
        tokio::time::timeout(Duration::from_secs(5), self.closes.recv())
            .await
            .expect("backend received a close frame in time")
            .expect("backend still running")
    }
}

/// Start a WebSocket backend that echoes text and binary frames.
///
/// It accepts the `test-protocol` subprotocol when offered and records every
/// handshake request and close frame it receives.
pub async fn start_echo_backend() -> EchoBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (close_tx, closes) = mpsc::unbounded_channel();

    let recorder = seen.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let recorder = recorder.clone();
            let close_tx = close_tx.clone();
            tokio::spawn(async move {
                let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                    recorder.lock().unwrap().push(SeenRequest {
                        uri: req.uri().to_string(),
                        headers: req.headers().clone(),
                    });
                    let offered = req
                        .headers()
                        .get_all("sec-websocket-protocol")
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .flat_map(|v| v.split(','))
                        .any(|p| p.trim() == SUPPORTED_PROTOCOL);
                    if offered {
                        resp.headers_mut()
                            .insert("sec-websocket-protocol", SUPPORTED_PROTOCOL.parse().unwrap());
                    }
                    resp.headers_mut()
                        .append("set-cookie", "backend=1".parse().unwrap());
                    Ok(resp)
                };

                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(socket, callback).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Text(_) | Message::Binary(_) => {
                            if ws.send(message).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(frame) => {
                            let _ = close_tx.send(frame);
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    EchoBackend { addr, seen, closes }
}

/// Start a backend that refuses every handshake with `401` and body `denied`.
pub async fn start_rejecting_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let callback = |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
                    let mut denied = ErrorResponse::new(Some("denied".to_string()));
                    *denied.status_mut() = axum::http::StatusCode::UNAUTHORIZED;
                    denied
                        .headers_mut()
                        .insert("www-authenticate", "Bearer".parse().unwrap());
                    Err(denied)
                };
                let _ = tokio_tungstenite::accept_hdr_async(socket, callback).await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn route(name: &str, path: &str, backend: SocketAddr) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        path: path.to_string(),
        backend_url: Url::parse(&format!("ws://{}/", backend)).unwrap(),
        natural_tunnel: false,
        relay_mode: RelayMode::FullDuplex,
        preserve_base_path: false,
        log_messages: false,
        set_headers: BTreeMap::new(),
        upgrader: Default::default(),
        dialer: Default::default(),
    }
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub shutdown: Shutdown,
    pub server: JoinHandle<Result<(), std::io::Error>>,
}

impl TestProxy {
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait until every session has unregistered.
    pub async fn wait_drained(&self) {
        for _ in 0..200 {
            if self.registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{} sessions still registered", self.registry.len());
    }

    /// Wait until `count` sessions are relaying.
    pub async fn wait_active(&self, count: usize) {
        for _ in 0..200 {
            if self.registry.active() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("expected {} active sessions, found {}", count, self.registry.active());
    }
}

/// Start the proxy on an ephemeral port serving `routes`.
pub async fn start_proxy(routes: Vec<RouteConfig>) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = ProxyConfig::default();
    config.listener.bind_address = addr.to_string();
    config.proxies = routes;

    let server = HttpServer::new(config);
    let registry = server.registry();
    let shutdown = Shutdown::new();
    let server = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestProxy {
        addr,
        registry,
        shutdown,
        server,
    }
}

/// Next frame from `ws`, failing the test after five seconds.
pub async fn next_message(ws: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("message within deadline")
        .expect("stream still open")
        .expect("valid frame")
}
