//! Handshake header translation.
//!
//! Two header sets are produced per session:
//! - dial headers, sent to the backend with the outbound handshake
//! - upgrade headers, merged into the 101 response returned to the client
//!
//! Natural-tunnel mode clones the client's headers minus the handshake and
//! hop-by-hop ones; restricted mode copies a short allow-list.

use std::net::SocketAddr;

use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue};

use crate::proxy::callbacks::Director;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers the WebSocket handshake regenerates on each hop.
const HANDSHAKE_HEADERS: [HeaderName; 5] = [
    header::CONNECTION,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::UPGRADE,
];

const HOP_BY_HOP_HEADERS: [HeaderName; 6] = [
    HeaderName::from_static("keep-alive"),
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::PROXY_AUTHORIZATION,
    header::PROXY_AUTHENTICATE,
];

/// Connection facts about the client that are not part of the request itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientContext {
    /// Immediate peer address, when known.
    pub remote_addr: Option<SocketAddr>,
    /// Whether TLS was terminated by this proxy.
    pub tls: bool,
}

/// Build the headers sent to the backend with the outbound dial.
pub fn dial_headers(
    incoming: &Parts,
    client: &ClientContext,
    natural_tunnel: bool,
    director: Option<&dyn Director>,
) -> HeaderMap {
    let mut out = if natural_tunnel {
        tunnel_headers(&incoming.headers)
    } else {
        restricted_dial_headers(incoming)
    };

    if let Some(addr) = client.remote_addr {
        let client_ip = addr.ip().to_string();
        let forwarded = forwarded_for(&incoming.headers, &client_ip);
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            out.insert(X_FORWARDED_FOR, value);
        }
    }

    let proto = if client.tls { "https" } else { "http" };
    out.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

    if let Some(director) = director {
        director.adjust_headers(incoming, &mut out);
    }

    out
}

/// Build the headers merged into the client's 101 response.
///
/// Restricted mode takes them from the backend's handshake response; natural
/// tunnel mode echoes the client's own headers.
pub fn upgrade_headers(incoming: &Parts, backend_response: &HeaderMap, natural_tunnel: bool) -> HeaderMap {
    if natural_tunnel {
        return tunnel_headers(&incoming.headers);
    }

    let mut out = HeaderMap::new();
    for name in [
        header::SEC_WEBSOCKET_PROTOCOL,
        header::SET_COOKIE,
        header::SEC_WEBSOCKET_ACCEPT,
    ] {
        if let Some(value) = backend_response.get(&name) {
            if !value.is_empty() {
                out.insert(name, value.clone());
            }
        }
    }
    out
}

/// Clone `source` without handshake and hop-by-hop headers.
pub fn tunnel_headers(source: &HeaderMap) -> HeaderMap {
    let mut out = source.clone();
    for name in HANDSHAKE_HEADERS.iter().chain(HOP_BY_HOP_HEADERS.iter()) {
        out.remove(name);
    }
    out
}

fn restricted_dial_headers(incoming: &Parts) -> HeaderMap {
    let source = &incoming.headers;
    let mut out = HeaderMap::new();

    for name in [header::USER_AGENT, header::ORIGIN] {
        if let Some(value) = source.get(&name) {
            if !value.is_empty() {
                out.append(name, value.clone());
            }
        }
    }
    for name in [header::SEC_WEBSOCKET_PROTOCOL, header::COOKIE] {
        for value in source.get_all(&name) {
            out.append(name.clone(), value.clone());
        }
    }

    let host = source
        .get(header::HOST)
        .cloned()
        .or_else(|| {
            incoming
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });
    if let Some(host) = host.filter(|h| !h.is_empty()) {
        out.insert(header::HOST, host);
    }

    out
}

/// Fold prior `X-Forwarded-For` values and the client IP into one list.
fn forwarded_for(source: &HeaderMap, client_ip: &str) -> String {
    let prior: Vec<String> = source
        .get_all(X_FORWARDED_FOR)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();

    if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    }
}
