//! Registry of live proxy sessions.
//!
//! Every accepted upgrade gets its own [`WebsocketProxy`] instance, registered
//! here under its identifier until the HTTP layer reports the session over
//! through [`ConnectionManager::remove_connection`].

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;

use crate::proxy::{ConnectionManager, WebsocketProxy};

struct Entry {
    proxy: Weak<WebsocketProxy>,
    route: String,
    remote_addr: Option<SocketAddr>,
    started_at: u64,
}

/// Snapshot of one registered session.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub route: String,
    pub remote_addr: Option<SocketAddr>,
    pub connected: bool,
    /// Unix timestamp in seconds.
    pub started_at: u64,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<String, Entry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, proxy: &Arc<WebsocketProxy>, route: &str, remote_addr: Option<SocketAddr>) {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        self.sessions.insert(
            proxy.unique_id().to_string(),
            Entry {
                proxy: Arc::downgrade(proxy),
                route: route.to_string(),
                remote_addr,
                started_at,
            },
        );
        tracing::debug!(proxy_id = %proxy.unique_id(), route = %route, "Session registered");
    }

    pub fn get(&self, id: &str) -> Option<Arc<WebsocketProxy>> {
        self.sessions.get(id).and_then(|entry| entry.proxy.upgrade())
    }

    /// Close the session with identifier `id`. Returns `false` if unknown.
    pub fn close(&self, id: &str) -> bool {
        match self.get(id) {
            Some(proxy) => {
                proxy.close();
                true
            }
            None => false,
        }
    }

    /// Close every registered session; returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let proxies: Vec<Arc<WebsocketProxy>> = self
            .sessions
            .iter()
            .filter_map(|entry| entry.proxy.upgrade())
            .collect();

        proxies.iter().filter(|proxy| proxy.close()).count()
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> = self
            .sessions
            .iter()
            .map(|entry| ConnectionInfo {
                id: entry.key().clone(),
                route: entry.route.clone(),
                remote_addr: entry.remote_addr,
                connected: entry.proxy.upgrade().is_some_and(|p| p.is_connected()),
                started_at: entry.started_at,
            })
            .collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions currently relaying frames.
    pub fn active(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.proxy.upgrade().is_some_and(|p| p.is_connected()))
            .count()
    }
}

impl ConnectionManager for ConnectionRegistry {
    fn remove_connection(&self, unique_id: &str) {
        if self.sessions.remove(unique_id).is_some() {
            tracing::debug!(proxy_id = %unique_id, "Session removed");
        }
    }
}
