//! Per-instance lifecycle: identifier, connected state and the two
//! cancellation signals that stop the relay pumps.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::watch;

/// Lifecycle state shared by every session that runs through one proxy instance.
///
/// `connected` is derived from a count of live sessions, so concurrent
/// sessions through the same instance cannot clobber each other.
#[derive(Debug)]
pub struct Lifecycle {
    unique_id: String,
    /// Stops the pump that writes to the client (backend-to-client).
    stop_client_pump: watch::Sender<bool>,
    /// Stops the pump that writes to the backend (client-to-backend).
    stop_backend_pump: watch::Sender<bool>,
    closed: AtomicBool,
    active_sessions: AtomicUsize,
}

impl Lifecycle {
    pub fn new(unique_id: impl Into<String>) -> Self {
        let (stop_client_pump, _) = watch::channel(false);
        let (stop_backend_pump, _) = watch::channel(false);
        Self {
            unique_id: unique_id.into(),
            stop_client_pump,
            stop_backend_pump,
            closed: AtomicBool::new(false),
            active_sessions: AtomicUsize::new(0),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Fire both cancellation signals.
    ///
    /// Only the first call has an effect; it returns `true`. Later calls return `false`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(proxy_id = %self.unique_id, "Proxy already closed");
            return false;
        }
        self.stop_backend_pump.send_replace(true);
        self.stop_client_pump.send_replace(true);
        tracing::info!(proxy_id = %self.unique_id, "Proxy closed on demand");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.active_sessions.load(Ordering::SeqCst) > 0
    }

    /// Mark a session as connected until the returned guard is dropped.
    pub(crate) fn connect(&self) -> ConnectedGuard<'_> {
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        ConnectedGuard { lifecycle: self }
    }

    pub(crate) fn client_pump_stop(&self) -> StopSignal {
        StopSignal(self.stop_client_pump.subscribe())
    }

    pub(crate) fn backend_pump_stop(&self) -> StopSignal {
        StopSignal(self.stop_backend_pump.subscribe())
    }
}

/// Keeps the owning lifecycle connected while alive.
#[derive(Debug)]
pub(crate) struct ConnectedGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for ConnectedGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One-shot cancellation observed by a pump.
#[derive(Debug, Clone)]
pub(crate) struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Resolves once the signal has fired, including when it fired before this call.
    pub(crate) async fn fired(&mut self) {
        if self.0.wait_for(|stopped| *stopped).await.is_err() {
            // Sender gone without firing: never resolve.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn close_is_idempotent() {
        let lifecycle = Lifecycle::new("proxy-1");
        assert!(!lifecycle.is_closed());
        assert!(lifecycle.close());
        assert!(!lifecycle.close());
        assert!(lifecycle.is_closed());
    }

    #[test]
    fn connected_tracks_live_sessions() {
        let lifecycle = Lifecycle::new("proxy-1");
        assert!(!lifecycle.is_connected());

        let first = lifecycle.connect();
        let second = lifecycle.connect();
        assert!(lifecycle.is_connected());

        drop(first);
        assert!(lifecycle.is_connected());
        drop(second);
        assert!(!lifecycle.is_connected());
    }

    #[tokio::test]
    async fn stop_signal_observes_earlier_close() {
        let lifecycle = Lifecycle::new("proxy-1");
        let mut before = lifecycle.backend_pump_stop();
        lifecycle.close();
        let mut after = lifecycle.client_pump_stop();

        tokio::time::timeout(Duration::from_secs(1), before.fired())
            .await
            .expect("signal subscribed before close fires");
        tokio::time::timeout(Duration::from_secs(1), after.fired())
            .await
            .expect("signal subscribed after close fires");
    }

    #[tokio::test]
    async fn stop_signal_pending_while_open() {
        let lifecycle = Lifecycle::new("proxy-1");
        let mut signal = lifecycle.client_pump_stop();
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.fired()).await;
        assert!(waited.is_err());
    }
}
