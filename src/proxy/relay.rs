//! Bidirectional frame relay.
//!
//! # Data Flow
//! ```text
//! client ──read──▶ [client-to-backend pump] ──write──▶ backend
//! client ◀─write── [backend-to-client pump] ◀──read── backend
//!                          │
//!                          └─▶ viewer
//! ```
//!
//! Each pump owns the read half of its source and shares the write half of
//! its destination. The orchestrating task waits for the first pump to
//! report, or for lifecycle cancellation, then tears the session down.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    tungstenite::{protocol::frame::coding::CloseCode, Message},
    WebSocketStream,
};

use crate::observability::metrics;
use crate::proxy::callbacks::Viewer;
use crate::proxy::conn::{close_frame, close_frame_for, read_next, Inbound, WsSource, WsWriter};
use crate::proxy::control::{PingBridge, CONTROL_DEADLINE};
use crate::proxy::error::RelayError;
use crate::proxy::lifecycle::{Lifecycle, StopSignal};
use crate::proxy::options::RelayMode;

/// Close reason sent to both peers when the proxy is closed on demand.
pub const CLOSING_MESSAGE: &str = "closed by proxy";

/// How long teardown waits for a pump to finish before aborting it.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    BackendToClient,
    ClientToBackend,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::BackendToClient => "backend_to_client",
            Direction::ClientToBackend => "client_to_backend",
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The backend-to-client pump stopped first.
    BackendToClient(RelayError),
    /// The client-to-backend pump stopped first.
    ClientToBackend(RelayError),
    /// The lifecycle was closed on demand.
    Cancelled,
}

impl RelayOutcome {
    pub fn error(&self) -> Option<&RelayError> {
        match self {
            RelayOutcome::BackendToClient(err) | RelayOutcome::ClientToBackend(err) => Some(err),
            RelayOutcome::Cancelled => None,
        }
    }

    fn log(&self, proxy_id: &str) {
        let (err, message) = match self {
            RelayOutcome::BackendToClient(err) => (err, "error copying backend to client"),
            RelayOutcome::ClientToBackend(err) => (err, "error copying client to backend"),
            RelayOutcome::Cancelled => {
                tracing::info!(proxy_id = %proxy_id, "Session closed by proxy");
                return;
            }
        };

        if err.is_expected_shutdown() {
            tracing::debug!(proxy_id = %proxy_id, close_code = ?err.close_code(), "Session closed by peer");
        } else {
            tracing::error!(proxy_id = %proxy_id, error = %err, "{}", message);
        }
    }
}

/// Relay frames between `client` and `backend` until one side stops or the
/// lifecycle is closed. Both connections are closed before returning, and the
/// lifecycle reports connected for exactly the duration of the call.
pub(crate) async fn relay<C, B>(
    client: WebSocketStream<C>,
    backend: WebSocketStream<B>,
    lifecycle: &Lifecycle,
    mode: RelayMode,
    viewer: Option<Arc<dyn Viewer>>,
) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connected = lifecycle.connect();
    metrics::record_session_started();

    let (client_sink, client_stream) = client.split();
    let (backend_sink, backend_stream) = backend.split();
    let client_writer = WsWriter::new(client_sink);
    let backend_writer = WsWriter::new(backend_sink);

    let (done_tx, done_rx) = watch::channel(false);
    let (client_errc, mut client_errors) = mpsc::channel(1);
    let (backend_errc, mut backend_errors) = mpsc::channel(1);

    let to_client = Pump {
        direction: Direction::BackendToClient,
        source: backend_stream.boxed(),
        dst: client_writer.clone(),
        forward: mode == RelayMode::FullDuplex,
        viewer,
        ping_bridge: None,
        stop: lifecycle.client_pump_stop(),
        done: done_rx.clone(),
        errc: client_errc,
    };
    let to_backend = Pump {
        direction: Direction::ClientToBackend,
        source: client_stream.boxed(),
        dst: backend_writer.clone(),
        forward: true,
        viewer: None,
        ping_bridge: Some(PingBridge::new(backend_writer.clone(), client_writer.clone())),
        stop: lifecycle.backend_pump_stop(),
        done: done_rx,
        errc: backend_errc,
    };

    let pumps = [tokio::spawn(to_client.run()), tokio::spawn(to_backend.run())];
    let mut cancelled = lifecycle.client_pump_stop();

    let outcome = tokio::select! {
        Some(err) = client_errors.recv() => RelayOutcome::BackendToClient(err),
        Some(err) = backend_errors.recv() => RelayOutcome::ClientToBackend(err),
        _ = cancelled.fired() => RelayOutcome::Cancelled,
    };
    outcome.log(lifecycle.unique_id());

    drop(connected);
    done_tx.send_replace(true);
    drain(pumps).await;

    client_writer.shutdown(CONTROL_DEADLINE).await;
    backend_writer.shutdown(CONTROL_DEADLINE).await;
    metrics::record_session_finished();

    outcome
}

async fn drain(pumps: [JoinHandle<()>; 2]) {
    for mut pump in pumps {
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut pump).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Relay pump failed"),
            Err(_) => {
                tracing::warn!("Relay pump did not stop in time, aborting");
                pump.abort();
            }
        }
    }
}

/// One direction of the relay.
struct Pump {
    direction: Direction,
    source: WsSource,
    dst: WsWriter,
    /// Whether data frames are written to `dst` or only observed.
    forward: bool,
    viewer: Option<Arc<dyn Viewer>>,
    ping_bridge: Option<PingBridge>,
    stop: StopSignal,
    done: watch::Receiver<bool>,
    errc: mpsc::Sender<RelayError>,
}

impl Pump {
    async fn run(mut self) {
        loop {
            let inbound = tokio::select! {
                biased;
                _ = self.stop.fired() => {
                    self.dst
                        .send_close(close_frame(CloseCode::Away, CLOSING_MESSAGE), CONTROL_DEADLINE)
                        .await;
                    return;
                }
                _ = session_done(&mut self.done) => return,
                inbound = read_next(&mut self.source) => inbound,
            };

            match inbound {
                Inbound::Data(message) => {
                    self.observe(&message);
                    if !self.forward {
                        continue;
                    }
                    if let Err(e) = self.dst.send(message).await {
                        self.report(RelayError::from(e));
                        return;
                    }
                    metrics::record_message(self.direction.as_str());
                }
                Inbound::Ping(data) => {
                    let Some(bridge) = &self.ping_bridge else {
                        continue;
                    };
                    if let Err(err) = bridge.on_client_ping(data).await {
                        self.fail(err).await;
                        return;
                    }
                }
                Inbound::Failed(err) => {
                    self.fail(err).await;
                    return;
                }
            }
        }
    }

    fn observe(&self, message: &Message) {
        let Some(viewer) = &self.viewer else {
            return;
        };
        let payload: &[u8] = match message {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => &data[..],
            _ => return,
        };
        if let Err(e) = viewer.handle_message(payload) {
            tracing::warn!(direction = self.direction.as_str(), error = %e, "Viewer rejected message");
        }
    }

    /// Propagate a read-side failure to the destination, then report it.
    async fn fail(&mut self, err: RelayError) {
        self.dst.send_close(close_frame_for(&err), CONTROL_DEADLINE).await;
        self.report(err);
    }

    fn report(&self, err: RelayError) {
        tracing::trace!(direction = self.direction.as_str(), error = %err, "Pump stopped");
        let _ = self.errc.try_send(err);
    }
}

async fn session_done(done: &mut watch::Receiver<bool>) {
    let _ = done.wait_for(|finished| *finished).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::callbacks::BoxError;
    use bytes::Bytes;
    use futures_util::SinkExt;
    use std::sync::Mutex;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf};
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};

    type Ws = WebSocketStream<DuplexStream>;

    /// Returns (server role, client role) ends of one in-memory connection.
    async fn ws_pair() -> (Ws, Ws) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    struct Harness {
        client: Ws,
        backend: Ws,
        lifecycle: Arc<Lifecycle>,
        session: JoinHandle<RelayOutcome>,
    }

    async fn start(mode: RelayMode, viewer: Option<Arc<dyn Viewer>>) -> Harness {
        let (proxy_client_side, client) = ws_pair().await;
        let (backend, proxy_backend_side) = ws_pair().await;
        let lifecycle = Arc::new(Lifecycle::new("relay-test"));

        let lc = lifecycle.clone();
        let session = tokio::spawn(async move {
            relay(proxy_client_side, proxy_backend_side, &lc, mode, viewer).await
        });

        Harness {
            client,
            backend,
            lifecycle,
            session,
        }
    }

    async fn next(ws: &mut Ws) -> Message {
        timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("valid frame")
    }

    async fn wait_connected(lifecycle: &Lifecycle) {
        for _ in 0..100 {
            if lifecycle.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("relay never reported connected");
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Vec<u8>>>);

    impl Viewer for Recorder {
        fn handle_message(&self, payload: &[u8]) -> Result<(), BoxError> {
            self.0.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    /// Backend transport that never yields data and fails every write.
    struct DeadBackend;

    impl AsyncRead for DeadBackend {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for DeadBackend {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "backend gone")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Rejecting;

    impl Viewer for Rejecting {
        fn handle_message(&self, _payload: &[u8]) -> Result<(), BoxError> {
            Err("viewer full".into())
        }
    }

    #[test]
    fn pump_future_is_send() {
        fn assert_send<T: Send>(_: T) {}
        let _check = |pump: Pump| assert_send(pump.run());
    }

    #[tokio::test]
    async fn full_duplex_forwards_both_ways_and_views_backend_frames() {
        let recorder = Arc::new(Recorder::default());
        let mut h = start(RelayMode::FullDuplex, Some(recorder.clone())).await;

        h.client.send(Message::text("hello kite".to_string())).await.unwrap();
        let at_backend = next(&mut h.backend).await;
        assert_eq!(at_backend, Message::text("hello kite".to_string()));

        h.backend.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
        let at_client = next(&mut h.client).await;
        assert_eq!(at_client, Message::binary(vec![1u8, 2, 3]));

        assert_eq!(recorder.0.lock().unwrap().clone(), vec![vec![1u8, 2, 3]]);
    }

    #[tokio::test]
    async fn half_duplex_only_observes_backend_frames() {
        let recorder = Arc::new(Recorder::default());
        let mut h = start(RelayMode::HalfDuplex, Some(recorder.clone())).await;

        h.client.send(Message::text("up".to_string())).await.unwrap();
        assert_eq!(next(&mut h.backend).await, Message::text("up".to_string()));

        h.backend.send(Message::text("down".to_string())).await.unwrap();
        let forwarded = timeout(Duration::from_millis(200), h.client.next()).await;
        assert!(forwarded.is_err(), "backend frame must not reach the client");
        assert_eq!(recorder.0.lock().unwrap().clone(), vec![b"down".to_vec()]);
    }

    #[tokio::test]
    async fn client_ping_is_bridged_and_answered() {
        let mut h = start(RelayMode::FullDuplex, None).await;

        h.client.send(Message::Ping(Bytes::from_static(b"hb"))).await.unwrap();
        assert_eq!(next(&mut h.backend).await, Message::Ping(Bytes::from_static(b"hb")));
        assert_eq!(next(&mut h.client).await, Message::Pong(Bytes::from_static(b"hb")));
    }

    #[tokio::test]
    async fn client_close_code_reaches_backend() {
        let mut h = start(RelayMode::FullDuplex, None).await;
        wait_connected(&h.lifecycle).await;

        let frame = CloseFrame {
            code: CloseCode::Library(4000),
            reason: "bye".to_string().into(),
        };
        h.client.send(Message::Close(Some(frame))).await.unwrap();

        match next(&mut h.backend).await {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Library(4000));
                assert_eq!(frame.reason.to_string(), "bye");
            }
            other => panic!("expected close, got {:?}", other),
        }

        let outcome = timeout(Duration::from_secs(10), h.session).await.unwrap().unwrap();
        match outcome {
            RelayOutcome::ClientToBackend(err) => {
                assert_eq!(err.close_code(), Some(4000));
                assert!(err.is_expected_shutdown());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!h.lifecycle.is_connected());
    }

    #[tokio::test]
    async fn backend_vanishing_is_reported_as_abnormal() {
        let Harness {
            mut client,
            backend,
            lifecycle,
            session,
        } = start(RelayMode::FullDuplex, None).await;
        wait_connected(&lifecycle).await;
        drop(backend);

        match next(&mut client).await {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert!(frame.reason.to_string().contains("unexpected EOF"));
            }
            other => panic!("expected close, got {:?}", other),
        }

        let outcome = timeout(Duration::from_secs(10), session).await.unwrap().unwrap();
        match outcome {
            RelayOutcome::BackendToClient(err) => assert!(!err.is_expected_shutdown()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn lifecycle_close_interrupts_blocked_reads() {
        let mut h = start(RelayMode::FullDuplex, None).await;
        wait_connected(&h.lifecycle).await;

        h.lifecycle.close();
        h.lifecycle.close();

        for peer in [&mut h.backend, &mut h.client] {
            match next(peer).await {
                Message::Close(Some(frame)) => {
                    assert_eq!(frame.code, CloseCode::Away);
                    assert_eq!(frame.reason.to_string(), CLOSING_MESSAGE);
                }
                other => panic!("expected close, got {:?}", other),
            }
        }

        let outcome = timeout(Duration::from_secs(10), h.session).await.unwrap().unwrap();
        assert!(matches!(outcome, RelayOutcome::Cancelled));
        assert!(!h.lifecycle.is_connected());
    }

    #[tokio::test]
    async fn failed_ping_forward_ends_client_pump() {
        let (proxy_client_side, mut client) = ws_pair().await;
        let backend = WebSocketStream::from_raw_socket(DeadBackend, Role::Client, None).await;
        let lifecycle = Arc::new(Lifecycle::new("relay-test"));

        let lc = lifecycle.clone();
        let session = tokio::spawn(async move {
            relay(proxy_client_side, backend, &lc, RelayMode::FullDuplex, None).await
        });
        wait_connected(&lifecycle).await;

        client.send(Message::Ping(Bytes::from_static(b"hb"))).await.unwrap();

        loop {
            match next(&mut client).await {
                Message::Pong(_) => continue,
                Message::Close(_) => break,
                other => panic!("expected close, got {:?}", other),
            }
        }

        let outcome = timeout(Duration::from_secs(10), session).await.unwrap().unwrap();
        match outcome {
            RelayOutcome::ClientToBackend(err) => assert!(!err.is_expected_shutdown()),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!lifecycle.is_connected());
    }

    #[tokio::test]
    async fn viewer_errors_do_not_end_the_session() {
        let mut h = start(RelayMode::FullDuplex, Some(Arc::new(Rejecting))).await;
        wait_connected(&h.lifecycle).await;

        for text in ["first", "second"] {
            h.backend.send(Message::text(text.to_string())).await.unwrap();
            assert_eq!(next(&mut h.client).await, Message::text(text.to_string()));
        }

        h.client.send(Message::text("still up".to_string())).await.unwrap();
        assert_eq!(next(&mut h.backend).await, Message::text("still up".to_string()));
        assert!(!h.session.is_finished());
        assert!(h.lifecycle.is_connected());
    }
}
