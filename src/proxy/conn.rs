//! Connection halves used by the relay.
//!
//! A WebSocket connection is split into a read half, owned by exactly one
//! pump, and a write half behind a mutex, shared by the pump that feeds this
//! connection and the control-frame bridge.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream::BoxStream, Sink, SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Error as WsError, Message,
};

use crate::proxy::error::{is_sendable_close_code, RelayError, CLOSE_NO_STATUS};

/// Longest close reason that fits a control frame (125 bytes minus the code).
const MAX_CLOSE_REASON: usize = 123;

pub(crate) type WsSource = BoxStream<'static, Result<Message, WsError>>;
type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Serialized write half of a WebSocket connection.
#[derive(Clone)]
pub(crate) struct WsWriter {
    inner: Arc<Mutex<WsSink>>,
}

impl WsWriter {
    pub(crate) fn new<S>(sink: S) -> Self
    where
        S: Sink<Message, Error = WsError> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::pin(sink))),
        }
    }

    pub(crate) async fn send(&self, message: Message) -> Result<(), WsError> {
        let mut sink = self.inner.lock().await;
        sink.send(message).await
    }

    /// Send with a deadline covering both the lock and the write.
    pub(crate) async fn send_within(&self, message: Message, deadline: Duration) -> Result<(), RelayError> {
        match tokio::time::timeout(deadline, self.send(message)).await {
            Ok(result) => result.map_err(RelayError::from),
            Err(_) => Err(RelayError::ControlTimeout),
        }
    }

    pub(crate) async fn send_close(&self, frame: CloseFrame, deadline: Duration) {
        if let Err(e) = self.send_within(Message::Close(Some(frame)), deadline).await {
            tracing::trace!(error = %e, "Close frame not delivered");
        }
    }

    /// Flush and close the underlying connection.
    pub(crate) async fn shutdown(&self, deadline: Duration) {
        let mut sink = self.inner.lock().await;
        match tokio::time::timeout(deadline, sink.close()).await {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed)) | Ok(Err(WsError::AlreadyClosed)) => {}
            Ok(Err(e)) => tracing::trace!(error = %e, "Connection close failed"),
            Err(_) => tracing::trace!("Connection close timed out"),
        }
    }
}

/// One inbound event as the relay sees it.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Text or binary frame.
    Data(Message),
    Ping(Bytes),
    /// The read side is finished; carries the close typing of the failure.
    Failed(RelayError),
}

/// Read the next frame that matters to the relay. Pongs are dropped.
///
/// Cancel safe: dropping the future between frames loses nothing but pongs.
pub(crate) async fn read_next(source: &mut WsSource) -> Inbound {
    loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Inbound::Failed(RelayError::from_read(e)),
            None => return Inbound::Failed(RelayError::abnormal("unexpected EOF")),
        };

        match message {
            Message::Text(_) | Message::Binary(_) => return Inbound::Data(message),
            Message::Ping(data) => return Inbound::Ping(data),
            Message::Close(Some(frame)) => {
                return Inbound::Failed(RelayError::Close {
                    code: u16::from(frame.code),
                    reason: frame.reason.to_string(),
                })
            }
            Message::Close(None) => {
                return Inbound::Failed(RelayError::Close {
                    code: CLOSE_NO_STATUS,
                    reason: String::new(),
                })
            }
            Message::Pong(_) | Message::Frame(_) => continue,
        }
    }
}

/// Close frame to hand to the other peer after a read failure.
///
/// The peer's own code and reason are reused when they can be sent on the
/// wire; otherwise a normal closure carries the error text.
pub(crate) fn close_frame_for(err: &RelayError) -> CloseFrame {
    match err {
        RelayError::Close { code, reason } if *code != CLOSE_NO_STATUS && is_sendable_close_code(*code) => {
            close_frame(CloseCode::from(*code), reason)
        }
        other => close_frame(CloseCode::Normal, &other.to_string()),
    }
}

pub(crate) fn close_frame(code: CloseCode, reason: &str) -> CloseFrame {
    CloseFrame {
        code,
        reason: truncate_reason(reason).to_string().into(),
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
