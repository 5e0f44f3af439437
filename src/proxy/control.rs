//! Control-frame bridge.
//!
//! Pings from the client are forwarded to the backend and answered with a
//! pong carrying the same application data. Pings from the backend are left
//! to the library's automatic pong.

use std::io::ErrorKind;
use std::time::Duration;

use bytes::Bytes;
use tokio_tungstenite::tungstenite::{error::ProtocolError, Error as WsError, Message};

use crate::proxy::conn::WsWriter;
use crate::proxy::error::RelayError;

/// Deadline for every control frame write.
pub(crate) const CONTROL_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub(crate) struct PingBridge {
    backend: WsWriter,
    client: WsWriter,
}

impl PingBridge {
    pub(crate) fn new(backend: WsWriter, client: WsWriter) -> Self {
        Self { backend, client }
    }

    /// Handle a ping received from the client.
    ///
    /// A failed forward is returned as an error and ends the client pump. A
    /// failed pong is ignored when the close frame is already out or the
    /// failure is transient.
    pub(crate) async fn on_client_ping(&self, data: Bytes) -> Result<(), RelayError> {
        self.backend
            .send_within(Message::Ping(data.clone()), CONTROL_DEADLINE)
            .await?;

        match self.client.send_within(Message::Pong(data), CONTROL_DEADLINE).await {
            Ok(()) => Ok(()),
            Err(e) if is_ignorable_pong_failure(&e) => {
                tracing::trace!(error = %e, "Pong to client skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn is_ignorable_pong_failure(err: &RelayError) -> bool {
    match err {
        RelayError::ControlTimeout => true,
        RelayError::Transport(WsError::AlreadyClosed)
        | RelayError::Transport(WsError::ConnectionClosed)
        | RelayError::Transport(WsError::Protocol(ProtocolError::SendAfterClosing)) => true,
        RelayError::Transport(WsError::Io(e)) => matches!(
            e.kind(),
            ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
        ),
        _ => false,
    }
}
