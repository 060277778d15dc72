//! Per-connection outbound queue and writer task.
//!
//! Producers push [`OutboundFrame`]s into a bounded channel. A single writer
//! task owns the socket sink and serializes frames in order. A full queue
//! makes `send` wait and `try_send` drop. Once the writer is gone, sends
//! are no-ops.

use crate::events::OutboundFrame;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Frames buffered per connection before producers wait.
pub const OUTBOUND_BUFFER: usize = 32;

/// Cloneable handle to one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundFrame>,
}

impl OutboundSender {
    /// New queue with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a frame, waiting for room. Returns `false` if the connection
    /// has gone away.
    pub async fn send(&self, frame: impl Into<OutboundFrame>) -> bool {
        self.tx.send(frame.into()).await.is_ok()
    }

    /// Queue a frame only if there is room right now. A full or closed
    /// queue drops the frame and returns `false`.
    pub fn try_send(&self, frame: impl Into<OutboundFrame>) -> bool {
        match self.tx.try_send(frame.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task for `sink`.
pub fn spawn_writer<S>(mut sink: S, rx: mpsc::Receiver<OutboundFrame>) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::fmt::Display,
{
    tokio::spawn(async move {
        write_frames(&mut sink, rx).await;
        let _ = sink.close().await;
    })
}

/// Drain `rx` into `sink` until the queue closes or a write fails.
pub async fn write_frames<S>(sink: &mut S, mut rx: mpsc::Receiver<OutboundFrame>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize outbound frame");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            tracing::debug!(error = %e, "WebSocket send failed, client disconnected");
            break;
        }
    }
    rx.close();
}
