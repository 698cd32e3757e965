//! Transport contract consumed by the broadcast coordinator.
//!
//! A transport adapter owns the actual socket. For every session it hands
//! the coordinator a [`ClientSink`], which accepts serialized frames without
//! ever blocking; the adapter drains them into the socket at its own pace.
//! When the coordinator gives up on a session it calls [`ClientSink::close`],
//! and the adapter must tear the socket down even if a write is stuck.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::ConnectionId;

/// A serialized outbound message, shared by every recipient of a broadcast.
pub type Frame = Arc<str>;

/// Why a frame could not be handed to a connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,

    #[error("connection closed")]
    Closed,
}

/// Outbound half of one client session.
pub trait ClientSink: Send + Sync {
    /// Queue a frame for delivery without waiting.
    fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError>;

    /// Total frames dropped over the lifetime of this sink.
    fn drop_count(&self) -> u64;

    /// Ask the transport to end the session.
    fn close(&self);
}

/// Bounded-queue sink backed by a tokio channel.
pub struct ClientConnection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    dropped: AtomicU64,
    closed: CancellationToken,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            tx,
            dropped: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Token cancelled once the coordinator closes this connection.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Create a connection together with the receiving end of its queue.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }
}

impl ClientSink for ClientConnection {
    fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
