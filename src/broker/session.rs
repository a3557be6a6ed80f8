//! Per-connection session state.
//!
//! The read loop owns the read half of the stream; any task may write
//! through [`Session::send`], which serializes frames under the writer lock.
//! Status is monotone: once a session disconnects it never reconnects, and
//! the compare-and-swap in [`Session::close`] makes teardown idempotent.

use crate::broker::dispatch::{self, Message};
use crate::broker::pool::{panic_message, WorkerPool};
use crate::broker::registry::ClientRegistry;
use crate::protocol::{self, ControlPacket, PacketError};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const STATUS_CONNECTED: u8 = 1;
const STATUS_DISCONNECTED: u8 = 2;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection lost")]
    ConnectionLost,
    #[error("write packet: {0}")]
    Write(#[from] PacketError),
}

pub struct Session {
    id: String,
    /// Sessions flagged publish-only are never a fan-out destination.
    publish_only: bool,
    status: AtomicU8,
    writer: Mutex<Option<OwnedWriteHalf>>,
    cancel: CancellationToken,
    registry: ClientRegistry,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        publish_only: bool,
        writer: OwnedWriteHalf,
        registry: ClientRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            publish_only,
            status: AtomicU8::new(STATUS_CONNECTED),
            writer: Mutex::new(Some(writer)),
            cancel: CancellationToken::new(),
            registry,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_publish_only(&self) -> bool {
        self.publish_only
    }

    pub fn is_connected(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_CONNECTED
    }

    pub(crate) fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Write one control packet, serialized against other writers.
    ///
    /// Sending on a disconnected session is a successful no-op. A panic out
    /// of the codec is recovered and also surfaces as a no-op so a broken
    /// write can never take down the worker processing this client.
    pub async fn send(&self, packet: &ControlPacket) -> Result<(), SendError> {
        if !self.is_connected() {
            return Ok(());
        }
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            drop(guard);
            self.close().await;
            return Err(SendError::ConnectionLost);
        };
        match AssertUnwindSafe(protocol::write_packet(writer, packet))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(SendError::Write(err)),
            Err(panic) => {
                tracing::error!(
                    client_id = %self.id,
                    "recovered codec panic during send: {}",
                    panic_message(panic.as_ref())
                );
                Ok(())
            }
        }
    }

    /// Tear the session down. Safe to call from any task, any number of
    /// times; only the status CAS winner performs the side effects.
    pub async fn close(&self) {
        if self
            .status
            .compare_exchange(
                STATUS_CONNECTED,
                STATUS_DISCONNECTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        self.cancel.cancel();
        // Dropping the write half shuts the stream down; the read loop exits
        // through the cancellation token or the resulting read error.
        self.writer.lock().await.take();
        self.registry.remove(self);
    }
}

/// Read loop for one session. Decoded packets are queued on the client's
/// worker slot; a read failure queues a synthetic DISCONNECT on that same
/// slot so teardown runs after every packet that arrived before it.
pub(crate) async fn read_loop(session: Arc<Session>, mut reader: OwnedReadHalf, pool: WorkerPool) {
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => return,
            read = protocol::read_packet(&mut reader) => {
                match read {
                    Ok(packet) => {
                        let msg = Message::new(session.clone(), packet);
                        pool.submit(session.id(), dispatch::process_message(msg)).await;
                    }
                    Err(err) => {
                        tracing::error!(client_id = %session.id, "read packet error: {err}");
                        let msg = Message::new(session.clone(), ControlPacket::Disconnect);
                        pool.submit(session.id(), dispatch::process_message(msg)).await;
                        return;
                    }
                }
            }
        }
    }
}
