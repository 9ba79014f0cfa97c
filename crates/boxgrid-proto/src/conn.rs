//! Reading and writing records on a stream, plus the shared write handle.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::message::{Message, RECORD_SIZE};
use crate::ProtoError;

/// Read exactly one record and decode it.
///
/// A clean end-of-stream and a short read both surface as
/// [`ProtoError::Closed`]; partial records are fatal to the connection.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut record = [0u8; RECORD_SIZE];
    reader.read_exact(&mut record).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtoError::Closed
        } else {
            ProtoError::Io(e)
        }
    })?;
    Message::decode(&record)
}

/// Write exactly one record.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.encode()).await?;
    Ok(())
}

/// Cloneable, serialized write handle for one connection.
///
/// Both sides of the protocol have two writers per connection (the session
/// handler and the container index on the coordinator; the heartbeat and
/// command loops on the worker) — the internal mutex keeps records whole.
#[derive(Clone)]
pub struct MessageSender {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl MessageSender {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Send one message; concurrent sends are serialized.
    pub async fn send(&self, msg: &Message) -> Result<(), ProtoError> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, msg).await
    }
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender").finish_non_exhaustive()
    }
}
