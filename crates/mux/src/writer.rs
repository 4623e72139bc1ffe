//! Per-channel writers sharing one underlying transport, serialized
//! through a single mutex so a header and its payload are never
//! interleaved with another channel's block.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::header::MultiplexHeader;
use crate::MuxError;

/// A handle that writes framed blocks for one channel to a shared
/// underlying transport.
///
/// Exposes a concrete `write_all` rather than implementing
/// [`tokio::io::AsyncWrite`]: the header-then-payload write needs to
/// hold the shared lock across both steps, which a poll-based trait
/// impl cannot express without a hand-rolled state machine.
#[derive(Clone)]
pub struct ChannelWriter<W> {
    channel: u8,
    shared: Arc<Mutex<W>>,
}

impl<W> ChannelWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(channel: u8, shared: Arc<Mutex<W>>) -> Self {
        Self { channel, shared }
    }

    /// Channel index this writer addresses.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Writes `data` as a single block: header followed by payload,
    /// under one held lock so no other channel's block can interleave.
    pub async fn write_all(&self, data: &[u8]) -> Result<(), MuxError> {
        let header = MultiplexHeader {
            channel: self.channel,
            length: data.len() as u32,
        };
        let mut guard = self.shared.lock().await;
        header.encode(&mut *guard).await?;
        guard.write_all(data).await.map_err(MuxError::from)?;
        guard.flush().await.map_err(MuxError::from)
    }
}
