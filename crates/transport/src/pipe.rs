//! An in-process, backpressured byte pipe used to hand data-channel
//! messages from the adapter's background read loop to its consumer,
//! mirroring the mux crate's pipe: a plain `tokio::io::duplex` only
//! ever signals plain EOF on close, which loses the distinction
//! between "peer closed cleanly" and "transport error" that
//! [`crate::error::TransportError`] needs to preserve.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::TransportError;

const PIPE_CAPACITY: usize = 8;

enum PipeItem {
    Data(Bytes),
    Closed(TransportError),
}

/// Producer half, held by the background read loop.
#[derive(Clone)]
pub(crate) struct PipeSink {
    tx: mpsc::Sender<PipeItem>,
    closed: Arc<AtomicBool>,
}

impl PipeSink {
    pub(crate) async fn send_data(&self, data: Bytes) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(PipeItem::Data(data)).await.is_ok()
    }

    /// Closes the pipe with `err`. Idempotent: only the first call
    /// takes effect.
    pub(crate) fn close(&self, err: TransportError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(PipeItem::Closed(err)).await;
        });
    }
}

/// Consumer half: an [`AsyncRead`] that surfaces the sentinel error
/// passed to [`PipeSink::close`] instead of a plain EOF.
pub struct PipeSource {
    rx: mpsc::Receiver<PipeItem>,
    pending: Bytes,
    terminal: Option<TransportError>,
}

impl AsyncRead for PipeSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if let Some(err) = this.terminal.clone() {
            return Poll::Ready(Err(err.into()));
        }

        loop {
            if !this.pending.is_empty() {
                let take = buf.remaining().min(this.pending.len());
                buf.put_slice(&this.pending[..take]);
                this.pending.advance(take);
                return Poll::Ready(Ok(()));
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(PipeItem::Data(bytes))) => {
                    this.pending = bytes;
                    continue;
                }
                Poll::Ready(Some(PipeItem::Closed(err))) => {
                    this.terminal = Some(err.clone());
                    return Poll::Ready(Err(err.into()));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

pub(crate) fn channel_pipe() -> (PipeSink, PipeSource) {
    let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
    let closed = Arc::new(AtomicBool::new(false));
    (
        PipeSink {
            tx,
            closed: closed.clone(),
        },
        PipeSource {
            rx,
            pending: Bytes::new(),
            terminal: None,
        },
    )
}
