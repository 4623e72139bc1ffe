//! Bridges a message-oriented peer-to-peer data channel to a
//! stream-oriented connection.
//!
//! A data channel delivers whole messages (up to ~65,535 bytes) and
//! drops a message if the receiver doesn't hand it a large enough
//! buffer; it also requires writers to back off once too much data is
//! queued. [`DataChannelConnection`] hides both constraints behind an
//! [`tokio::io::AsyncRead`] + `write_all` interface that tolerates
//! arbitrary caller buffer sizes and blocks writers transparently.
//!
//! The adapter is generic over [`DataChannel`] so it can be driven by
//! a real `webrtc` data channel in production and by an in-process
//! fake in tests, per the "traits at the seams" the rest of this
//! workspace follows.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::pipe::{self, PipeSink, PipeSource};

/// Maximum size of a single data-channel message.
pub const MAX_MESSAGE_SIZE: usize = 65_535;

/// Write buffering watermark: writes block until the data channel's
/// buffered amount falls to or below this many bytes.
pub const MAX_WRITE_BUFFER: usize = 1024 * 1024;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback invoked once, the first time the data channel opens.
pub type OnOpenHandler = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;
/// Callback invoked once, the first time the data channel closes.
pub type OnCloseHandler = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;
/// Callback invoked on a data-channel error.
pub type OnErrorHandler = Box<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync + 'static>;
/// Callback invoked for every received message: payload and whether
/// it was sent as a text frame.
pub type OnMessageHandler = Box<dyn Fn(Bytes, bool) -> BoxFuture<'static, ()> + Send + Sync + 'static>;
/// Callback invoked when buffered data drops to or below the
/// configured low-watermark threshold.
pub type OnBufferedAmountLowHandler = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// A message-oriented peer-to-peer data channel, abstracted so the
/// adapter can be exercised without a live `webrtc` peer connection.
pub trait DataChannel: Send + Sync + 'static {
    /// Registers the open callback.
    fn on_open(&self, f: OnOpenHandler) -> BoxFuture<'_, ()>;
    /// Registers the close callback.
    fn on_close(&self, f: OnCloseHandler) -> BoxFuture<'_, ()>;
    /// Registers the error callback.
    fn on_error(&self, f: OnErrorHandler) -> BoxFuture<'_, ()>;
    /// Registers the message callback.
    fn on_message(&self, f: OnMessageHandler) -> BoxFuture<'_, ()>;
    /// Sets the low-watermark threshold used by
    /// [`DataChannel::on_buffered_amount_low`].
    fn set_buffered_amount_low_threshold(&self, threshold: usize) -> BoxFuture<'_, ()>;
    /// Registers the low-watermark callback.
    fn on_buffered_amount_low(&self, f: OnBufferedAmountLowHandler) -> BoxFuture<'_, ()>;
    /// Sends one binary message. Must reject messages above
    /// [`MAX_MESSAGE_SIZE`] by construction of the caller (the adapter
    /// chunks before calling this).
    fn send(&self, data: Bytes) -> BoxFuture<'_, Result<usize, TransportError>>;
    /// Returns the number of bytes currently queued to be sent.
    fn buffered_amount(&self) -> BoxFuture<'_, usize>;
    /// Closes the underlying data channel.
    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Opening,
    Open,
    ErrorOpen,
    Closed,
}

struct Shared {
    state: Mutex<State>,
    write_ready: Notify,
}

/// The write side of a [`DataChannelConnection`]: chunking, watermark
/// waiting, and close, shared verbatim between the unsplit connection
/// and [`DataChannelWriteHalf`].
///
/// Holds the read-side [`PipeSink`] too (despite the name): per §4.3,
/// `Close()` must unblock a blocked reader itself rather than wait for
/// the data channel to get around to firing `on_close`.
struct WriteState<D: DataChannel> {
    data_channel: Arc<D>,
    shared: Arc<Shared>,
    sink: PipeSink,
}

impl<D: DataChannel> WriteState<D> {
    async fn write_all(&self, mut data: &[u8]) -> Result<(), TransportError> {
        while !data.is_empty() {
            self.wait_for_write_room().await?;
            let take = data.len().min(MAX_MESSAGE_SIZE);
            let chunk = Bytes::copy_from_slice(&data[..take]);
            self.data_channel.send(chunk).await?;
            data = &data[take..];
        }
        Ok(())
    }

    async fn wait_for_write_room(&self) -> Result<(), TransportError> {
        loop {
            self.ensure_open()?;
            let notified = self.shared.write_ready.notified();
            if self.data_channel.buffered_amount().await <= MAX_WRITE_BUFFER {
                return Ok(());
            }
            notified.await;
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if *self.shared.state.lock().unwrap() == State::Closed {
            return Err(TransportError::DataChannelClosed);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let was_already_closed = {
            let mut state = self.shared.state.lock().unwrap();
            let was_closed = *state == State::Closed;
            *state = State::Closed;
            was_closed
        };
        self.sink.close(TransportError::DataChannelClosed);
        self.shared.write_ready.notify_waiters();
        if was_already_closed {
            return Ok(());
        }
        self.data_channel.close().await
    }
}

/// A stream-oriented connection adapting a [`DataChannel`].
///
/// Implements [`AsyncRead`]; writes go through [`Self::write_all`]
/// rather than [`tokio::io::AsyncWrite`], matching the `mux` crate's
/// `ChannelWriter`: the chunk-then-wait-for-watermark write needs to
/// await across steps in a way a poll-based trait impl cannot express
/// without a hand-rolled state machine.
///
/// Callers that need to drive a read loop and a write loop
/// concurrently (for example splicing a subprocess's stdio to the
/// connection) should use [`Self::split`] rather than sharing this
/// type behind a lock: [`DataChannelReadHalf`] owns the pipe outright
/// and [`DataChannelWriteHalf`] is cheaply `Clone`.
pub struct DataChannelConnection<D: DataChannel> {
    reader: PipeSource,
    write: WriteState<D>,
}

impl<D: DataChannel> DataChannelConnection<D> {
    /// Wraps `data_channel`, registering callbacks that drive the
    /// connection's state machine and forward received messages into
    /// the read pipe.
    pub async fn new(data_channel: Arc<D>) -> Self {
        let (sink, reader) = pipe::channel_pipe();
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Initial),
            write_ready: Notify::new(),
        });

        data_channel
            .set_buffered_amount_low_threshold(MAX_WRITE_BUFFER)
            .await;

        {
            let shared = shared.clone();
            data_channel
                .on_buffered_amount_low(Box::new(move || {
                    let shared = shared.clone();
                    Box::pin(async move {
                        shared.write_ready.notify_waiters();
                    })
                }))
                .await;
        }

        {
            let shared = shared.clone();
            data_channel
                .on_open(Box::new(move || {
                    Box::pin(async move {
                        let mut state = shared.state.lock().unwrap();
                        if *state == State::Initial || *state == State::Opening {
                            *state = State::Open;
                        }
                    })
                }))
                .await;
        }

        {
            let shared = shared.clone();
            let sink = sink.clone();
            data_channel
                .on_close(Box::new(move || {
                    Box::pin(async move {
                        transition_to_closed(&shared, &sink, TransportError::DataChannelClosed);
                    })
                }))
                .await;
        }

        {
            let shared = shared.clone();
            let sink = sink.clone();
            data_channel
                .on_error(Box::new(move |message| {
                    let shared = shared.clone();
                    let sink = sink.clone();
                    Box::pin(async move {
                        {
                            let mut state = shared.state.lock().unwrap();
                            if *state != State::Closed {
                                *state = State::ErrorOpen;
                            }
                        }
                        transition_to_closed(
                            &shared,
                            &sink,
                            TransportError::DataChannel(message),
                        );
                    })
                }))
                .await;
        }

        {
            let shared = shared.clone();
            let sink = sink.clone();
            data_channel
                .on_message(Box::new(move |data, is_string| {
                    let shared = shared.clone();
                    let sink = sink.clone();
                    Box::pin(async move {
                        if is_string {
                            transition_to_closed(&shared, &sink, TransportError::TextDataReceived);
                            return;
                        }
                        sink.send_data(data).await;
                    })
                }))
                .await;
        }

        {
            let mut state = shared.state.lock().unwrap();
            *state = State::Opening;
        }

        Self {
            reader,
            write: WriteState { data_channel, shared, sink },
        }
    }

    /// Writes `data`, chunking into pieces of at most
    /// [`MAX_MESSAGE_SIZE`] bytes and blocking each chunk until the
    /// data channel's buffered amount is at or below
    /// [`MAX_WRITE_BUFFER`].
    pub async fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        self.write.write_all(data).await
    }

    async fn wait_for_write_room(&self) -> Result<(), TransportError> {
        self.write.wait_for_write_room().await
    }

    /// Deadlines are not supported by this connection.
    pub fn set_deadline(&self, _deadline: Option<Instant>) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Closes the connection. Idempotent: unblocks any pending read or
    /// write exactly once and closes the underlying data channel at
    /// most once.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.write.close().await
    }

    /// Splits into an owned read half and a cheaply-`Clone`able write
    /// half that can be driven concurrently, e.g. from two halves of a
    /// `tokio::select!` splice loop.
    #[must_use]
    pub fn split(self) -> (DataChannelReadHalf, DataChannelWriteHalf<D>) {
        (
            DataChannelReadHalf { reader: self.reader },
            DataChannelWriteHalf { write: Arc::new(self.write) },
        )
    }
}

/// The read half of a [`DataChannelConnection`] produced by
/// [`DataChannelConnection::split`]. Implements [`AsyncRead`]; the
/// underlying pipe closes itself (propagating the connection's error)
/// once the peer side closes or errors.
pub struct DataChannelReadHalf {
    reader: PipeSource,
}

impl AsyncRead for DataChannelReadHalf {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_read(cx, buf)
    }
}

/// The write half of a [`DataChannelConnection`] produced by
/// [`DataChannelConnection::split`]. Cheap to clone: every clone shares
/// the same underlying data channel and backpressure state.
pub struct DataChannelWriteHalf<D: DataChannel> {
    write: Arc<WriteState<D>>,
}

impl<D: DataChannel> Clone for DataChannelWriteHalf<D> {
    fn clone(&self) -> Self {
        Self { write: self.write.clone() }
    }
}

impl<D: DataChannel> DataChannelWriteHalf<D> {
    /// Writes `data`; see [`DataChannelConnection::write_all`].
    pub async fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        self.write.write_all(data).await
    }

    /// Closes the connection; see [`DataChannelConnection::close`].
    pub async fn close(&self) -> Result<(), TransportError> {
        self.write.close().await
    }
}

fn transition_to_closed(shared: &Shared, sink: &PipeSink, cause: TransportError) {
    {
        let mut state = shared.state.lock().unwrap();
        if *state == State::Closed {
            return;
        }
        *state = State::Closed;
    }
    sink.close(cause);
    shared.write_ready.notify_waiters();
}

impl<D: DataChannel> AsyncRead for DataChannelConnection<D> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct FakeInner {
        on_message: Option<OnMessageHandler>,
        on_open: Option<OnOpenHandler>,
        on_close: Option<OnCloseHandler>,
        on_error: Option<OnErrorHandler>,
        on_low: Option<OnBufferedAmountLowHandler>,
        buffered: usize,
        sent: Vec<Bytes>,
        closed: bool,
    }

    #[derive(Default)]
    struct FakeDataChannel {
        inner: StdMutex<FakeInner>,
    }

    impl FakeDataChannel {
        async fn emit_open(&self) {
            let handler = self.inner.lock().unwrap().on_open.take();
            if let Some(handler) = handler {
                handler().await;
            }
        }

        async fn emit_message(&self, data: Bytes, is_string: bool) {
            // `on_message` stays registered for every subsequent
            // message, unlike the once-only open/close callbacks, so
            // the handler is called without being taken out of the
            // slot; the borrow is dropped before awaiting the future.
            let fut = {
                let guard = self.inner.lock().unwrap();
                let Some(handler) = guard.on_message.as_ref() else {
                    return;
                };
                handler(data, is_string)
            };
            fut.await;
        }

        fn set_buffered(&self, amount: usize) {
            self.inner.lock().unwrap().buffered = amount;
        }

        async fn emit_low(&self) {
            let fut = {
                let guard = self.inner.lock().unwrap();
                guard.on_low.as_ref().map(|h| h())
            };
            if let Some(fut) = fut {
                fut.await;
            }
        }
    }

    impl DataChannel for FakeDataChannel {
        fn on_open(&self, f: OnOpenHandler) -> BoxFuture<'_, ()> {
            self.inner.lock().unwrap().on_open = Some(f);
            Box::pin(async {})
        }

        fn on_close(&self, f: OnCloseHandler) -> BoxFuture<'_, ()> {
            self.inner.lock().unwrap().on_close = Some(f);
            Box::pin(async {})
        }

        fn on_error(&self, f: OnErrorHandler) -> BoxFuture<'_, ()> {
            self.inner.lock().unwrap().on_error = Some(f);
            Box::pin(async {})
        }

        fn on_message(&self, f: OnMessageHandler) -> BoxFuture<'_, ()> {
            self.inner.lock().unwrap().on_message = Some(f);
            Box::pin(async {})
        }

        fn set_buffered_amount_low_threshold(&self, _threshold: usize) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }

        fn on_buffered_amount_low(&self, f: OnBufferedAmountLowHandler) -> BoxFuture<'_, ()> {
            self.inner.lock().unwrap().on_low = Some(f);
            Box::pin(async {})
        }

        fn send(&self, data: Bytes) -> BoxFuture<'_, Result<usize, TransportError>> {
            let len = data.len();
            self.inner.lock().unwrap().sent.push(data);
            Box::pin(async move { Ok(len) })
        }

        fn buffered_amount(&self) -> BoxFuture<'_, usize> {
            let amount = self.inner.lock().unwrap().buffered;
            Box::pin(async move { amount })
        }

        fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
            self.inner.lock().unwrap().closed = true;
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn forwards_binary_messages_to_reader() {
        let data_channel = Arc::new(FakeDataChannel::default());
        let mut conn = DataChannelConnection::new(data_channel.clone()).await;
        data_channel.emit_open().await;
        data_channel
            .emit_message(Bytes::from_static(b"hello"), false)
            .await;

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn text_message_closes_connection_with_protocol_error() {
        let data_channel = Arc::new(FakeDataChannel::default());
        let mut conn = DataChannelConnection::new(data_channel.clone()).await;
        data_channel.emit_open().await;
        data_channel
            .emit_message(Bytes::from_static(b"not binary"), true)
            .await;

        let mut buf = [0u8; 16];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("text-framed"));
    }

    #[tokio::test]
    async fn write_chunks_large_payloads_at_message_boundary() {
        let data_channel = Arc::new(FakeDataChannel::default());
        let conn = DataChannelConnection::new(data_channel.clone()).await;
        data_channel.emit_open().await;

        let payload = vec![0xab; MAX_MESSAGE_SIZE + 10];
        conn.write_all(&payload).await.unwrap();

        let sent = data_channel.inner.lock().unwrap().sent.clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].len(), MAX_MESSAGE_SIZE);
        assert_eq!(sent[1].len(), 10);
    }

    #[tokio::test]
    async fn write_blocks_until_buffered_amount_drops_to_watermark() {
        let data_channel = Arc::new(FakeDataChannel::default());
        let conn = DataChannelConnection::new(data_channel.clone()).await;
        data_channel.emit_open().await;
        data_channel.set_buffered(MAX_WRITE_BUFFER + 1);

        let wait = conn.wait_for_write_room();
        tokio::pin!(wait);
        assert!(futures_poll_pending(&mut wait));

        data_channel.set_buffered(0);
        data_channel.emit_low().await;
        wait.await.unwrap();
    }

    fn futures_poll_pending<F: Future>(fut: &mut Pin<&mut F>) -> bool {
        use std::task::{RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        matches!(fut.as_mut().poll(&mut cx), Poll::Pending)
    }

    #[tokio::test]
    async fn close_is_idempotent_and_unblocks_reader() {
        let data_channel = Arc::new(FakeDataChannel::default());
        let mut conn = DataChannelConnection::new(data_channel.clone()).await;
        data_channel.emit_open().await;

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(data_channel.inner.lock().unwrap().closed);

        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("data channel closed"));
    }

    #[tokio::test]
    async fn set_deadline_is_unsupported() {
        let data_channel = Arc::new(FakeDataChannel::default());
        let conn = DataChannelConnection::new(data_channel.clone()).await;
        assert!(matches!(
            conn.set_deadline(None),
            Err(TransportError::Unsupported)
        ));
    }
}
