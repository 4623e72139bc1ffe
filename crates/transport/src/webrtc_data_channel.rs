//! [`crate::adapter::DataChannel`] implementation backed by a real
//! `webrtc` peer-connection data channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use webrtc::data_channel::RTCDataChannel;

use crate::adapter::{
    DataChannel, OnBufferedAmountLowHandler, OnCloseHandler, OnErrorHandler, OnMessageHandler,
    OnOpenHandler,
};
use crate::error::TransportError;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Wraps `Arc<RTCDataChannel>` so it implements [`DataChannel`].
pub struct PeerDataChannel(Arc<RTCDataChannel>);

impl PeerDataChannel {
    /// Wraps an already-opened (or about-to-open) WebRTC data
    /// channel.
    pub fn new(inner: Arc<RTCDataChannel>) -> Self {
        Self(inner)
    }
}

impl DataChannel for PeerDataChannel {
    fn on_open(&self, f: OnOpenHandler) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.0.on_open(Box::new(move || f())).await;
        })
    }

    fn on_close(&self, f: OnCloseHandler) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.0.on_close(Box::new(move || f())).await;
        })
    }

    fn on_error(&self, f: OnErrorHandler) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.0
                .on_error(Box::new(move |err| {
                    let f = &f;
                    f(err.to_string())
                }))
                .await;
        })
    }

    fn on_message(&self, f: OnMessageHandler) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.0
                .on_message(Box::new(move |message| {
                    f(message.data, message.is_string)
                }))
                .await;
        })
    }

    fn set_buffered_amount_low_threshold(&self, threshold: usize) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.0.set_buffered_amount_low_threshold(threshold).await;
        })
    }

    fn on_buffered_amount_low(&self, f: OnBufferedAmountLowHandler) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.0
                .on_buffered_amount_low(Box::new(move || f()))
                .await;
        })
    }

    fn send(&self, data: Bytes) -> BoxFuture<'_, Result<usize, TransportError>> {
        Box::pin(async move {
            self.0
                .send(&data)
                .await
                .map_err(|err| TransportError::DataChannel(err.to_string()))
        })
    }

    fn buffered_amount(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move { self.0.buffered_amount().await })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.0
                .close()
                .await
                .map_err(|err| TransportError::DataChannel(err.to_string()))
        })
    }
}
