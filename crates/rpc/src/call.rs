//! A single RPC invocation: a method name followed by an exchange of
//! typed, error-wrapped messages until either side closes the stream.

use framing::{Decoder, Encoder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::envelope::Envelope;
use crate::{Result, RpcError};

/// One open RPC call: the reader/writer halves of its connection plus
/// the framing codecs used to exchange messages on it.
pub struct Call<R, W> {
    reader: R,
    writer: W,
    decoder: Decoder,
    encoder: Encoder,
}

impl<R, W> Call<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Opens a call on an already-established connection: writes the
    /// method name as a length-prefixed framed string before returning.
    pub async fn open(reader: R, mut writer: W, method: &str) -> Result<Self> {
        let mut encoder = Encoder::new();
        encoder
            .encode(&mut writer, &method.to_string())
            .await
            .map_err(RpcError::from)?;
        Ok(Self {
            reader,
            writer,
            decoder: Decoder::new(),
            encoder,
        })
    }

    /// Accepts an inbound call: decodes the method name frame and
    /// returns it alongside the call, ready for message exchange.
    ///
    /// Returns `Ok(None)` if the peer closed the connection before
    /// sending any method name (an orderly close, not an error).
    pub async fn accept(mut reader: R, writer: W) -> Result<Option<(String, Self)>> {
        let mut decoder = Decoder::new();
        let method: Option<String> = decoder.decode(&mut reader).await.map_err(RpcError::from)?;
        let Some(method) = method else {
            return Ok(None);
        };
        Ok(Some((
            method,
            Self {
                reader,
                writer,
                decoder,
                encoder: Encoder::new(),
            },
        )))
    }

    /// Sends a successful message.
    pub async fn send<T>(&mut self, message: &T) -> Result<()>
    where
        T: Serialize,
    {
        let envelope = Envelope::ok(message);
        self.encoder
            .encode(&mut self.writer, &envelope)
            .await
            .map_err(RpcError::from)
    }

    /// Sends an error in place of a payload; the peer's next
    /// [`Call::receive`] observes it as [`RpcError::RemoteError`].
    pub async fn send_error(&mut self, message: String) -> Result<()> {
        let envelope = Envelope::<()>::err(message);
        self.encoder
            .encode(&mut self.writer, &envelope)
            .await
            .map_err(RpcError::from)
    }

    /// Receives the next message.
    ///
    /// Returns `Ok(None)` on a clean close at a message boundary, the
    /// orderly-completion signal the prompter broker and higher-level
    /// callers rely on to distinguish "peer is done" from transport
    /// loss (see [`framing::Decoder::decode`]).
    pub async fn receive<T>(&mut self) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let envelope: Option<Envelope<T>> = self
            .decoder
            .decode(&mut self.reader)
            .await
            .map_err(RpcError::from)?;
        match envelope {
            Some(envelope) => envelope.into_result().map(Some),
            None => Ok(None),
        }
    }

    /// Splits the call back into its reader and writer, e.g. to hand
    /// the connection off once the method-dispatch preamble is done.
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}
