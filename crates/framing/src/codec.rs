//! Reusable-buffer encoder and decoder for length-prefixed messages.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::varint;
use crate::{FramingError, Result, MAX_FRAME, REUSABLE};

/// Encodes messages onto an [`AsyncWrite`] transport, reusing an
/// internal buffer for messages up to [`REUSABLE`] bytes.
#[derive(Debug)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// Creates an encoder with a fresh reusable buffer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(REUSABLE),
        }
    }

    /// Encodes `message` and writes it to `writer` as a single varint
    /// length followed by exactly one contiguous payload write.
    pub async fn encode<W, T>(&mut self, writer: &mut W, message: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let size = bincode::serialized_size(message).map_err(FramingError::Deserialize)? as u64;
        if size > u64::from(MAX_FRAME) {
            return Err(FramingError::MessageTooLarge {
                announced: u32::try_from(size).unwrap_or(u32::MAX),
                max: MAX_FRAME,
            });
        }
        let size = size as u32;

        varint::write_length(writer, size).await?;

        if size as usize <= REUSABLE {
            self.buffer.clear();
            self.buffer.resize(size as usize, 0);
            bincode::serialize_into(&mut self.buffer[..], message)
                .map_err(FramingError::Deserialize)?;
            write_payload(writer, &self.buffer).await
        } else {
            let transient = bincode::serialize(message).map_err(FramingError::Deserialize)?;
            write_payload(writer, &transient).await
        }
    }
}

async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(payload)
        .await
        .map_err(FramingError::from)
}

/// Decodes messages from a buffered [`AsyncRead`] transport.
#[derive(Debug)]
pub struct Decoder {
    buffer: Vec<u8>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Creates a decoder with a fresh reusable buffer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(REUSABLE),
        }
    }

    /// Reads the next message from `reader`.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream encountered before
    /// any byte of the next frame's length prefix — this is the
    /// orderly-completion signal callers such as the RPC layer rely
    /// on to distinguish "peer closed the stream" from transport loss.
    pub async fn decode<R, T>(&mut self, reader: &mut R) -> Result<Option<T>>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let Some(length) = varint::read_length(reader, MAX_FRAME).await? else {
            return Ok(None);
        };

        let length = length as usize;
        let slice: &mut [u8] = if length <= REUSABLE {
            self.buffer.clear();
            self.buffer.resize(length, 0);
            &mut self.buffer[..]
        } else {
            self.buffer.clear();
            return self.decode_transient(reader, length).await;
        };

        reader
            .read_exact(slice)
            .await
            .map_err(FramingError::from)?;
        let message = bincode::deserialize(slice).map_err(FramingError::Deserialize)?;
        Ok(Some(message))
    }

    async fn decode_transient<R, T>(&mut self, reader: &mut R, length: usize) -> Result<Option<T>>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let mut transient = vec![0u8; length];
        reader
            .read_exact(&mut transient)
            .await
            .map_err(FramingError::from)?;
        let message = bincode::deserialize(&transient).map_err(FramingError::Deserialize)?;
        Ok(Some(message))
    }
}
