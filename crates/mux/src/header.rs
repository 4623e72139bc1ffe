//! The multiplex header: one byte of channel index, four bytes of
//! big-endian payload length, preceding the payload itself.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MuxError;

/// A decoded `(channel, length)` pair preceding one forwarded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexHeader {
    /// Channel this block belongs to.
    pub channel: u8,
    /// Number of payload bytes following the header.
    pub length: u32,
}

impl MultiplexHeader {
    /// Size in bytes of the encoded header.
    pub const ENCODED_LEN: usize = 5;

    /// Reads a header from `reader`.
    ///
    /// Returns `Ok(None)` if the stream ended cleanly before the
    /// channel byte was read (a natural multiplexer shutdown); any
    /// other EOF is [`MuxError::Io`].
    pub async fn decode<R>(reader: &mut R) -> Result<Option<Self>, MuxError>
    where
        R: AsyncRead + Unpin,
    {
        let mut channel_byte = [0u8; 1];
        match reader.read_exact(&mut channel_byte).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut length_bytes = [0u8; 4];
        reader.read_exact(&mut length_bytes).await?;

        Ok(Some(Self {
            channel: channel_byte[0],
            length: u32::from_be_bytes(length_bytes),
        }))
    }

    /// Writes this header to `writer` as a single contiguous write.
    pub async fn encode<W>(&self, writer: &mut W) -> Result<(), MuxError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0] = self.channel;
        buf[1..].copy_from_slice(&self.length.to_be_bytes());
        writer.write_all(&buf).await.map_err(MuxError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips() {
        let header = MultiplexHeader {
            channel: 3,
            length: 65536,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf).await.unwrap();
        assert_eq!(buf.len(), MultiplexHeader::ENCODED_LEN);

        let mut cursor = Cursor::new(buf);
        let decoded = MultiplexHeader::decode(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, header);
    }

    #[tokio::test]
    async fn clean_eof_before_channel_byte() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let decoded = MultiplexHeader::decode(&mut cursor).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn eof_mid_header_is_an_error() {
        let mut cursor = Cursor::new(vec![7u8]);
        let err = MultiplexHeader::decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, MuxError::Io(_)));
    }
}
