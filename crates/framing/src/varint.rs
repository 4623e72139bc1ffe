//! Unsigned LEB128 varint encoding for frame length prefixes.
//!
//! Lengths are bounded by [`crate::MAX_FRAME`] (25 MiB by default),
//! which always fits in 5 varint bytes, so callers can size a fixed
//! prefix buffer without a fallible length computation.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{FramingError, Result};

/// Maximum number of bytes a varint-encoded `u32` can occupy.
pub const MAX_VARINT_LEN: usize = 5;

/// Encodes `value` into `out`, returning the number of bytes written.
/// `out` must have room for [`MAX_VARINT_LEN`] bytes.
pub fn encode(mut value: u32, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out[i] = byte;
            i += 1;
            return i;
        }
        out[i] = byte | 0x80;
        i += 1;
    }
}

/// Reads a varint-encoded length from `reader`.
///
/// Returns `Ok(None)` if the stream ended before any byte of the
/// length prefix was read (a natural end-of-stream). Any other EOF,
/// or a decoded value exceeding `max`, is an error.
pub async fn read_length<R>(reader: &mut R, max: u32) -> Result<Option<u32>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut value: u32 = 0;
    let mut shift: u32 = 0;
    let mut first = true;
    loop {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && first => {
                return Ok(None);
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(FramingError::UnexpectedEof);
            }
            Err(e) => return Err(FramingError::Io(e)),
        };
        first = false;
        let payload = u32::from(byte & 0x7f);
        if shift >= 32 || (shift == 28 && payload > 0x0f) {
            return Err(FramingError::MessageTooLarge {
                announced: u32::MAX,
                max,
            });
        }
        value |= payload << shift;
        if byte & 0x80 == 0 {
            if value > max {
                return Err(FramingError::MessageTooLarge {
                    announced: value,
                    max,
                });
            }
            return Ok(Some(value));
        }
        shift += 7;
    }
}

/// Writes a varint-encoded `value` to `writer` in a single contiguous
/// write.
pub async fn write_length<W>(writer: &mut W, value: u32) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode(value, &mut buf);
    writer
        .write_all(&buf[..len])
        .await
        .map_err(FramingError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_small_and_large_values() {
        for value in [0u32, 1, 127, 128, 16384, 25 * 1024 * 1024] {
            let mut buf = Vec::new();
            write_length(&mut buf, value).await.unwrap();
            let mut cursor = Cursor::new(buf);
            let decoded = read_length(&mut cursor, u32::MAX).await.unwrap();
            assert_eq!(decoded, Some(value));
        }
    }

    #[tokio::test]
    async fn clean_eof_before_any_byte() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let result = read_length(&mut cursor, u32::MAX).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn eof_mid_length_is_unexpected() {
        // A continuation byte (high bit set) with nothing following.
        let mut cursor = Cursor::new(vec![0x80]);
        let err = read_length(&mut cursor, u32::MAX).await.unwrap_err();
        assert!(matches!(err, FramingError::UnexpectedEof));
    }

    #[tokio::test]
    async fn rejects_length_above_max() {
        let mut buf = Vec::new();
        write_length(&mut buf, 1000).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let err = read_length(&mut cursor, 500).await.unwrap_err();
        assert!(matches!(err, FramingError::MessageTooLarge { .. }));
    }
}
