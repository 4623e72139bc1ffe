//! The read pump: a background task that decodes headers from one
//! underlying stream and fans payload bytes out to per-channel pipes.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::header::MultiplexHeader;
use crate::pipe::PipeSink;
use crate::MuxError;

/// Chunk size used when copying a block's payload into its channel
/// pipe. Bounds how much of one block we hold in memory at a time.
const COPY_BUFFER: usize = 32 * 1024;

/// Runs the read pump until the underlying stream closes cleanly, an
/// invalid channel is named, or an I/O error occurs. In every case,
/// every sink is closed exactly once with the terminal cause before
/// this function returns.
pub(crate) async fn run<R>(mut reader: R, sinks: Vec<PipeSink>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let header = match MultiplexHeader::decode(&mut reader).await {
            Ok(Some(header)) => header,
            Ok(None) => {
                close_all(&sinks, MuxError::Closed);
                return;
            }
            Err(err) => {
                close_all(&sinks, err);
                return;
            }
        };

        let Some(sink) = sinks.get(header.channel as usize) else {
            close_all(
                &sinks,
                MuxError::InvalidChannel {
                    channel: header.channel,
                    num_channels: sinks.len() as u8,
                },
            );
            return;
        };

        if let Err(err) = forward_block(&mut reader, sink, header.length).await {
            close_all(&sinks, err);
            return;
        }
    }
}

/// Copies exactly `length` bytes from `reader` into `sink`, in chunks
/// of at most [`COPY_BUFFER`]. If the destination channel's reader has
/// already gone away, the bytes are read (to stay in sync with the
/// stream) and silently dropped rather than aborting the whole pump.
async fn forward_block<R>(reader: &mut R, sink: &PipeSink, length: u32) -> Result<(), MuxError>
where
    R: AsyncRead + Unpin,
{
    let mut remaining = length as usize;
    let mut buf = vec![0u8; remaining.min(COPY_BUFFER)];

    while remaining > 0 {
        let want = remaining.min(buf.len());
        let read = reader.read(&mut buf[..want]).await?;
        if read == 0 {
            return Err(MuxError::ShortTransfer {
                expected: length,
                got: (length as usize - remaining) as u32,
            });
        }
        sink.send_data(Bytes::copy_from_slice(&buf[..read])).await;
        remaining -= read;
    }

    Ok(())
}

fn close_all(sinks: &[PipeSink], err: MuxError) {
    for sink in sinks {
        sink.close(err.clone());
    }
}
