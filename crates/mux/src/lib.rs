//! Stream multiplexer.
//!
//! # Overview
//!
//! Splits one ordered, reliable byte stream into a fixed number of
//! independent duplex channels, each carrying its own sequence of
//! length-prefixed blocks. Used to run the RPC layer and a raw data
//! stream over a single tunnel connection without either interfering
//! with the other's framing.
//!
//! # Design
//!
//! A background read pump owns the underlying reader and decodes
//! [`header::MultiplexHeader`]s one at a time, forwarding each block's
//! payload to the pipe belonging to its channel. Writers share the
//! underlying writer behind a mutex so a header and its payload are
//! never split by a concurrent write from another channel.
//!
//! # Invariants
//!
//! - Channel indices are fixed at construction; a header naming an
//!   index outside that range tears down every channel.
//! - A clean EOF at a header boundary is an orderly close, reported to
//!   readers as [`MuxError::Closed`]; EOF inside a header or block is
//!   an I/O error.
//! - Header and payload for a given write are never interleaved with
//!   another channel's write.
//!
//! # Errors
//!
//! All channel reads and writes report [`MuxError`]; once any channel
//! observes a terminal error, every other channel observes the same
//! one on its next read.

mod error;
mod header;
mod pipe;
mod reader;
mod writer;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

pub use error::MuxError;
pub use header::MultiplexHeader;
pub use pipe::PipeSource as ChannelReader;
pub use writer::ChannelWriter;

use pipe::PipeSink;

/// One channel's read and write halves.
pub struct Channel<W> {
    /// Reader for blocks forwarded on this channel.
    pub reader: ChannelReader,
    /// Writer for blocks sent on this channel.
    pub writer: ChannelWriter<W>,
}

/// A handle to close a multiplexer's channel pipes explicitly, per
/// §4.2's `Reader`/`ReadWriter` operations. Closing does not touch the
/// underlying transport (the caller owns that); it only closes every
/// channel's pipe with [`MuxError::Closed`] so blocked readers unblock.
pub struct Closer {
    sinks: Vec<PipeSink>,
}

impl Closer {
    /// Closes every channel pipe with [`MuxError::Closed`]. Idempotent:
    /// calling it more than once, or after the read pump has already
    /// torn the pipes down on its own, has no further effect.
    pub fn close(&self) {
        for sink in &self.sinks {
            sink.close(MuxError::Closed);
        }
    }
}

/// Splits `src` into `num_channels` readers, spawning the background
/// read pump. Returns the readers in channel order plus a [`Closer`]
/// for tearing them down explicitly.
pub fn reader<R>(src: R, num_channels: u8) -> (Vec<ChannelReader>, Closer)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut sinks = Vec::with_capacity(num_channels as usize);
    let mut sources = Vec::with_capacity(num_channels as usize);
    for _ in 0..num_channels {
        let (sink, source) = pipe::channel_pipe();
        sinks.push(sink);
        sources.push(source);
    }

    let closer = Closer { sinks: sinks.clone() };
    tokio::spawn(reader::run(src, sinks));
    (sources, closer)
}

/// Splits `dst` into `num_channels` writers sharing the same
/// underlying transport.
pub fn writer<W>(dst: W, num_channels: u8) -> Vec<ChannelWriter<W>>
where
    W: AsyncWrite + Unpin,
{
    let shared = Arc::new(Mutex::new(dst));
    (0..num_channels)
        .map(|channel| ChannelWriter::new(channel, shared.clone()))
        .collect()
}

/// Splits a duplex transport into `num_channels` full-duplex
/// channels, using [`tokio::io::split`] to obtain independent read and
/// write halves of `transport`. Returns the channels plus a [`Closer`]
/// for tearing down the read side's pipes explicitly; per §4.2, this
/// does not close `transport` itself.
pub fn read_writer<T>(transport: T, num_channels: u8) -> (Vec<Channel<tokio::io::WriteHalf<T>>>, Closer)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(transport);
    let (readers, closer) = reader(read_half, num_channels);
    let writers = writer(write_half, num_channels);

    let channels = readers
        .into_iter()
        .zip(writers)
        .map(|(reader, writer)| Channel { reader, writer })
        .collect();
    (channels, closer)
}
