#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `framing` turns an ordered byte stream into a sequence of discrete,
//! length-prefixed messages. It is the lowest layer of the Mutagen
//! remote-transport core: the multiplexer's headers, the RPC layer's
//! method calls and replies, the heartbeat message, and the tunnel
//! session's initialize request/response all ride on top of it.
//!
//! # Design
//!
//! A frame is `(length, payload)`, where `length` is encoded as an
//! unsigned LEB128 varint ([`varint`]) and `payload` is `length` raw
//! bytes. [`Encoder`] and [`Decoder`] ([`codec`]) reuse an internal
//! buffer of [`REUSABLE`] bytes for messages at or below that size,
//! falling back to a one-off allocation for larger messages, up to
//! [`MAX_FRAME`].
//!
//! # Invariants
//!
//! - `Decode(Encode(m)) == m` for any message `m` with
//!   `size(m) <= MAX_FRAME`.
//! - `Encode` of a message larger than `MAX_FRAME` fails with
//!   [`FramingError::MessageTooLarge`] and writes nothing.
//! - `Decode` of a length prefix larger than `MAX_FRAME` fails with
//!   [`FramingError::MessageTooLarge`] without attempting to read the
//!   announced payload.
//! - A clean end-of-stream encountered before any byte of the next
//!   frame's length prefix decodes as `Ok(None)`; any other
//!   end-of-stream is [`FramingError::UnexpectedEof`].
//!
//! # Errors
//!
//! See [`FramingError`] for the full taxonomy ([`FramingError::MessageTooLarge`],
//! [`FramingError::ShortWrite`], [`FramingError::Io`],
//! [`FramingError::Deserialize`]).

pub mod codec;
pub mod varint;

mod error;

pub use codec::{Decoder, Encoder};
pub use error::FramingError;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, FramingError>;

/// Maximum payload size of a single frame: 25 MiB.
pub const MAX_FRAME: u32 = 25 * 1024 * 1024;

/// Size of the reusable encode/decode buffer: 100 KiB. Messages at or
/// below this size avoid a per-call allocation.
pub const REUSABLE: usize = 100 * 1024;
