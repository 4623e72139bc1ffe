#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `transport` carries the two pieces of the remote-transport core
//! that sit directly on top of the peer-to-peer data channel: the
//! [`adapter`], which turns a message-oriented data channel into a
//! stream-oriented connection, and the [`heartbeat`], which runs a
//! bidirectional liveness check over an already-established
//! connection (typically one multiplexer channel carved out by the
//! `mux` crate).
//!
//! # Design
//!
//! [`adapter::DataChannelConnection`] is generic over
//! [`adapter::DataChannel`] so it can be driven by a real `webrtc`
//! data channel ([`webrtc_data_channel::PeerDataChannel`]) or by a
//! fake in tests. [`heartbeat::heartbeat`] is transport-agnostic: it
//! only needs an [`tokio::io::AsyncRead`] + [`tokio::io::AsyncWrite`]
//! connection, so it runs equally well over a multiplexer channel or
//! directly over the adapter.
//!
//! # Errors
//!
//! See [`TransportError`] for the full taxonomy.

pub mod adapter;
pub mod heartbeat;
pub mod webrtc_data_channel;

mod error;
mod pipe;

pub use error::TransportError;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TransportError>;
