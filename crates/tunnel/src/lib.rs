#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `tunnel` establishes and hosts a peer-to-peer tunnel session: the
//! offer/answer handshake against a rendezvous service
//! ([`rendezvous`], [`signature`]), peer-connection lifecycle and
//! per-data-channel dispatch ([`session`]), the handshake exchanged on
//! each new data channel before an agent subprocess is launched
//! ([`initialize`]), and locating/launching that subprocess
//! ([`agent`]).
//!
//! # Design
//!
//! [`session::host_tunnel`] is generic over
//! [`session::PeerConnectionFactory`] and [`rendezvous::RendezvousExchange`]
//! so the establishment loop, state-transition handling, and
//! per-channel dispatch are exercisable without a live ICE/DTLS/SCTP
//! stack or rendezvous HTTP endpoint; [`webrtc_peer_connection`]
//! supplies the production implementation backed by the `webrtc`
//! crate, and [`rendezvous::RendezvousClient`] the production HTTP
//! client.
//!
//! [`dial::connect_tunnel`] is the controller-side counterpart to
//! [`session::host_tunnel`]: it negotiates the same offer/answer
//! handshake (via the shared [`session::establish`] helper) but then
//! actively opens data channels on demand instead of waiting for them.
//!
//! # Errors
//!
//! Every fallible operation returns [`Result`], whose error type
//! [`TunnelError`] classifies into [`Severity`] per the host-side
//! establishment failure taxonomy.

pub mod agent;
pub mod dial;
pub mod initialize;
pub mod rendezvous;
pub mod session;
pub mod signature;
pub mod webrtc_peer_connection;

mod error;

pub use error::{Result, Severity, TunnelError};
