#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `manager` is the top of the remote-transport core: a thread-safe
//! registry from tunnel identifier to a live [`controller::Controller`]
//! supervising that tunnel's peer connection, backed by one-file-per-
//! tunnel persistence ([`store::Store`]) and a condition-variable-style
//! change index ([`tracker::Tracker`]) that lets `List` block until
//! something actually changed instead of polling.
//!
//! # Design
//!
//! [`Manager`] is generic over [`tunnel::session::PeerConnectionFactory`]
//! so it can be driven by the fakes in `tunnel`'s own test suite
//! without a live ICE/DTLS/SCTP stack; [`tunnel::webrtc_peer_connection::WebrtcPeerConnectionFactory`]
//! supplies the production implementation. Each tunnel's controller
//! owns a reconnect loop built from [`tunnel::dial::connect_tunnel`]
//! and [`tunnel::dial::reject_pending_dials`], retrying according to
//! [`tunnel::error::TunnelError::severity`]; the manager itself never
//! inspects peer-connection internals.
//!
//! [`selection`] resolves the query language in
//! [`config::selection::Selection`] against the registry's tunnels,
//! used by `List`, `Pause`, `Resume`, and `Terminate` alike.
//!
//! # Errors
//!
//! All fallible operations return [`Result`], whose error type
//! [`ManagerError`] covers not-found/ambiguous selections, a poisoned
//! tracker, cancellation, and wrapped configuration/tunnel/I/O errors.

pub mod controller;
pub mod record;
pub mod selection;
pub mod store;
pub mod tracker;

mod error;
mod manager;

pub use error::ManagerError;
pub use manager::Manager;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ManagerError>;
