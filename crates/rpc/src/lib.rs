#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! Remote procedure calls layered on top of `framing`.
//!
//! # Overview
//!
//! A call is a method name followed by a stream of envelope-wrapped
//! messages in either direction, ending with a clean close at a
//! message boundary. [`call::Call`] implements the wire shape;
//! [`server::serve`] dispatches inbound calls to handlers by method
//! name.
//!
//! Interactive authentication prompts are routed through
//! [`broker::PrompterBroker`], which enforces that at most one
//! `Message` or `Prompt` call is in flight for a given registered
//! [`prompter::Prompter`] at any time.
//!
//! # Design
//!
//! Messages are wrapped in a small envelope (see `envelope`) carrying
//! either a payload or a remote-side error string, so a handler's
//! `Result::Err` can cross the wire and surface as
//! [`RpcError::RemoteError`] on the caller's side without a second
//! out-of-band channel.
//!
//! # Errors
//!
//! All fallible operations return [`Result`], whose error type
//! [`RpcError`] wraps framing failures alongside RPC-specific
//! conditions (unknown prompter, drained mailbox, cancellation).

pub mod broker;
pub mod call;
mod envelope;
mod error;
pub mod prompter;
pub mod server;

pub use error::RpcError;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RpcError>;
