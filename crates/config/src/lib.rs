#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `config` centralizes the environment-driven configuration and the
//! small value types (labels, selections, masking) that every other
//! crate in the transport core depends on but that do not belong to
//! any one subsystem.
//!
//! # Design
//!
//! Three independent concerns live here, each in its own module:
//! [`env`] parses the `MUTAGEN_TUNNEL_*` environment variables into a
//! validated [`env::TunnelEnvironment`]; [`labels`] implements the
//! label grammar used by tunnel metadata; [`selection`] implements the
//! tunnel-query language (all / specification list / label selector)
//! shared by the manager's `List`, `Pause`, `Resume`, and `Terminate`
//! operations; [`mask`] holds the sentinel values used to redact
//! sensitive tunnel fields before they cross an observability boundary.
//!
//! # Invariants
//!
//! - [`env::TunnelEnvironment::from_env`] never panics; malformed
//!   environment variables produce a [`ConfigError`].
//! - [`labels::validate_key`] and [`labels::validate_value`] are pure
//!   and total over `&str`.
//! - [`mask::MASKED_TOKEN`] and [`mask::masked_secret`] are the only
//!   values a masking routine may substitute for sensitive tunnel
//!   fields.
//!
//! # Errors
//!
//! All fallible constructors in this crate return [`ConfigError`].
#![doc = ""]

pub mod env;
pub mod labels;
pub mod mask;
pub mod selection;

mod error;

pub use error::ConfigError;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ConfigError>;
