#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `logging` is the workspace's one and only entry point for wiring up
//! `tracing`. Every other crate in the remote-transport core emits
//! `tracing` events and spans directly; none of them construct or
//! install a subscriber themselves. A binary embedding the core calls
//! [`init`] once at startup.
//!
//! # Design
//!
//! [`init`] installs a `tracing_subscriber::fmt` subscriber filtered
//! by an [`tracing_subscriber::EnvFilter`] sourced from the `MUTAGEN_LOG`
//! environment variable, falling back to `info` when unset. This
//! mirrors the oc-rsync workspace's `logging` crate, minus the CLI
//! verbosity-flag parsing that crate also carries: CLI parsing is
//! explicitly out of this core's scope.
//!
//! # Span field conventions
//!
//! The other crates tag their spans with a small, consistent set of
//! field names so a consumer filtering on `tunnel_id=...` sees every
//! relevant span regardless of which crate emitted it. The constants
//! in [`fields`] are the canonical names; instrumented functions should
//! use them rather than inventing new spellings.

pub mod fields;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";
const ENV_VAR: &str = "MUTAGEN_LOG";

static INIT: Once = Once::new();

/// Installs the process-wide `tracing` subscriber.
///
/// Safe to call more than once: only the first call takes effect,
/// matching `tracing`'s own global-default-subscriber semantics
/// (a second `set_global_default` would otherwise panic).
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .finish();
        // `init` is called at most once per process by construction
        // of `Once`; a failure here means something else already
        // installed a global subscriber, which we treat as a no-op
        // rather than a panic so embedding binaries retain control.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
