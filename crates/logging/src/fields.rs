//! Canonical `tracing` span field names shared across crates.

/// Identifies the tunnel a span concerns.
pub const TUNNEL_ID: &str = "tunnel_id";

/// Identifies the multiplexer channel a span concerns.
pub const CHANNEL: &str = "channel";

/// Identifies the prompter a span concerns.
pub const PROMPTER_ID: &str = "prompter_id";
