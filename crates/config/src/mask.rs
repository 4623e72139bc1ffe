//! Masking routines for sensitive tunnel fields.
//!
//! Tokens and HMAC secrets must never cross an observability boundary
//! (`List`, logs, error messages) unredacted. These are the *only*
//! routines permitted to produce a masked representation, so that
//! every call site for "is this field sensitive" funnels through one
//! place.

/// Sentinel substituted for a tunnel's rendezvous token when masked.
pub const MASKED_TOKEN: &str = "******";

/// Returns [`MASKED_TOKEN`], regardless of the input. Kept as a
/// function (rather than inlining the constant at call sites) so a
/// future change to the masking scheme only touches one place.
pub fn masked_token(_token: &str) -> String {
    MASKED_TOKEN.to_string()
}

/// Masks an HMAC secret by zero-filling it while preserving its
/// length, so a masked tunnel record's secret field is recognizable as
/// redacted without revealing its original length by truncation.
pub fn masked_secret(secret: &[u8]) -> Vec<u8> {
    vec![0u8; secret.len()]
}
