//! Label grammar shared by tunnel metadata and label selectors.
//!
//! Keys and values follow the same grammar Kubernetes-style label
//! systems use: an optional `prefix/` of DNS-label segments followed
//! by a `name` segment, where both the prefix segments and the name
//! are limited to alphanumerics, `-`, `_`, and `.`, bounded in length,
//! and must start and end with an alphanumeric character.

use std::collections::BTreeMap;

use crate::{ConfigError, Result};

const MAX_NAME_LENGTH: usize = 63;
const MAX_PREFIX_LENGTH: usize = 253;
const MAX_VALUE_LENGTH: usize = 63;

/// A validated set of tunnel labels, stored in key order so that
/// serialization and selector matching are deterministic.
pub type Labels = BTreeMap<String, String>;

/// Validates every key/value pair in `labels`, returning the first
/// violation encountered.
pub fn validate(labels: &Labels) -> Result<()> {
    for (key, value) in labels {
        validate_key(key)?;
        validate_value(value)?;
    }
    Ok(())
}

/// Validates a label key: `[prefix/]name`.
pub fn validate_key(key: &str) -> Result<()> {
    match key.split_once('/') {
        Some((prefix, name)) => {
            validate_dns_prefix(prefix)?;
            validate_name_segment("key", name, MAX_NAME_LENGTH)
        }
        None => validate_name_segment("key", key, MAX_NAME_LENGTH),
    }
}

/// Validates a label value. Empty values are permitted.
pub fn validate_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    validate_name_segment("value", value, MAX_VALUE_LENGTH)
}

fn validate_dns_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH {
        return Err(ConfigError::InvalidLabel {
            field: "key",
            reason: format!(
                "prefix must be 1-{MAX_PREFIX_LENGTH} characters, got {}",
                prefix.len()
            ),
        });
    }
    for segment in prefix.split('.') {
        validate_name_segment("key prefix segment", segment, MAX_NAME_LENGTH)?;
    }
    Ok(())
}

fn validate_name_segment(field: &'static str, segment: &str, max_len: usize) -> Result<()> {
    if segment.is_empty() || segment.len() > max_len {
        return Err(ConfigError::InvalidLabel {
            field,
            reason: format!("must be 1-{max_len} characters, got {}", segment.len()),
        });
    }
    let is_alnum = |c: char| c.is_ascii_alphanumeric();
    let first = segment.chars().next().unwrap();
    let last = segment.chars().last().unwrap();
    if !is_alnum(first) || !is_alnum(last) {
        return Err(ConfigError::InvalidLabel {
            field,
            reason: "must start and end with an alphanumeric character".into(),
        });
    }
    if !segment
        .chars()
        .all(|c| is_alnum(c) || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::InvalidLabel {
            field,
            reason: "must consist of alphanumerics, '-', '_', or '.'".into(),
        });
    }
    Ok(())
}
