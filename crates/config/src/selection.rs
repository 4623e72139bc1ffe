//! The tunnel query language: select all tunnels, a list of
//! identifier/name specifications, or a structural label selector.

use crate::labels::Labels;
use crate::{ConfigError, Result};

/// A single entry in a specification-list selection: matches a tunnel
/// by identifier or by name (callers decide which field to compare
/// against; the core does not guess).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specification(pub String);

/// One clause of a label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorTerm {
    /// `key = value` or bare `key=value`.
    Equals(String, String),
    /// `key != value`.
    NotEquals(String, String),
    /// `key in (v1, v2, ...)`.
    In(String, Vec<String>),
    /// `key notin (v1, v2, ...)`.
    NotIn(String, Vec<String>),
    /// Bare `key` (existence check).
    Exists(String),
    /// `!key` (non-existence check).
    NotExists(String),
}

impl SelectorTerm {
    fn matches(&self, labels: &Labels) -> bool {
        match self {
            SelectorTerm::Equals(key, value) => labels.get(key).is_some_and(|v| v == value),
            SelectorTerm::NotEquals(key, value) => labels.get(key).is_none_or(|v| v != value),
            SelectorTerm::In(key, values) => {
                labels.get(key).is_some_and(|v| values.contains(v))
            }
            SelectorTerm::NotIn(key, values) => {
                labels.get(key).is_none_or(|v| !values.contains(v))
            }
            SelectorTerm::Exists(key) => labels.contains_key(key),
            SelectorTerm::NotExists(key) => !labels.contains_key(key),
        }
    }
}

/// A structural label selector: a conjunction of [`SelectorTerm`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    terms: Vec<SelectorTerm>,
}

impl LabelSelector {
    /// Parses a Kubernetes-style selector expression, e.g.
    /// `role=worker,env!=staging,tier in (a,b)`.
    pub fn parse(expr: &str) -> Result<Self> {
        let mut terms = Vec::new();
        for clause in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            terms.push(parse_clause(clause)?);
        }
        Ok(Self { terms })
    }

    /// Returns whether `labels` satisfies every term of this selector.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.terms.iter().all(|term| term.matches(labels))
    }
}

fn parse_clause(clause: &str) -> Result<SelectorTerm> {
    if let Some(key) = clause.strip_prefix('!') {
        return Ok(SelectorTerm::NotExists(key.trim().to_string()));
    }
    if let Some(idx) = clause.find("!=") {
        let (key, value) = clause.split_at(idx);
        return Ok(SelectorTerm::NotEquals(
            key.trim().to_string(),
            value[2..].trim().to_string(),
        ));
    }
    if let Some((key, rest)) = clause.split_once(" in ") {
        return Ok(SelectorTerm::In(key.trim().to_string(), parse_set(rest)?));
    }
    if let Some((key, rest)) = clause.split_once(" notin ") {
        return Ok(SelectorTerm::NotIn(
            key.trim().to_string(),
            parse_set(rest)?,
        ));
    }
    if let Some(idx) = clause.find('=') {
        let (key, value) = clause.split_at(idx);
        return Ok(SelectorTerm::Equals(
            key.trim().to_string(),
            value[1..].trim().to_string(),
        ));
    }
    if clause.chars().all(|c| c.is_alphanumeric() || "-_./".contains(c)) {
        return Ok(SelectorTerm::Exists(clause.to_string()));
    }
    Err(ConfigError::InvalidSelector(clause.to_string()))
}

fn parse_set(rest: &str) -> Result<Vec<String>> {
    let trimmed = rest.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ConfigError::InvalidSelector(rest.to_string()))?;
    Ok(inner
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// A query across the manager's tunnel registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every tunnel.
    All,
    /// A non-empty list of identifier/name specifications; every
    /// specification must match at least one tunnel.
    Specifications(Vec<Specification>),
    /// A structural label selector.
    LabelSelector(LabelSelector),
}

impl Selection {
    /// Builds a specification-list selection, rejecting an empty list.
    pub fn specifications(specs: Vec<Specification>) -> Result<Self> {
        if specs.is_empty() {
            return Err(ConfigError::EmptySelection);
        }
        Ok(Selection::Specifications(specs))
    }

    /// Builds a label-selector selection from an expression string.
    pub fn label_selector(expr: &str) -> Result<Self> {
        Ok(Selection::LabelSelector(LabelSelector::parse(expr)?))
    }
}
