//! Resolves [`config::selection::Selection`] against the registry's
//! tunnels. Shared by `List`, `Dial`, `Pause`, `Resume`, and
//! `Terminate` so there is exactly one place that implements "what
//! does this query match".

use std::collections::HashSet;

use config::labels::Labels;
use config::selection::Selection;

use crate::{ManagerError, Result};

/// The identifying fields of one registered tunnel, as seen by
/// selection matching.
pub struct Candidate<'a> {
    /// Stable identifier.
    pub identifier: &'a str,
    /// Mutable display name.
    pub name: &'a str,
    /// Mutable labels.
    pub labels: &'a Labels,
}

/// Returns the identifiers of every candidate matched by `selection`.
///
/// A specification-list selection requires every specification to
/// match at least one candidate (by identifier or by name); matches
/// are de-duplicated via set semantics, so a specification list
/// containing both a tunnel's identifier and its name still yields
/// that tunnel once.
pub fn resolve(selection: &Selection, candidates: &[Candidate<'_>]) -> Result<Vec<String>> {
    match selection {
        Selection::All => Ok(candidates.iter().map(|c| c.identifier.to_string()).collect()),
        Selection::Specifications(specs) => {
            let mut matched = HashSet::new();
            for spec in specs {
                let before = matched.len();
                for candidate in candidates {
                    if candidate.identifier == spec.0 || candidate.name == spec.0 {
                        matched.insert(candidate.identifier.to_string());
                    }
                }
                if matched.len() == before {
                    return Err(ManagerError::SpecificationUnmatched(spec.0.clone()));
                }
            }
            Ok(matched.into_iter().collect())
        }
        Selection::LabelSelector(selector) => Ok(candidates
            .iter()
            .filter(|c| selector.matches(c.labels))
            .map(|c| c.identifier.to_string())
            .collect()),
    }
}

/// Resolves `id_or_name` against `candidates` for `Dial`, which
/// targets exactly one tunnel: an empty match is
/// [`ManagerError::NotFound`], more than one is
/// [`ManagerError::Ambiguous`].
pub fn resolve_one(id_or_name: &str, candidates: &[Candidate<'_>]) -> Result<String> {
    let matches: Vec<&str> = candidates
        .iter()
        .filter(|c| c.identifier == id_or_name || c.name == id_or_name)
        .map(|c| c.identifier)
        .collect();
    match matches.len() {
        0 => Err(ManagerError::NotFound(id_or_name.to_string())),
        1 => Ok(matches[0].to_string()),
        n => Err(ManagerError::Ambiguous(id_or_name.to_string(), n)),
    }
}
