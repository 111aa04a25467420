//! Route match conditions
//!
//! Conditions accumulate while the builder walks a delegation chain: every
//! route entry along the way contributes its own list. The merged result is
//! a single path condition plus the flattened header conditions.

use super::{HeaderCondition, HeaderMatchKind, PathCondition};
use crate::domain::ConditionSpec;
use regex::Regex;
use std::collections::BTreeMap;

/// Concatenate the prefixes of `conditions` into one path condition.
///
/// Slash boundaries are normalized so `/a/` + `/b` is `/a/b` and `/a` +
/// `/b/` is `/a/b/`. An empty or slash-only input yields `/`. A regex
/// condition ends the chain: the prefix merged so far becomes its literal
/// lead-in.
pub fn merge_path_conditions(conditions: &[ConditionSpec]) -> PathCondition {
    let mut prefix = String::from("/");
    for condition in conditions {
        if let Some(regex) = condition.regex.as_deref() {
            let lead = prefix.trim_end_matches('/');
            return PathCondition::Regex(format!("{}{}", regex::escape(lead), regex));
        }
        if let Some(next) = condition.prefix.as_deref() {
            prefix = format!("{}/{}", prefix.trim_end_matches('/'), next.trim_start_matches('/'));
        }
    }
    PathCondition::Prefix(prefix)
}

/// Flatten the header blocks of `conditions` into individual matches.
/// A header block naming no header, or asserting nothing, is dropped.
pub fn merge_header_conditions(conditions: &[ConditionSpec]) -> Vec<HeaderCondition> {
    conditions
        .iter()
        .filter_map(|condition| condition.header.as_ref())
        .filter(|header| !header.name.trim().is_empty())
        .filter_map(|header| {
            let set = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
            let (kind, value, invert) = if header.present {
                (HeaderMatchKind::Present, String::new(), false)
            } else if let Some(value) = set(&header.contains) {
                (HeaderMatchKind::Contains, value, false)
            } else if let Some(value) = set(&header.not_contains) {
                (HeaderMatchKind::Contains, value, true)
            } else if let Some(value) = set(&header.exact) {
                (HeaderMatchKind::Exact, value, false)
            } else if let Some(value) = set(&header.not_exact) {
                (HeaderMatchKind::Exact, value, true)
            } else {
                return None;
            };

            Some(HeaderCondition { name: header.name.clone(), value, kind, invert })
        })
        .collect()
}

/// Check the path conditions of a single route entry
pub fn path_conditions_valid(conditions: &[ConditionSpec]) -> Result<(), String> {
    let mut count = 0;
    for condition in conditions {
        if let Some(prefix) = condition.prefix.as_deref() {
            count += 1;
            if !prefix.starts_with('/') {
                return Err(format!(
                    "route: prefix conditions must start with /, {} was supplied",
                    prefix
                ));
            }
        }
        if let Some(regex) = condition.regex.as_deref() {
            count += 1;
            if let Err(e) = Regex::new(regex) {
                return Err(format!("route: invalid regex condition {:?}: {}", regex, e));
            }
        }
    }

    if count > 1 {
        return Err("route: more than one prefix is not allowed in a condition block".to_string());
    }
    Ok(())
}

/// Check the header conditions of a single route entry. The same header may
/// not be required to equal two different values.
pub fn header_conditions_valid(conditions: &[ConditionSpec]) -> Result<(), String> {
    let mut exact: BTreeMap<String, &str> = BTreeMap::new();
    for header in conditions.iter().filter_map(|condition| condition.header.as_ref()) {
        let Some(value) = header.exact.as_deref() else {
            continue;
        };
        let name = header.name.to_ascii_lowercase();
        match exact.get(&name) {
            Some(existing) if *existing != value => {
                return Err(format!(
                    "cannot specify duplicate header 'exact match' conditions in the same route: {}",
                    header.name
                ));
            }
            _ => {
                exact.insert(name, value);
            }
        }
    }
    Ok(())
}

/// Whether any condition of a route entry is a regex
pub fn has_regex(conditions: &[ConditionSpec]) -> bool {
    conditions.iter().any(|condition| condition.regex.is_some())
}
