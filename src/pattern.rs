//! Process-wide compiled regex cache.
//!
//! Filter clauses and fingerprint patterns are evaluated once per record per
//! run, so compiling them on every call would dominate matching cost.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use regex::Regex;

use crate::error::ValidationError;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

/// Compiles `pattern`, reusing a cached instance when one exists.
pub fn cached_regex(pattern: &str) -> Result<Regex, ValidationError> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = Regex::new(pattern).map_err(|e| ValidationError::InvalidFilter {
        reason: format!("invalid regex '{pattern}': {e}"),
    })?;

    let mut guard = cache.write().unwrap_or_else(PoisonError::into_inner);
    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }
    // Another thread may have inserted it while we compiled.
    let re = guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(re.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_reuses() {
        let a = cached_regex(r"^nginx/\d+").unwrap();
        let b = cached_regex(r"^nginx/\d+").unwrap();
        assert_eq!(a.as_str(), b.as_str());
        assert!(a.is_match("nginx/1.25"));
    }

    #[test]
    fn invalid_pattern_is_a_filter_error() {
        let err = cached_regex("(unclosed").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFilter { .. }));
    }
}
