//! Wildcard matching for package specs and flag names
//!
//! Directive files only support `*` as a wildcard ("any sequence"). Every
//! other character matches literally. Compiled patterns are cached per
//! matcher instance since the same specs repeat across many entries.

use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::warn;

/// Compile a wildcard string into an anchored regex
pub fn compile_wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^(?s:{})$", escaped))
}

/// Check if a package spec is a wildcard.
///
/// The trailing `*` of an `=cat/pkg-1*` version glob does not count.
pub fn is_wildcard_package(spec: &str) -> bool {
    let spec = match spec.strip_prefix('=') {
        Some(rest) => rest.strip_suffix('*').unwrap_or(rest),
        None => spec,
    };
    spec.contains('*')
}

/// Check if a flag token is a wildcard (`*`, `**`, `~*` or `prefix_*`)
pub fn is_wildcard_flag(name: &str) -> bool {
    matches!(name, "*" | "**" | "~*") || name.ends_with("_*")
}

/// Memoizing wildcard matcher
#[derive(Debug, Default)]
pub struct PatternMatcher {
    cache: RefCell<HashMap<String, Option<Regex>>>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test whether `text` matches the wildcard `pattern`
    pub fn matches(&self, pattern: &str, text: &str) -> bool {
        if !pattern.contains('*') {
            return pattern == text;
        }

        let mut cache = self.cache.borrow_mut();
        let compiled = cache.entry(pattern.to_string()).or_insert_with(|| {
            compile_wildcard(pattern)
                .map_err(|e| warn!("Unable to compile wildcard {}: {}", pattern, e))
                .ok()
        });
        compiled.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
    }

    /// Check whether a stored package spec applies to the queried package.
    ///
    /// With `exact`, only byte-identical specs match. Otherwise the stored
    /// spec is treated as the pattern, so `dev-foo/*` applies to
    /// `dev-foo/bar` but not the other way round.
    pub fn package_matches(&self, stored: &str, query: &str, exact: bool) -> bool {
        if exact {
            stored == query
        } else {
            self.matches(stored, query)
        }
    }

    /// Check whether a stored flag and a queried flag (both full names)
    /// refer to each other, in either direction
    pub fn flag_matches(&self, stored: &str, query: &str) -> bool {
        self.matches(stored, query) || self.matches(query, stored)
    }

    /// Check whether a queried flag pattern selects a stored flag token
    pub fn flag_selects(&self, query: &str, stored: &str) -> bool {
        self.matches(query, stored)
    }

    /// Number of compiled patterns held
    pub fn cached_patterns(&self) -> usize {
        self.cache.borrow().len()
    }
}
