//! Wildcard patterns for repository and directory scopes.
//!
//! `*` matches any run of characters except `/`; patterns are anchored to
//! the full string, so `*/dev` matches `package-a/dev` but not
//! `package-a/dev/extra`.

use rollop_k8s_util::error::{Error, Result};

use regex::Regex;

pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains('*')
}

pub fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for (i, part) in pattern.split('*').enumerate() {
        if i > 0 {
            translated.push_str("[^/]*");
        }
        translated.push_str(&regex::escape(part));
    }
    translated.push('$');
    Regex::new(&translated)
        .map_err(|e| Error::ConfigError(format!("invalid wildcard pattern {pattern:?}: {e}")))
}

pub fn wildcard_match(pattern: &str, value: &str) -> Result<bool> {
    if !is_wildcard(pattern) {
        return Ok(pattern == value);
    }
    Ok(wildcard_to_regex(pattern)?.is_match(value))
}
