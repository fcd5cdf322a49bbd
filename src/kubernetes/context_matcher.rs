// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Selection of kubeconfig contexts to connect
//!
//! A selection is a comma-separated list of terms, applied left to right:
//! - `prod` adds an exact context (error if it does not exist)
//! - `prod-*`, `stage-0?` add every context matching the glob
//! - `!prod-03`, `!*-canary` remove previously selected contexts
//!
//! The result keeps kubeconfig order and holds no duplicates.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("context '{0}' not found in kubeconfig")]
    NotFound(String),

    #[error("no contexts matched '{0}'")]
    NoMatch(String),
}

/// Resolves selection strings against the contexts of a kubeconfig
pub struct ContextMatcher<'a> {
    available: &'a [String],
}

impl<'a> ContextMatcher<'a> {
    pub fn new(available: &'a [String]) -> Self {
        Self { available }
    }

    /// Resolve a selection to context names, in kubeconfig order
    pub fn resolve(&self, selection: &str) -> Result<Vec<String>, SelectionError> {
        let mut selected = vec![false; self.available.len()];

        for term in selection.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (exclude, pattern) = match term.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, term),
            };

            if is_glob(pattern) {
                for (i, ctx) in self.available.iter().enumerate() {
                    if glob_match(pattern, ctx) {
                        selected[i] = !exclude;
                    }
                }
                continue;
            }

            let index = self
                .available
                .iter()
                .position(|ctx| ctx == pattern)
                .ok_or_else(|| SelectionError::NotFound(pattern.to_string()))?;
            selected[index] = !exclude;
        }

        let contexts: Vec<String> = self
            .available
            .iter()
            .zip(selected)
            .filter_map(|(ctx, keep)| keep.then(|| ctx.clone()))
            .collect();

        if contexts.is_empty() {
            return Err(SelectionError::NoMatch(selection.trim().to_string()));
        }
        Ok(contexts)
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Glob match supporting `*` (any run) and `?` (any one char)
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Last '*' seen and the text position it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    backtrack = Some((star, absorbed + 1));
                    p = star + 1;
                    t = absorbed + 1;
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contexts() -> Vec<String> {
        ["prod-01", "prod-02", "prod-canary", "staging-01", "dev"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_exact() {
        let ctxs = contexts();
        let matcher = ContextMatcher::new(&ctxs);
        assert_eq!(matcher.resolve("dev").unwrap(), vec!["dev"]);
    }

    #[test]
    fn test_exact_not_found() {
        let ctxs = contexts();
        let matcher = ContextMatcher::new(&ctxs);
        assert_eq!(
            matcher.resolve("prod-01, nope"),
            Err(SelectionError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_glob_keeps_kubeconfig_order() {
        let ctxs = contexts();
        let matcher = ContextMatcher::new(&ctxs);
        assert_eq!(
            matcher.resolve("dev, prod-0?").unwrap(),
            vec!["prod-01", "prod-02", "dev"]
        );
    }

    #[test]
    fn test_exclusion() {
        let ctxs = contexts();
        let matcher = ContextMatcher::new(&ctxs);
        assert_eq!(
            matcher.resolve("prod-*, !*-canary").unwrap(),
            vec!["prod-01", "prod-02"]
        );
        assert_eq!(matcher.resolve("*, ! dev, !staging-01").unwrap().len(), 3);
    }

    #[test]
    fn test_nothing_selected() {
        let ctxs = contexts();
        let matcher = ContextMatcher::new(&ctxs);
        assert!(matches!(matcher.resolve("qa-*"), Err(SelectionError::NoMatch(_))));
        assert!(matches!(matcher.resolve("dev, !dev"), Err(SelectionError::NoMatch(_))));
        assert!(matches!(matcher.resolve(" , "), Err(SelectionError::NoMatch(_))));
    }

    #[test]
    fn test_duplicates_collapse() {
        let ctxs = contexts();
        let matcher = ContextMatcher::new(&ctxs);
        assert_eq!(
            matcher.resolve("prod-01, prod-01, prod-0*").unwrap(),
            vec!["prod-01", "prod-02"]
        );
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("prod-*", "prod-01"));
        assert!(!glob_match("prod-*", "staging-01"));
        assert!(glob_match("de?", "dev"));
        assert!(!glob_match("de?", "de"));
        assert!(glob_match("*-*", "prod-canary"));
        assert!(!glob_match("*-*", "dev"));
        assert!(glob_match("*", ""));
        assert!(glob_match("*a*b", "xaxxab"));
        assert!(!glob_match("*a*b", "xaxxa"));
    }
}
