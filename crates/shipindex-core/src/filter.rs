//! `account:action` inclusion and exclusion filter.

use serde::{Deserialize, Serialize};

/// One `account:action` pattern. Either side may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPair {
    pub account: String,
    pub action: String,
}

impl FilterPair {
    pub fn new(account: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            action: action.into(),
        }
    }

    /// Parse `"account:action"`. Entries whose `:` is missing or leading are
    /// not patterns and yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.find(':') {
            Some(idx) if idx > 0 => Some(Self::new(&s[..idx], &s[idx + 1..])),
            _ => None,
        }
    }

    pub fn matches(&self, account: &str, action: &str) -> bool {
        (self.account == "*" || self.account == account)
            && (self.action == "*" || self.action == action)
    }
}

/// Selects which actions are decoded and stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilter {
    on: Vec<FilterPair>,
    out: Vec<FilterPair>,
}

impl ActionFilter {
    pub fn new(on: Vec<FilterPair>, out: Vec<FilterPair>) -> Self {
        Self { on, out }
    }

    /// Build from config strings, skipping malformed entries.
    pub fn from_strings<S: AsRef<str>>(on: &[S], out: &[S]) -> Self {
        let parse = |list: &[S]| -> Vec<FilterPair> {
            list.iter().filter_map(|s| FilterPair::parse(s.as_ref())).collect()
        };
        Self {
            on: parse(on),
            out: parse(out),
        }
    }

    /// Accept everything.
    pub fn all() -> Self {
        Self::new(vec![FilterPair::new("*", "*")], Vec::new())
    }

    /// Included iff some `on` pair matches and no `out` pair does.
    pub fn matches(&self, account: &str, action: &str) -> bool {
        self.on.iter().any(|p| p.matches(account, action))
            && !self.out.iter().any(|p| p.matches(account, action))
    }
}
