//! Storage data types

use serde::{Deserialize, Serialize};

/// What a listing should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Outcome of a bulk operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Successfully processed paths
    pub success: Vec<String>,
    /// Failed paths with error messages
    pub failed: Vec<(String, String)>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Whether a transfer keeps or removes its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

/// Match a name against a simple wildcard pattern (`*` and `?` only).
///
/// Every other character, including `[` and `]`, is literal. Matching is
/// case-insensitive, like the device and Windows filesystems.
pub fn wildcard_matches(pattern: &str, name: &str) -> bool {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' | '?' => escaped.push(c),
            other => escaped.push_str(&glob::Pattern::escape(&other.to_string())),
        }
    }
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    glob::Pattern::new(&escaped)
        .map(|p| p.matches_with(name, options))
        .unwrap_or(false)
}
