//! Bijective string-to-id dictionaries

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::containers::column::NULL_INT;

/// Sentinel string mapped to id 0 by every encoding; the category trimmer
/// rewrites dropped categories to it.
pub const TRIMMED: &str = "(trimmed)";

/// An append-only mapping between strings and integer ids.
///
/// Ids are stable once assigned: the same string always yields the same id
/// for the lifetime of the encoding. Id 0 is reserved for the trimmed
/// sentinel. Two encodings exist per process, one for category domains and
/// one for join-key domains; both are shared across all frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoding {
    map: HashMap<String, i64>,
    strings: Vec<String>,
}

impl Encoding {
    pub fn new() -> Self {
        let mut enc = Self {
            map: HashMap::new(),
            strings: Vec::new(),
        };
        enc.insert(TRIMMED);
        enc
    }

    /// Returns the id for `s`, assigning a fresh one on first sight.
    pub fn insert(&mut self, s: &str) -> i64 {
        if let Some(&ix) = self.map.get(s) {
            return ix;
        }
        let ix = self.strings.len() as i64;
        self.map.insert(s.to_string(), ix);
        self.strings.push(s.to_string());
        ix
    }

    /// The id for `s`, or the null sentinel if `s` was never inserted.
    pub fn int(&self, s: &str) -> i64 {
        self.map.get(s).copied().unwrap_or(NULL_INT)
    }

    /// The string for id `ix`. Negative ids render as NULL.
    pub fn string(&self, ix: i64) -> &str {
        if ix < 0 || ix as usize >= self.strings.len() {
            return "NULL";
        }
        &self.strings[ix as usize]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        let mut enc = Encoding::new();
        let a = enc.insert("a");
        let b = enc.insert("b");
        assert_eq!(enc.insert("a"), a);
        assert_ne!(a, b);
        assert_eq!(enc.string(a), "a");
    }

    #[test]
    fn test_trimmed_sentinel_is_zero() {
        let enc = Encoding::new();
        assert_eq!(enc.int(TRIMMED), 0);
        assert_eq!(enc.string(0), TRIMMED);
    }

    #[test]
    fn test_unknown_is_null() {
        let enc = Encoding::new();
        assert_eq!(enc.int("never seen"), NULL_INT);
        assert_eq!(enc.string(NULL_INT), "NULL");
    }
}
