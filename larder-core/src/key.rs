//! Dotted key addressing.
//!
//! A key is either *simple* (`"user"`) or *dotted* (`"user.profile.name"`).
//! The first segment of a dotted key names the top-level record that is
//! actually stored; the remaining segments address a value nested inside it.
//! Keys are case-sensitive and otherwise opaque.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Separator between the top-level key and nested property names.
pub const PATH_SEPARATOR: char = '.';

/// A validated, possibly dotted key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreKey {
    raw: String,
    /// Byte offset of the first separator, if any.
    split: Option<usize>,
}

impl StoreKey {
    /// Parse and validate a key.
    ///
    /// Empty keys and keys with empty segments (`"a..b"`, `".a"`, `"a."`)
    /// are rejected.
    pub fn parse(raw: impl Into<String>) -> Result<Self, KeyError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(KeyError::Empty);
        }
        let empty_segment = raw.split(PATH_SEPARATOR).position(str::is_empty);
        if let Some(position) = empty_segment {
            return Err(KeyError::EmptySegment { key: raw, position });
        }
        let split = raw.find(PATH_SEPARATOR);
        Ok(Self { raw, split })
    }

    /// The full key as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The top-level key, i.e. the part before the first separator.
    pub fn top_level(&self) -> &str {
        match self.split {
            Some(idx) => &self.raw[..idx],
            None => &self.raw,
        }
    }

    /// True when the key addresses a value nested inside a record.
    pub fn is_dotted(&self) -> bool {
        self.split.is_some()
    }

    /// Nested property names after the top-level key, left to right.
    pub fn segments(&self) -> Vec<&str> {
        match self.split {
            Some(idx) => self.raw[idx + 1..].split(PATH_SEPARATOR).collect(),
            None => Vec::new(),
        }
    }

    /// True when `other` is a dotted key nested under this key's top level.
    pub fn is_nested_under(other: &str, top_level: &str) -> bool {
        other.len() > top_level.len()
            && other.starts_with(top_level)
            && other[top_level.len()..].starts_with(PATH_SEPARATOR)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for StoreKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for StoreKey {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<StoreKey> for String {
    fn from(key: StoreKey) -> Self {
        key.raw
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}
