//! Reversible row identity keys.
//!
//! A [`Key`] is built from the present key-column values of a row as
//! `encode(column) # encode(value) #` repeated per column. The codec keeps the
//! field separator out of encoded text, so a key can always be split back into
//! its (column, value) pairs.

use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Escape marker inside encoded key fields
pub const ESCAPE: char = '%';

/// Separator between key fields
pub const SEPARATOR: char = '#';

/// Character that follows [`ESCAPE`] to stand for an escaped [`SEPARATOR`]
const SEPARATOR_CODE: char = 'r';

/// Encode `s` so that the result never contains a raw [`SEPARATOR`].
///
/// Every literal escape marker is doubled and every separator becomes
/// `ESCAPE` followed by `r`.
pub fn encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ESCAPE => {
                out.push(ESCAPE);
                out.push(ESCAPE);
            }
            SEPARATOR => {
                out.push(ESCAPE);
                out.push(SEPARATOR_CODE);
            }
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`encode`].
///
/// An escape marker followed by `r` yields the separator; followed by any
/// other character it yields that character. A lone marker at the end of the
/// input is dropped.
pub fn decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(SEPARATOR_CODE) => out.push(SEPARATOR),
            Some(next) => out.push(next),
            None => {}
        }
    }
    out
}

/// Opaque identity of a row, derived from its key-column values
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Build a key from (column, value) pairs in key-column order
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut key = String::new();
        for (column, value) in pairs {
            key.push_str(&encode(column));
            key.push(SEPARATOR);
            key.push_str(&encode(value));
            key.push(SEPARATOR);
        }
        Key(key)
    }

    /// Decode the key back into its (column, value) pairs
    pub fn pairs(&self) -> Result<Vec<(String, String)>> {
        if self.0.is_empty() {
            return Ok(Vec::new());
        }

        let body = self.0.strip_suffix(SEPARATOR).ok_or_else(|| {
            DataError::InvalidKey(format!("\"{}\" does not end with '{}'", self.0, SEPARATOR))
        })?;

        let fields: Vec<&str> = body.split(SEPARATOR).collect();
        if fields.len() % 2 != 0 {
            return Err(DataError::InvalidKey(format!(
                "\"{}\" has a column without a value",
                self.0
            )));
        }

        Ok(fields
            .chunks(2)
            .map(|pair| (decode(pair[0]), decode(pair[1])))
            .collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.to_string())
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
