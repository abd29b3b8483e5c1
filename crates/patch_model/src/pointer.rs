//! Strict RFC 6901 JSON pointers.
//!
//! Parsing is exact: the empty string is the root, every other pointer must
//! start with `/`, `~` must be followed by `0` or `1`, and round-tripping
//! through [`Pointer::to_string`] reproduces the input byte for byte.
//!
//! Array index tokens are contextual and therefore validated separately via
//! [`ArrayToken::parse`]: when the parent is an array a token must be `-`
//! (the append sentinel) or a non-negative integer without leading zeros;
//! when the parent is an object any token is a valid key.

use crate::error::PointerError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed JSON pointer: a list of reference tokens.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pointer {
    tokens: Vec<String>,
}

impl Pointer {
    /// The root pointer (`""`).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a pointer from raw (unescaped) tokens.
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    /// Parse a pointer string strictly.
    pub fn parse(text: &str) -> Result<Self, PointerError> {
        if text.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = text.strip_prefix('/') else {
            return Err(PointerError::new(text, "must start with '/'"));
        };
        let mut tokens = Vec::new();
        for raw in rest.split('/') {
            tokens.push(unescape(raw).map_err(|detail| PointerError::new(text, detail))?);
        }
        Ok(Self { tokens })
    }

    /// The unescaped tokens.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// True for the root pointer.
    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True when there are no tokens.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Split into the parent pointer and the final token. `None` at root.
    pub fn split_last(&self) -> Option<(Pointer, &str)> {
        let (last, parent) = self.tokens.split_last()?;
        Some((
            Pointer {
                tokens: parent.to_vec(),
            },
            last.as_str(),
        ))
    }

    /// Pointer with `token` appended.
    pub fn child(&self, token: &str) -> Pointer {
        let mut tokens = self.tokens.clone();
        tokens.push(token.to_string());
        Pointer { tokens }
    }

    /// True when `self` is a proper or improper prefix of `other`.
    pub fn is_prefix_of(&self, other: &Pointer) -> bool {
        other.tokens.len() >= self.tokens.len()
            && other.tokens[..self.tokens.len()] == self.tokens[..]
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", escape(token))?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Pointer {
    type Error = PointerError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pointer::parse(&value)
    }
}

impl From<Pointer> for String {
    fn from(pointer: Pointer) -> String {
        pointer.to_string()
    }
}

/// Escape a token for rendering (`~` then `/`, in that order).
pub fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(raw: &str) -> Result<String, &'static str> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err("'~' must be followed by '0' or '1'"),
        }
    }
    Ok(out)
}

/// A token interpreted in array-parent position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayToken {
    /// A concrete index.
    Index(usize),
    /// The `-` append sentinel.
    Append,
}

impl ArrayToken {
    /// Parse a token under array-index rules. `None` means the token is not
    /// a valid array reference (which is an `INVALID_POINTER` condition at
    /// the call site).
    pub fn parse(token: &str) -> Option<ArrayToken> {
        if token == "-" {
            return Some(ArrayToken::Append);
        }
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if token.len() > 1 && token.starts_with('0') {
            return None;
        }
        token.parse::<usize>().ok().map(ArrayToken::Index)
    }
}
