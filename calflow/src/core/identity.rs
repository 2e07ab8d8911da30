//! User identifier that namespaces all per-user state.

use crate::errors::InvalidIdentifierError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Maximum accepted identifier length in characters.
const MAX_LEN: usize = 64;

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap()
});

/// An opaque external user key (for example an institutional roll number).
///
/// The value is checked once at construction and is safe to use as a single
/// filesystem path component afterwards: it is never empty, never contains a
/// separator or `..`, and is at most 64 characters long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserIdentifier(String);

impl UserIdentifier {
    /// Validates and wraps a raw identifier.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, InvalidIdentifierError> {
        let raw = raw.as_ref();

        if raw.is_empty() {
            return Err(InvalidIdentifierError::new(raw, "identifier is empty"));
        }
        if raw.chars().count() > MAX_LEN {
            return Err(InvalidIdentifierError::new(
                raw,
                "identifier is longer than 64 characters",
            ));
        }
        if raw.contains("..") {
            return Err(InvalidIdentifierError::new(
                raw,
                "identifier contains a path traversal sequence",
            ));
        }
        if !IDENTIFIER_PATTERN.is_match(raw) {
            return Err(InvalidIdentifierError::new(
                raw,
                concat!(
                    "identifier may only contain letters, digits, '.', '_' and '-' ",
                    "and must start with a letter or digit",
                ),
            ));
        }

        Ok(Self(raw.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserIdentifier {
    type Err = InvalidIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for UserIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}
