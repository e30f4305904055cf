//! Equity identity and reference data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Listed-equity code, e.g. `2330` or `00878`.
///
/// Always non-empty ASCII alphanumeric. Ordering is plain byte order of the
/// code, which is the tie-break order used everywhere results are ranked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EquityId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid equity id '{0}': expected non-empty ASCII alphanumeric code")]
pub struct InvalidEquityId(pub String);

impl EquityId {
    pub fn new(code: impl Into<String>) -> Result<Self, InvalidEquityId> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidEquityId(code));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn code_len(&self) -> usize {
        self.0.len()
    }

    pub fn is_numeric(&self) -> bool {
        self.0.chars().all(|c| c.is_ascii_digit())
    }

    /// Exchange-traded funds on the home venues are listed under `00xx` codes.
    pub fn has_fund_prefix(&self) -> bool {
        self.0.starts_with("00")
    }
}

impl FromStr for EquityId {
    type Err = InvalidEquityId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EquityId {
    type Error = InvalidEquityId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EquityId> for String {
    fn from(id: EquityId) -> Self {
        id.0
    }
}

impl fmt::Display for EquityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Market venue an equity is listed on (normalized to upper case, e.g. `TWSE`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Venue(String);

impl Venue {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Venue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Venue> for String {
    fn from(v: Venue) -> Self {
        v.0
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference data for one listed equity. Loaded once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equity {
    pub id: EquityId,
    pub name: String,
    pub venue: Venue,
    pub is_etf: bool,
}

impl Equity {
    pub fn new(id: EquityId, name: impl Into<String>, venue: Venue, is_etf: bool) -> Self {
        Self { id, name: name.into(), venue, is_etf }
    }
}
