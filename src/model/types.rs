//! Core engine types for deckmerge.
//!
//! Foundation types used throughout the engine: sandbox and merge-log
//! identifiers, owners, date-time groups, and per-record change codes.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SandboxId / MergeLogId
// ---------------------------------------------------------------------------

/// Numeric identity of a sandbox. Never reused within one arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(pub u64);

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SandboxId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self).map_err(|_| ValidationError {
            kind: ErrorKind::SandboxId,
            value: s.to_owned(),
            reason: "expected a non-negative integer".to_owned(),
        })
    }
}

/// Incrementing identity of a merge log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeLogId(pub u64);

impl fmt::Display for MergeLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MergeLogId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self).map_err(|_| ValidationError {
            kind: ErrorKind::MergeLogId,
            value: s.to_owned(),
            reason: "expected a non-negative integer".to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Owner
// ---------------------------------------------------------------------------

/// The user or session that owns a sandbox.
///
/// Non-empty, at most 64 characters, no whitespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Owner(String);

impl Owner {
    /// Create a validated owner name.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains whitespace.
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        Self::validate(name)?;
        Ok(Self(name.to_owned()))
    }

    /// The owner name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), ValidationError> {
        let reason = if name.is_empty() {
            "must not be empty"
        } else if name.chars().count() > 64 {
            "must be at most 64 characters"
        } else if name.chars().any(char::is_whitespace) {
            "must not contain whitespace"
        } else {
            return Ok(());
        };
        Err(ValidationError {
            kind: ErrorKind::Owner,
            value: name.to_owned(),
            reason: reason.to_owned(),
        })
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Owner {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Owner {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Owner> for String {
    fn from(owner: Owner) -> Self {
        owner.0
    }
}

// ---------------------------------------------------------------------------
// Dtg
// ---------------------------------------------------------------------------

/// A date-time group: `YYYYMMDDHH`, UTC.
///
/// Ordering is chronological because the format is fixed-width.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dtg(String);

impl Dtg {
    /// Create a validated DTG.
    ///
    /// # Errors
    /// Returns an error unless the value is ten digits with a plausible
    /// month (01-12), day (01-31) and hour (00-23).
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// The raw `YYYYMMDDHH` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError {
            kind: ErrorKind::Dtg,
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        if s.len() != 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected ten digits YYYYMMDDHH"));
        }
        let part = |range: std::ops::Range<usize>| s[range].parse::<u32>().unwrap_or(0);
        if !(1..=12).contains(&part(4..6)) {
            return Err(invalid("month must be 01-12"));
        }
        if !(1..=31).contains(&part(6..8)) {
            return Err(invalid("day must be 01-31"));
        }
        if part(8..10) > 23 {
            return Err(invalid("hour must be 00-23"));
        }
        Ok(())
    }
}

impl fmt::Display for Dtg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Dtg {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Dtg {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Dtg> for String {
    fn from(dtg: Dtg) -> Self {
        dtg.0
    }
}

// ---------------------------------------------------------------------------
// ChangeCode
// ---------------------------------------------------------------------------

/// How a sandbox's copy of a record differs from the baseline it was
/// checked out from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCode {
    /// Baseline value, tracked because the baseline moved underneath it.
    Unchanged,
    /// The sandbox introduces the record.
    New,
    /// The sandbox holds an edited copy of a baseline record.
    Modify,
    /// The sandbox removes a baseline record.
    Delete,
}

impl ChangeCode {
    /// Whether this entry carries a change the sandbox made itself.
    #[must_use]
    pub const fn is_edit(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for ChangeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::New => write!(f, "new"),
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current Unix time in seconds. Clock errors collapse to 0.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which kind of value failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A sandbox id.
    SandboxId,
    /// A merge log id.
    MergeLogId,
    /// An owner name.
    Owner,
    /// A date-time group.
    Dtg,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SandboxId => write!(f, "sandbox id"),
            Self::MergeLogId => write!(f, "merge log id"),
            Self::Owner => write!(f, "owner"),
            Self::Dtg => write!(f, "DTG"),
        }
    }
}

/// A value failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What was being validated.
    pub kind: ErrorKind,
    /// The rejected value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}': {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
