//! Value types used in [`RecordStore`](crate::RecordStore) signatures.
//!
//! These are plain data types with no storage dependencies. They are
//! re-exported at the crate root for convenience.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DeckType
// ---------------------------------------------------------------------------

/// The kind of deck a baseline holds.
///
/// A/B/E/F are the storm decks (aids, best track, probabilities, fixes).
/// `ForecastTrack` is the official forecast for a storm. The genesis variants
/// hold pre-storm disturbance data and share record layouts with B and E.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeckType {
    /// Objective aids and forecasts.
    A,
    /// Best track.
    B,
    /// Probabilities.
    E,
    /// Fixes.
    F,
    /// Official forecast track.
    ForecastTrack,
    /// Genesis best track.
    GenesisB,
    /// Genesis probabilities.
    GenesisE,
}

impl DeckType {
    /// All deck types, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::A,
        Self::B,
        Self::E,
        Self::F,
        Self::ForecastTrack,
        Self::GenesisB,
        Self::GenesisE,
    ];

    /// Short lowercase name, also used as the CLI value and state file stem.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::E => "e",
            Self::F => "f",
            Self::ForecastTrack => "track",
            Self::GenesisB => "genesis-b",
            Self::GenesisE => "genesis-e",
        }
    }
}

impl fmt::Display for DeckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeckType {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| IdentityError {
                value: s.to_owned(),
                reason: "expected one of a, b, e, f, track, genesis-b, genesis-e".to_owned(),
            })
    }
}

// ---------------------------------------------------------------------------
// DeckIdentity
// ---------------------------------------------------------------------------

/// Identifies one baseline deck: basin + cyclone (or genesis) number + year +
/// deck type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeckIdentity {
    /// Two-letter basin code, uppercase (e.g. `AL`, `EP`, `WP`).
    pub basin: String,
    /// Cyclone number within the basin and year (genesis number for genesis decks).
    pub number: u16,
    /// Four-digit season year.
    pub year: u16,
    /// Which deck of the storm.
    pub deck_type: DeckType,
}

impl DeckIdentity {
    /// Build a validated deck identity.
    ///
    /// # Errors
    /// Returns an error if the basin is not two ASCII letters, the number is
    /// outside 1..=99 (0..=999 for genesis decks), or the year is not four digits.
    pub fn new(
        basin: &str,
        number: u16,
        year: u16,
        deck_type: DeckType,
    ) -> Result<Self, IdentityError> {
        if basin.len() != 2 || !basin.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(IdentityError {
                value: basin.to_owned(),
                reason: "basin must be two ASCII letters".to_owned(),
            });
        }
        let max_number = match deck_type {
            DeckType::GenesisB | DeckType::GenesisE => 999,
            _ => 99,
        };
        if number > max_number || (number == 0 && max_number == 99) {
            return Err(IdentityError {
                value: number.to_string(),
                reason: format!("number must be within 1..={max_number}"),
            });
        }
        if !(1000..=9999).contains(&year) {
            return Err(IdentityError {
                value: year.to_string(),
                reason: "year must have four digits".to_owned(),
            });
        }
        Ok(Self {
            basin: basin.to_ascii_uppercase(),
            number,
            year,
            deck_type,
        })
    }

    /// Parse a storm id such as `al052024` (or `al1232024` for genesis decks).
    ///
    /// # Errors
    /// Returns an error if the id is not a basin, number and year, or any
    /// part fails [`DeckIdentity::new`] validation.
    pub fn from_storm_id(storm: &str, deck_type: DeckType) -> Result<Self, IdentityError> {
        let invalid = |reason: &str| IdentityError {
            value: storm.to_owned(),
            reason: reason.to_owned(),
        };
        if !storm.is_ascii() || storm.len() < 8 {
            return Err(invalid("expected a storm id like al052024"));
        }
        let (basin, rest) = storm.split_at(2);
        let (number, year) = rest.split_at(rest.len() - 4);
        let number = number
            .parse::<u16>()
            .map_err(|_| invalid("storm number is not numeric"))?;
        let year = year
            .parse::<u16>()
            .map_err(|_| invalid("storm year is not numeric"))?;
        Self::new(basin, number, year, deck_type)
    }

    /// The storm id in the conventional `al052024` form.
    #[must_use]
    pub fn storm_id(&self) -> String {
        format!(
            "{}{:02}{}",
            self.basin.to_ascii_lowercase(),
            self.number,
            self.year
        )
    }
}

impl fmt::Display for DeckIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.storm_id(), self.deck_type)
    }
}

/// A deck identity or deck type failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityError {
    /// The rejected value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid deck identity value '{}': {}", self.value, self.reason)
    }
}

impl std::error::Error for IdentityError {}

// ---------------------------------------------------------------------------
// RecordId / Revision
// ---------------------------------------------------------------------------

/// Stable numeric identity of a record, unique across the store.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Per-deck commit counter. Revision 0 is the empty deck.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// The revision after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Record / Write / JournalEntry
// ---------------------------------------------------------------------------

/// A committed record: its stable id plus the deck-specific payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<R> {
    /// Stable record id.
    pub id: RecordId,
    /// Deck-specific content.
    pub data: R,
}

impl<R> Record<R> {
    /// Pair an id with its content.
    pub const fn new(id: RecordId, data: R) -> Self {
        Self { id, data }
    }
}

/// One element of a commit batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Write<R> {
    /// Insert or overwrite the record with this id.
    Upsert(Record<R>),
    /// Remove the record with this id. Removing an absent id is a no-op.
    Tombstone(RecordId),
}

impl<R> Write<R> {
    /// The record id this write targets.
    pub const fn id(&self) -> RecordId {
        match self {
            Self::Upsert(r) => r.id,
            Self::Tombstone(id) => *id,
        }
    }
}

/// One applied write, as recorded in a deck's journal.
///
/// `before` is `None` when the record did not exist prior to the write;
/// `after` is `None` for tombstones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry<R> {
    /// Revision the write belongs to.
    pub revision: Revision,
    /// The record written.
    pub record_id: RecordId,
    /// Content before the write.
    pub before: Option<R>,
    /// Content after the write.
    pub after: Option<R>,
}

/// Result of a successful commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Number of writes applied.
    pub applied: usize,
    /// Deck revision after the commit.
    pub revision: Revision,
}
