//! Capability traits every deck record kind implements.
//!
//! The merge engine is generic over [`DeckRecord`]. Deck kinds differ only in
//! their natural key and field layout, which they expose through
//! [`RecordIdentity`] and [`RecordContent`].

use std::fmt;

use deckmerge_store::DeckType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::types::Dtg;

// ---------------------------------------------------------------------------
// RecordIdentity
// ---------------------------------------------------------------------------

/// How a record is identified within its deck, independent of its record id.
pub trait RecordIdentity {
    /// The natural key. Two committed records of one deck never share it.
    type Key: Ord + Clone + fmt::Debug + Send + Sync;

    /// This record's natural key.
    fn natural_key(&self) -> Self::Key;

    /// Deck types this record kind can be stored in.
    fn deck_types() -> &'static [DeckType];

    /// The record's date-time group.
    fn dtg(&self) -> &Dtg;

    /// Technique or model name, for kinds that have one.
    fn technique(&self) -> Option<&str> {
        None
    }
}

// ---------------------------------------------------------------------------
// RecordContent
// ---------------------------------------------------------------------------

/// Named field values of a record, used to show what differs in a conflict.
pub trait RecordContent {
    /// Every field as `(name, rendered value)`, in a fixed order.
    fn fields(&self) -> Vec<(&'static str, String)>;

    /// Fields whose rendered values differ between `self` and `other`.
    fn diff_fields(&self, other: &Self) -> Vec<FieldDiff> {
        self.fields()
            .into_iter()
            .zip(other.fields())
            .filter(|((_, ours), (_, theirs))| ours != theirs)
            .map(|((field, ours), (_, theirs))| FieldDiff {
                field: field.to_owned(),
                ours,
                theirs,
            })
            .collect()
    }
}

/// One field that differs between two versions of a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Field name.
    pub field: String,
    /// Value on the sandbox side.
    pub ours: String,
    /// Value on the baseline side.
    pub theirs: String,
}

// ---------------------------------------------------------------------------
// DeckRecord
// ---------------------------------------------------------------------------

/// Everything the engine needs from a record kind.
pub trait DeckRecord:
    RecordIdentity
    + RecordContent
    + Clone
    + PartialEq
    + Eq
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> DeckRecord for T where
    T: RecordIdentity
        + RecordContent
        + Clone
        + PartialEq
        + Eq
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Checkout selection criteria: which part of a deck a sandbox works on.
///
/// An empty selection matches every record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Selection {
    /// Earliest DTG, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtg_from: Option<Dtg>,
    /// Latest DTG, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtg_to: Option<Dtg>,
    /// Techniques to include. Records without a technique always match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub techniques: Vec<String>,
}

impl Selection {
    /// Selection covering the whole deck.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether `record` falls inside this selection.
    pub fn matches<R: RecordIdentity>(&self, record: &R) -> bool {
        let dtg = record.dtg();
        if self.dtg_from.as_ref().is_some_and(|from| dtg < from) {
            return false;
        }
        if self.dtg_to.as_ref().is_some_and(|to| dtg > to) {
            return false;
        }
        match record.technique() {
            Some(tech) if !self.techniques.is_empty() => self
                .techniques
                .iter()
                .any(|t| t.eq_ignore_ascii_case(tech)),
            _ => true,
        }
    }
}
