//! Sandboxes: private overlays of one baseline deck.
//!
//! A [`Sandbox`] records the deck it was checked out from, the revision its
//! view is based on, and one [`ModifiedEntry`] per record it touched. The
//! baseline itself is never copied; the view is rebuilt from the store on
//! demand (see [`tracker::view`]).
//!
//! Sandboxes live in a [`SandboxArena`], each behind its own mutex so that
//! operations on one sandbox serialize while different sandboxes proceed in
//! parallel.

pub mod arena;
pub mod tracker;

use std::collections::{BTreeMap, BTreeSet};

use deckmerge_store::{DeckIdentity, RecordId, Revision};
use serde::{Deserialize, Serialize};

use crate::model::record::Selection;
use crate::model::types::{ChangeCode, Owner, SandboxId};

pub use arena::{ArenaSnapshot, SandboxArena, SandboxHandle};

// ---------------------------------------------------------------------------
// ModifiedEntry
// ---------------------------------------------------------------------------

/// A sandbox's annotation for one record: its change code and the record's
/// post-edit content.
///
/// For `Delete` entries `record` holds the content that was deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedEntry<R> {
    /// How the record differs from the baseline.
    pub code: ChangeCode,
    /// Content snapshot.
    pub record: R,
}

impl<R> ModifiedEntry<R> {
    /// Build an entry.
    pub const fn new(code: ChangeCode, record: R) -> Self {
        Self { code, record }
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// An isolated overlay of one baseline deck, owned by one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox<R> {
    /// Sandbox identity.
    pub id: SandboxId,
    /// The deck this sandbox was checked out from.
    pub deck: DeckIdentity,
    /// Owning user or session.
    pub owner: Owner,
    /// Which part of the deck is visible and editable.
    #[serde(default)]
    pub selection: Selection,
    /// Deck revision the view is based on.
    pub base_revision: Revision,
    /// Unix seconds at checkout.
    pub created_at: u64,
    /// Unix seconds of the last successful edit or merge. Never decreases.
    pub last_updated: u64,
    /// False once a conflicting checkin made the sandbox stale.
    pub valid: bool,
    /// At most one entry per record id.
    pub entries: BTreeMap<RecordId, ModifiedEntry<R>>,
    /// Ids of committed records whose `New` entry brings them back after a
    /// deletion. Checkin writes these under freshly allocated ids.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub recreated: BTreeSet<RecordId>,
}

impl<R> Sandbox<R> {
    /// A fresh, valid sandbox with no entries.
    pub const fn new(
        id: SandboxId,
        deck: DeckIdentity,
        owner: Owner,
        selection: Selection,
        base_revision: Revision,
        now: u64,
    ) -> Self {
        Self {
            id,
            deck,
            owner,
            selection,
            base_revision,
            created_at: now,
            last_updated: now,
            valid: true,
            entries: BTreeMap::new(),
            recreated: BTreeSet::new(),
        }
    }

    /// Bump `last_updated`, keeping it monotonic.
    pub fn touch(&mut self, now: u64) {
        self.last_updated = self.last_updated.max(now);
    }

    /// Mark the sandbox stale.
    pub const fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Ids of records the sandbox changed itself (everything but `Unchanged`).
    pub fn touched_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| e.code.is_edit())
            .map(|(id, _)| *id)
    }

    /// Entries with the given change code.
    pub fn entries_with(&self, code: ChangeCode) -> impl Iterator<Item = (RecordId, &R)> + '_ {
        self.entries
            .iter()
            .filter(move |(_, e)| e.code == code)
            .map(|(id, e)| (*id, &e.record))
    }

    /// Owner-facing summary.
    #[must_use]
    pub fn summary(&self) -> SandboxSummary {
        let count = |code| self.entries.values().filter(|e| e.code == code).count();
        SandboxSummary {
            id: self.id,
            deck: self.deck.clone(),
            owner: self.owner.clone(),
            base_revision: self.base_revision,
            created_at: self.created_at,
            last_updated: self.last_updated,
            valid: self.valid,
            new: count(ChangeCode::New),
            modified: count(ChangeCode::Modify),
            deleted: count(ChangeCode::Delete),
            unchanged: count(ChangeCode::Unchanged),
        }
    }
}

// ---------------------------------------------------------------------------
// SandboxSummary / SandboxFilter
// ---------------------------------------------------------------------------

/// Listing view of a sandbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSummary {
    /// Sandbox identity.
    pub id: SandboxId,
    /// Checked-out deck.
    pub deck: DeckIdentity,
    /// Owner.
    pub owner: Owner,
    /// Deck revision the view is based on.
    pub base_revision: Revision,
    /// Unix seconds at checkout.
    pub created_at: u64,
    /// Unix seconds of the last edit or merge.
    pub last_updated: u64,
    /// Whether the sandbox can be checked in without re-merging.
    pub valid: bool,
    /// Number of `New` entries.
    pub new: usize,
    /// Number of `Modify` entries.
    pub modified: usize,
    /// Number of `Delete` entries.
    pub deleted: usize,
    /// Number of `Unchanged` entries.
    pub unchanged: usize,
}

/// Criteria for listing sandboxes. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SandboxFilter {
    /// Only sandboxes on this deck.
    pub deck: Option<DeckIdentity>,
    /// Only sandboxes owned by this owner.
    pub owner: Option<Owner>,
    /// Only valid (`Some(true)`) or stale (`Some(false)`) sandboxes.
    pub valid: Option<bool>,
}

impl SandboxFilter {
    /// Whether `sandbox` passes the filter.
    pub fn matches<R>(&self, sandbox: &Sandbox<R>) -> bool {
        self.deck.as_ref().is_none_or(|d| *d == sandbox.deck)
            && self.owner.as_ref().is_none_or(|o| *o == sandbox.owner)
            && self.valid.is_none_or(|v| v == sandbox.valid)
    }
}
