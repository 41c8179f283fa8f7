//! Merge log: the reversible history of checkins.
//!
//! Each successful checkin appends one [`MergeLogEntry`] recording, per
//! written record, the committed value before and after. Rolling an entry
//! back writes the `before` values again, exactly once.
//!
//! Only the newest `retain` entries per deck are kept. Older entries are
//! pruned on append and are no longer found.

use std::collections::BTreeMap;

use deckmerge_store::{DeckIdentity, RecordId, Revision};
use serde::{Deserialize, Serialize};

use crate::model::types::{MergeLogId, Owner, SandboxId};

// ---------------------------------------------------------------------------
// MergeLogEntry
// ---------------------------------------------------------------------------

/// Committed value of one record before and after a checkin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedChange<R> {
    /// Record id.
    pub record_id: RecordId,
    /// Value before the checkin (`None` if the checkin created it).
    pub before: Option<R>,
    /// Value after the checkin (`None` if the checkin deleted it).
    pub after: Option<R>,
}

/// One completed checkin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeLogEntry<R> {
    /// Entry identity.
    pub id: MergeLogId,
    /// The deck that was written.
    pub deck: DeckIdentity,
    /// The sandbox that was checked in.
    pub sandbox_id: SandboxId,
    /// Its owner.
    pub owner: Owner,
    /// Unix seconds at checkin.
    pub timestamp: u64,
    /// Deck revision before the checkin.
    pub revision_before: Revision,
    /// Deck revision the checkin produced.
    pub revision_after: Revision,
    /// Per-record prior and new values, sorted by record id.
    pub changes: Vec<LoggedChange<R>>,
    /// Whether the entry has been rolled back.
    #[serde(default)]
    pub rolled_back: bool,
    /// Unix seconds of the rollback, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<u64>,
}

impl<R> MergeLogEntry<R> {
    /// Counts of records created, updated and deleted by the checkin.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.changes
            .iter()
            .fold((0, 0, 0), |(a, u, d), c| match (&c.before, &c.after) {
                (None, Some(_)) => (a + 1, u, d),
                (Some(_), Some(_)) => (a, u + 1, d),
                (Some(_), None) => (a, u, d + 1),
                (None, None) => (a, u, d),
            })
    }

    /// Listing view.
    pub fn summary(&self) -> MergeLogSummary {
        let (added, updated, deleted) = self.counts();
        MergeLogSummary {
            id: self.id,
            deck: self.deck.clone(),
            sandbox_id: self.sandbox_id,
            owner: self.owner.clone(),
            timestamp: self.timestamp,
            revision_before: self.revision_before,
            revision_after: self.revision_after,
            added,
            updated,
            deleted,
            rolled_back: self.rolled_back,
        }
    }
}

/// Listing view of a merge log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeLogSummary {
    /// Entry identity.
    pub id: MergeLogId,
    /// The deck that was written.
    pub deck: DeckIdentity,
    /// The sandbox that was checked in.
    pub sandbox_id: SandboxId,
    /// Its owner.
    pub owner: Owner,
    /// Unix seconds at checkin.
    pub timestamp: u64,
    /// Deck revision before the checkin.
    pub revision_before: Revision,
    /// Deck revision the checkin produced.
    pub revision_after: Revision,
    /// Records the checkin created.
    pub added: usize,
    /// Records the checkin changed in place.
    pub updated: usize,
    /// Records the checkin deleted.
    pub deleted: usize,
    /// Whether the entry has been rolled back.
    pub rolled_back: bool,
}

// ---------------------------------------------------------------------------
// MergeLog
// ---------------------------------------------------------------------------

/// Append-only (modulo pruning) store of merge log entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeLog<R> {
    next_id: u64,
    retain: usize,
    entries: BTreeMap<MergeLogId, MergeLogEntry<R>>,
}

impl<R> Default for MergeLog<R> {
    fn default() -> Self {
        Self::new(3)
    }
}

impl<R> MergeLog<R> {
    /// An empty log keeping the newest `retain` entries per deck.
    #[must_use]
    pub const fn new(retain: usize) -> Self {
        Self {
            next_id: 1,
            retain,
            entries: BTreeMap::new(),
        }
    }

    /// Change the retention limit. Takes effect at the next append.
    pub const fn set_retain(&mut self, retain: usize) {
        self.retain = retain;
    }

    /// Append an entry built from its assigned id, then prune the deck's
    /// oldest entries beyond the retention limit. Returns the new id and the
    /// ids pruned.
    pub fn append(
        &mut self,
        build: impl FnOnce(MergeLogId) -> MergeLogEntry<R>,
    ) -> (MergeLogId, Vec<MergeLogId>) {
        let id = MergeLogId(self.next_id);
        self.next_id += 1;
        let entry = build(id);
        let deck = entry.deck.clone();
        self.entries.insert(id, entry);

        let on_deck: Vec<MergeLogId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deck == deck)
            .map(|(id, _)| *id)
            .collect();
        let excess = on_deck.len().saturating_sub(self.retain.max(1));
        let pruned: Vec<MergeLogId> = on_deck.into_iter().take(excess).collect();
        for old in &pruned {
            self.entries.remove(old);
        }
        (id, pruned)
    }

    /// Look up an entry.
    pub fn get(&self, id: MergeLogId) -> Option<&MergeLogEntry<R>> {
        self.entries.get(&id)
    }

    /// Look up an entry for update.
    pub fn get_mut(&mut self, id: MergeLogId) -> Option<&mut MergeLogEntry<R>> {
        self.entries.get_mut(&id)
    }

    /// Entries on `deck`, newest first. `None` lists every deck.
    pub fn list(&self, deck: Option<&DeckIdentity>) -> Vec<MergeLogSummary> {
        self.entries
            .values()
            .rev()
            .filter(|e| deck.is_none_or(|d| *d == e.deck))
            .map(MergeLogEntry::summary)
            .collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
