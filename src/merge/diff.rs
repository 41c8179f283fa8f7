//! Baseline delta: what the baseline looked like at a sandbox's base
//! revision, what it looks like now, and the net change per record.
//!
//! Everything is derived from one read of the committed records plus the
//! journal since the base revision:
//!
//! - the value at the base revision of any record written since then is the
//!   `before` of its first journal entry;
//! - its current value is the `after` of its last journal entry;
//! - records absent from the journal are the same at both revisions.
//!
//! The records and the journal can be read at slightly different times; the
//! journal always wins, so the result describes one consistent revision.

use std::collections::BTreeMap;

use deckmerge_store::{DeckIdentity, JournalEntry, Record, RecordId, RecordStore, Revision};

use crate::error::EngineError;
use crate::merge::types::BaselineChange;

/// Baseline at a base revision, baseline now, and the changes between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaselineDelta<R> {
    /// The base revision.
    pub base_revision: Revision,
    /// The newest revision seen in the journal (or the base if none).
    pub current_revision: Revision,
    /// Records at the base revision.
    pub at_base: BTreeMap<RecordId, R>,
    /// Records at `current_revision`.
    pub current: BTreeMap<RecordId, R>,
    /// Net change per record, omitting records that ended where they began.
    pub changes: BTreeMap<RecordId, BaselineChange<R>>,
}

/// First `before` and last `after` of every record id in `journal`.
pub fn collapse<R: Clone>(
    journal: &[JournalEntry<R>],
) -> BTreeMap<RecordId, (Option<R>, Option<R>)> {
    let mut net: BTreeMap<RecordId, (Option<R>, Option<R>)> = BTreeMap::new();
    for entry in journal {
        net.entry(entry.record_id)
            .and_modify(|(_, after)| after.clone_from(&entry.after))
            .or_insert_with(|| (entry.before.clone(), entry.after.clone()));
    }
    net
}

/// Build a delta from records read at or after `base_revision` and the
/// journal since `base_revision`.
pub fn from_parts<R: Clone + PartialEq>(
    records: Vec<Record<R>>,
    journal: &[JournalEntry<R>],
    base_revision: Revision,
) -> BaselineDelta<R> {
    let current_revision = journal.last().map_or(base_revision, |e| e.revision);
    let mut at_base: BTreeMap<RecordId, R> =
        records.into_iter().map(|r| (r.id, r.data)).collect();
    let mut current = at_base.clone();
    let mut changes = BTreeMap::new();

    for (id, (before, after)) in collapse(journal) {
        match &before {
            Some(r) => at_base.insert(id, r.clone()),
            None => at_base.remove(&id),
        };
        match &after {
            Some(r) => current.insert(id, r.clone()),
            None => current.remove(&id),
        };
        if let Some(change) = BaselineChange::classify(before, after) {
            changes.insert(id, change);
        }
    }

    BaselineDelta {
        base_revision,
        current_revision,
        at_base,
        current,
        changes,
    }
}

/// Read the delta of `deck` since `base_revision` from the store.
///
/// # Errors
/// Store failures map to [`EngineError`].
pub fn load<R, S>(
    store: &S,
    deck: &DeckIdentity,
    base_revision: Revision,
) -> Result<BaselineDelta<R>, EngineError>
where
    R: Clone + PartialEq,
    S: RecordStore<R> + ?Sized,
{
    let records = store.get(deck, &|_| true)?;
    let journal = store.changes_since(deck, base_revision)?;
    Ok(from_parts(records, &journal, base_revision))
}
