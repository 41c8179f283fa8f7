//! Mergeability check: cross a sandbox's entries with the baseline's
//! concurrent changes.
//!
//! Every record the baseline changed since the sandbox's base revision ends
//! up in exactly one of two places:
//!
//! - a [`ConflictRecordPair`] if the sandbox also changed it, or
//! - a fold ([`EntryUpdate`]) that brings the baseline change into the
//!   sandbox as `Unchanged` (or drops a stale shadow).
//!
//! | sandbox \ baseline | New               | Modify                  | Delete           |
//! |--------------------|-------------------|-------------------------|------------------|
//! | none / Unchanged   | fold              | fold                    | fold             |
//! | New                | conflict          | conflict                | conflict         |
//! | Modify             | conflict          | conflict unless equal   | conflict         |
//! | Delete             | conflict          | conflict                | fold             |
//!
//! A sandbox `New` is also paired with a baseline `New` or `Modify` of a
//! different id when the baseline record's new natural key matches.

use std::collections::BTreeMap;

use deckmerge_store::RecordId;

use crate::merge::diff::BaselineDelta;
use crate::merge::types::{
    BaselineChange, BaselineChangeKind, ConflictRecordPair, ConflictSet, MergeAction,
};
use crate::model::record::DeckRecord;
use crate::model::types::ChangeCode;
use crate::sandbox::Sandbox;

// ---------------------------------------------------------------------------
// EntryUpdate / MergeAnalysis
// ---------------------------------------------------------------------------

/// One change to a sandbox's entry set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryUpdate<R> {
    /// Insert or replace the entry for `id`.
    Set {
        /// Record id.
        id: RecordId,
        /// New change code.
        code: ChangeCode,
        /// New content snapshot.
        record: R,
    },
    /// Bring back a committed record as `New`; checkin gives it a fresh id.
    Recreate {
        /// Id of the committed record.
        id: RecordId,
        /// Content to recreate it with.
        record: R,
    },
    /// Drop the entry for `id`.
    Remove {
        /// Record id.
        id: RecordId,
    },
}

/// Result of analysing a sandbox against a baseline delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeAnalysis<R> {
    /// Conflicts and clean-change counts.
    pub conflicts: ConflictSet<R>,
    /// Updates that fold the non-conflicting baseline changes into the
    /// sandbox.
    pub folds: Vec<EntryUpdate<R>>,
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tally {
    added: usize,
    updated: usize,
    deleted: usize,
}

impl Tally {
    fn count(&mut self, kind: BaselineChangeKind) {
        match kind {
            BaselineChangeKind::New => self.added += 1,
            BaselineChangeKind::Modify => self.updated += 1,
            BaselineChangeKind::Delete => self.deleted += 1,
        }
    }
}

/// Fold a non-conflicting baseline change into the sandbox.
fn fold<R: Clone>(id: RecordId, change: &BaselineChange<R>) -> EntryUpdate<R> {
    match change.after() {
        Some(after) => EntryUpdate::Set {
            id,
            code: ChangeCode::Unchanged,
            record: after.clone(),
        },
        None => EntryUpdate::Remove { id },
    }
}

fn pair<R: DeckRecord>(
    record_id: RecordId,
    baseline_record_id: RecordId,
    code: ChangeCode,
    sandbox_record: &R,
    change: &BaselineChange<R>,
    actions: Vec<MergeAction>,
) -> ConflictRecordPair<R> {
    let theirs = change.after().or_else(|| change.before());
    ConflictRecordPair {
        record_id,
        baseline_record_id,
        sandbox_code: code,
        sandbox_record: sandbox_record.clone(),
        baseline_change: change.kind(),
        baseline_before: change.before().cloned(),
        baseline_after: change.after().cloned(),
        actions,
        field_diffs: theirs.map_or_else(Vec::new, |t| sandbox_record.diff_fields(t)),
    }
}

/// Actions offered for a sandbox-code × baseline-kind pairing.
#[must_use]
pub fn offered_actions(code: ChangeCode, kind: BaselineChangeKind) -> Vec<MergeAction> {
    use BaselineChangeKind as B;
    use MergeAction::{Merged, UseBaseline, UseSandbox};
    match (code, kind) {
        (ChangeCode::Modify, B::Modify) => vec![UseSandbox, UseBaseline, Merged],
        (ChangeCode::Modify, B::Delete) | (ChangeCode::Delete, B::Modify) => {
            vec![UseBaseline, UseSandbox]
        }
        (ChangeCode::New, _)
        | (ChangeCode::Modify | ChangeCode::Delete, B::New)
        | (ChangeCode::Delete, B::Delete)
        | (ChangeCode::Unchanged, _) => vec![UseSandbox, UseBaseline],
    }
}

/// Compare `sandbox` with `delta` (which must be based on the sandbox's
/// `base_revision`).
pub fn analyze<R: DeckRecord>(sandbox: &Sandbox<R>, delta: &BaselineDelta<R>) -> MergeAnalysis<R> {
    let mut conflicts = Vec::new();
    let mut folds = Vec::new();
    let mut tally = Tally::default();

    // Sandbox New entries the baseline has not touched by id, for pairing by
    // natural key.
    let mut new_by_key: BTreeMap<R::Key, RecordId> = sandbox
        .entries_with(ChangeCode::New)
        .filter(|(id, _)| !delta.changes.contains_key(id))
        .map(|(id, r)| (r.natural_key(), id))
        .collect();

    for (&id, change) in &delta.changes {
        let kind = change.kind();
        let Some(entry) = sandbox.entries.get(&id) else {
            let twin = match change {
                BaselineChange::New { after } | BaselineChange::Modify { after, .. } => {
                    new_by_key.remove(&after.natural_key()).map(|sid| (sid, after))
                }
                BaselineChange::Delete { .. } => None,
            };
            match twin {
                Some((sid, after)) => {
                    let ours = &sandbox.entries[&sid].record;
                    if ours == after {
                        folds.push(EntryUpdate::Remove { id: sid });
                        folds.push(fold(id, change));
                        tally.count(kind);
                    } else {
                        conflicts.push(pair(
                            sid,
                            id,
                            ChangeCode::New,
                            ours,
                            change,
                            offered_actions(ChangeCode::New, kind),
                        ));
                    }
                }
                None => {
                    folds.push(fold(id, change));
                    tally.count(kind);
                }
            }
            continue;
        };

        let clean = match (entry.code, kind) {
            (ChangeCode::Unchanged, _) | (ChangeCode::Delete, BaselineChangeKind::Delete) => true,
            (ChangeCode::Modify, BaselineChangeKind::Modify) => {
                change.after() == Some(&entry.record)
            }
            (ChangeCode::New | ChangeCode::Modify | ChangeCode::Delete, _) => false,
        };
        if clean {
            folds.push(fold(id, change));
            tally.count(kind);
        } else {
            conflicts.push(pair(
                id,
                id,
                entry.code,
                &entry.record,
                change,
                offered_actions(entry.code, kind),
            ));
        }
    }

    conflicts.sort_by_key(|c| c.record_id);
    MergeAnalysis {
        conflicts: ConflictSet {
            sandbox_id: sandbox.id,
            deck: sandbox.deck.clone(),
            base_revision: delta.base_revision,
            current_revision: delta.current_revision,
            added: tally.added,
            updated: tally.updated,
            deleted: tally.deleted,
            conflicts,
        },
        folds,
    }
}
