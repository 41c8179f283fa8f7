//! Checkin and rollback: the only paths that write the baseline.
//!
//! Both run under the deck's commit mutex, so the baseline they read and the
//! batch they commit are atomic relative to every other checkin.
//!
//! # Checkin
//!
//! 1. Re-run the mergeability check. Any conflict invalidates the sandbox.
//! 2. Fold the baseline's clean changes into a copy of the sandbox.
//! 3. Plan the writes and verify the resulting baseline keeps natural keys
//!    unique. Recreated records are written under freshly allocated ids.
//! 4. Commit. A partial commit is compensated by writing the captured prior
//!    values back.
//! 5. Log, drop the sandbox, and invalidate other sandboxes on the deck whose
//!    edits overlap the committed records.
//!
//! A failed checkin leaves both the baseline and the sandbox as they were.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::PoisonError;

use deckmerge_store::{
    DeckIdentity, Record, RecordId, RecordStore, Revision, StoreError, Write,
};
use serde::Serialize;
use tracing::instrument;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::merge::{analyze, apply_resolutions, diff};
use crate::merge_log::{LoggedChange, MergeLogEntry};
use crate::model::record::{DeckRecord, RecordIdentity};
use crate::model::types::{ChangeCode, MergeLogId, SandboxId};
use crate::sandbox::Sandbox;
use crate::sandbox::arena::lock;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of a successful checkin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckinReport {
    /// The sandbox that was checked in (and no longer exists).
    pub sandbox_id: SandboxId,
    /// The merge log entry, or `None` if the sandbox had nothing to write.
    pub merge_log_id: Option<MergeLogId>,
    /// Deck revision after the checkin.
    pub revision: Revision,
    /// Number of records written.
    pub written: usize,
    /// Other sandboxes this checkin made stale.
    pub invalidated: Vec<SandboxId>,
}

/// Outcome of a successful rollback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// The reversed entry.
    pub merge_log_id: MergeLogId,
    /// Deck revision after the rollback.
    pub revision: Revision,
    /// Number of records restored.
    pub restored: usize,
    /// Sandboxes made stale by the restored records.
    pub invalidated: Vec<SandboxId>,
}

// ---------------------------------------------------------------------------
// Write planning
// ---------------------------------------------------------------------------

/// Writes to commit plus, per written id, the committed value before them.
struct WritePlan<R> {
    writes: Vec<Write<R>>,
    prior: BTreeMap<RecordId, Option<R>>,
}

impl<R: DeckRecord> WritePlan<R> {
    fn build(
        sandbox: &Sandbox<R>,
        current: &BTreeMap<RecordId, R>,
        mut allocate: impl FnMut() -> Result<RecordId, EngineError>,
    ) -> Result<Self, EngineError> {
        let mut writes = Vec::new();
        for (&id, entry) in &sandbox.entries {
            match entry.code {
                ChangeCode::Unchanged => {}
                // A recreated record gets a fresh id; committed ids are never
                // written again once tombstoned.
                ChangeCode::New if sandbox.recreated.contains(&id) || current.contains_key(&id) => {
                    if current.contains_key(&id) {
                        writes.push(Write::Tombstone(id));
                    }
                    let fresh = allocate()?;
                    writes.push(Write::Upsert(Record::new(fresh, entry.record.clone())));
                }
                ChangeCode::New | ChangeCode::Modify => {
                    if current.get(&id) != Some(&entry.record) {
                        writes.push(Write::Upsert(Record::new(id, entry.record.clone())));
                    }
                }
                ChangeCode::Delete => {
                    if current.contains_key(&id) {
                        writes.push(Write::Tombstone(id));
                    }
                }
            }
        }
        let prior = writes
            .iter()
            .map(|w| (w.id(), current.get(&w.id()).cloned()))
            .collect();
        Ok(Self { writes, prior })
    }

    /// Writes restoring the prior value of the first `applied` writes.
    fn compensation(&self, applied: usize) -> Vec<Write<R>> {
        self.writes
            .iter()
            .take(applied)
            .rev()
            .map(|w| restore(w.id(), self.prior.get(&w.id()).cloned().flatten()))
            .collect()
    }

    fn changes(&self) -> Vec<LoggedChange<R>> {
        let after: BTreeMap<RecordId, Option<R>> = self
            .writes
            .iter()
            .map(|w| match w {
                Write::Upsert(r) => (r.id, Some(r.data.clone())),
                Write::Tombstone(id) => (*id, None),
            })
            .collect();
        after
            .into_iter()
            .map(|(record_id, after)| LoggedChange {
                record_id,
                before: self.prior.get(&record_id).cloned().flatten(),
                after,
            })
            .collect()
    }
}

fn restore<R>(id: RecordId, value: Option<R>) -> Write<R> {
    match value {
        Some(data) => Write::Upsert(Record::new(id, data)),
        None => Write::Tombstone(id),
    }
}

/// Fail if applying `writes` to `current` would leave two records with the
/// same natural key.
fn ensure_unique_keys<R: DeckRecord>(
    current: &BTreeMap<RecordId, R>,
    writes: &[Write<R>],
) -> Result<(), EngineError> {
    let mut result: BTreeMap<RecordId, &R> = current.iter().map(|(id, r)| (*id, r)).collect();
    for w in writes {
        match w {
            Write::Upsert(r) => {
                result.insert(r.id, &r.data);
            }
            Write::Tombstone(id) => {
                result.remove(id);
            }
        }
    }
    let mut seen: BTreeMap<R::Key, RecordId> = BTreeMap::new();
    for (id, r) in result {
        if let Some(other) = seen.insert(r.natural_key(), id) {
            return Err(EngineError::Conflict {
                detail: format!(
                    "records {other} and {id} would share natural key {:?}",
                    r.natural_key()
                ),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Engine: checkin / rollback
// ---------------------------------------------------------------------------

impl<R, S> Engine<R, S>
where
    R: DeckRecord,
    S: RecordStore<R>,
{
    /// Commit `writes` as one batch. A partial commit is repaired with
    /// `compensate(applied)`.
    fn commit_or_compensate(
        &self,
        deck: &DeckIdentity,
        writes: Vec<Write<R>>,
        compensate: impl FnOnce(usize) -> Vec<Write<R>>,
    ) -> Result<Revision, EngineError> {
        match self.store.commit(deck, writes) {
            Ok(receipt) => Ok(receipt.revision),
            Err(err @ StoreError::PartialCommit { applied, .. }) => {
                let repair = compensate(applied);
                match self.store.commit(deck, repair) {
                    Ok(_) => {
                        tracing::warn!(%deck, applied, "partial commit rolled back");
                        Err(EngineError::StoreUnavailable {
                            detail: format!("{err}; the partial write was reverted"),
                        })
                    }
                    Err(repair_err) => {
                        tracing::error!(%deck, applied, error = %repair_err, "compensation failed");
                        Err(EngineError::Inconsistent {
                            deck: deck.clone(),
                            detail: format!("{err}; compensation failed: {repair_err}"),
                        })
                    }
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Invalidate every sandbox on `deck` (other than `except`) whose edits
    /// touch `ids` or whose new records collide with `keys`. Returns them.
    fn invalidate_overlapping(
        &self,
        deck: &DeckIdentity,
        except: Option<SandboxId>,
        ids: &BTreeSet<RecordId>,
        keys: &BTreeSet<R::Key>,
    ) -> Vec<SandboxId> {
        let mut invalidated = Vec::new();
        for (id, handle) in self.sandboxes.on_deck(deck, except) {
            let mut sb = lock(&handle);
            let touches = sb.touched_ids().any(|rid| ids.contains(&rid));
            let collides = sb
                .entries_with(ChangeCode::New)
                .any(|(_, r)| keys.contains(&r.natural_key()));
            if touches || collides {
                sb.invalidate();
                tracing::warn!(sandbox = %id, "sandbox invalidated by a commit");
                invalidated.push(id);
            }
        }
        invalidated
    }

    /// Commit a valid sandbox into the baseline.
    ///
    /// # Errors
    /// - `SandboxNotFound`, `DeckNotFound`, `DeckTypeMismatch`.
    /// - `StaleSandbox` if the sandbox is invalid or conflicts with the
    ///   current baseline (it is invalidated).
    /// - `Conflict` if the result would duplicate a natural key.
    /// - `StoreUnavailable` / `Inconsistent` on store failure.
    #[instrument(skip(self))]
    pub fn checkin(&self, id: SandboxId, now: u64) -> Result<CheckinReport, EngineError> {
        let handle = self.handle(id)?;
        let deck = lock(&handle).deck.clone();
        let deck_lock = self.deck_lock(&deck);
        let _guard = deck_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut sb = lock(&handle);
        if self.sandboxes.get(id).is_none() {
            return Err(EngineError::SandboxNotFound { id });
        }
        if !sb.valid {
            return Err(EngineError::StaleSandbox { id });
        }
        self.ensure_deck(&deck)?;

        let delta = diff::load(&self.store, &deck, sb.base_revision)?;
        let analysis = analyze(&*sb, &delta);
        if !analysis.conflicts.is_clean() {
            sb.invalidate();
            tracing::warn!(
                conflicts = analysis.conflicts.conflicts.len(),
                "baseline moved under sandbox; re-merge required"
            );
            return Err(EngineError::StaleSandbox { id });
        }

        let mut staged = sb.clone();
        apply_resolutions(&mut staged, analysis, Vec::new(), now)?;
        let plan = WritePlan::build(&staged, &delta.current, || {
            self.store.allocate_id(&deck).map_err(EngineError::from)
        })?;
        ensure_unique_keys(&delta.current, &plan.writes)?;

        let revision_before = self.store.revision(&deck)?;
        let written = plan.writes.len();
        if written == 0 {
            self.sandboxes.remove(id);
            drop(sb);
            self.compact_journal(&deck);
            tracing::info!("checked in sandbox with nothing to write");
            return Ok(CheckinReport {
                sandbox_id: id,
                merge_log_id: None,
                revision: revision_before,
                written,
                invalidated: Vec::new(),
            });
        }

        let committed_ids: BTreeSet<RecordId> = plan.writes.iter().map(Write::id).collect();
        let committed_keys: BTreeSet<R::Key> = plan
            .writes
            .iter()
            .filter_map(|w| match w {
                Write::Upsert(r) => Some(r.data.natural_key()),
                Write::Tombstone(_) => None,
            })
            .collect();
        let revision = self.commit_or_compensate(&deck, plan.writes.clone(), |applied| {
            plan.compensation(applied)
        })?;

        let (log_id, pruned) = self.merge_log().append(|log_id| MergeLogEntry {
            id: log_id,
            deck: deck.clone(),
            sandbox_id: id,
            owner: sb.owner.clone(),
            timestamp: now,
            revision_before,
            revision_after: revision,
            changes: plan.changes(),
            rolled_back: false,
            rolled_back_at: None,
        });
        if !pruned.is_empty() {
            tracing::debug!(?pruned, "pruned merge log entries");
        }

        self.sandboxes.remove(id);
        drop(sb);
        let invalidated =
            self.invalidate_overlapping(&deck, Some(id), &committed_ids, &committed_keys);
        self.compact_journal(&deck);
        tracing::info!(
            merge_log = %log_id,
            %revision,
            written,
            invalidated = invalidated.len(),
            "checked in sandbox"
        );
        Ok(CheckinReport {
            sandbox_id: id,
            merge_log_id: Some(log_id),
            revision,
            written,
            invalidated,
        })
    }

    /// Reverse a merge log entry, exactly once.
    ///
    /// # Errors
    /// - `MergeLogNotFound` if the entry never existed or was pruned.
    /// - `AlreadyRolledBack` on a repeat call.
    /// - `Conflict` if a later commit changed any of the entry's records.
    /// - `StoreUnavailable` / `Inconsistent` on store failure.
    #[instrument(skip(self))]
    pub fn rollback(&self, log_id: MergeLogId, now: u64) -> Result<RollbackReport, EngineError> {
        let deck = self
            .merge_log()
            .get(log_id)
            .map(|e| e.deck.clone())
            .ok_or(EngineError::MergeLogNotFound { id: log_id })?;
        let deck_lock = self.deck_lock(&deck);
        let _guard = deck_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = self
            .merge_log()
            .get(log_id)
            .cloned()
            .ok_or(EngineError::MergeLogNotFound { id: log_id })?;
        if entry.rolled_back {
            return Err(EngineError::AlreadyRolledBack { id: log_id });
        }

        for change in &entry.changes {
            let current = self
                .store
                .get_record(&deck, change.record_id)?
                .map(|r| r.data);
            if current != change.after {
                return Err(EngineError::Conflict {
                    detail: format!(
                        "record {} changed after merge log entry {log_id}",
                        change.record_id
                    ),
                });
            }
        }

        let writes: Vec<Write<R>> = entry
            .changes
            .iter()
            .map(|c| restore(c.record_id, c.before.clone()))
            .collect();
        let revision = self.commit_or_compensate(&deck, writes, |applied| {
            entry
                .changes
                .iter()
                .take(applied)
                .rev()
                .map(|c| restore(c.record_id, c.after.clone()))
                .collect()
        })?;

        if let Some(logged) = self.merge_log().get_mut(log_id) {
            logged.rolled_back = true;
            logged.rolled_back_at = Some(now);
        }

        let ids: BTreeSet<RecordId> = entry.changes.iter().map(|c| c.record_id).collect();
        let keys: BTreeSet<R::Key> = entry
            .changes
            .iter()
            .filter_map(|c| c.before.as_ref().map(RecordIdentity::natural_key))
            .collect();
        let invalidated = self.invalidate_overlapping(&deck, None, &ids, &keys);
        self.compact_journal(&deck);
        tracing::info!(
            merge_log = %log_id,
            %revision,
            restored = entry.changes.len(),
            invalidated = invalidated.len(),
            "rolled back merge"
        );
        Ok(RollbackReport {
            merge_log_id: log_id,
            revision,
            restored: entry.changes.len(),
            invalidated,
        })
    }
}
