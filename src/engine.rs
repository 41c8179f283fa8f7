//! The engine: sandbox lifecycle, edits, mergeability checks and resolution
//! over one [`RecordStore`].
//!
//! Checkin and rollback live in [`crate::checkin`].
//!
//! # Locking
//!
//! - Each sandbox sits behind its own mutex; every operation on it holds that
//!   mutex for its whole duration, so operations on one sandbox serialize.
//! - Checkout, checkin, rollback, import and journal compaction hold a
//!   per-deck mutex. It is always taken before any sandbox mutex, never
//!   after.
//! - The merge log mutex is only held for short reads and appends.
//!
//! # Journal compaction
//!
//! After a checkin, rollback, discard or purge the store journal of the deck
//! is cut back to the oldest `base_revision` among its open sandboxes (or the
//! current revision when none are open). Rollback reads live records, so the
//! merge log does not pin the journal.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use deckmerge_store::{DeckIdentity, MemStore, Record, RecordId, RecordStore, Revision, Write};
use serde::Serialize;
use tracing::instrument;

use crate::config::DeckmergeConfig;
use crate::error::EngineError;
use crate::merge::types::{ConflictSet, Resolution};
use crate::merge::{analyze, apply_resolutions, diff};
use crate::merge_log::{MergeLog, MergeLogEntry, MergeLogSummary};
use crate::model::record::{DeckRecord, Selection};
use crate::model::types::{ChangeCode, MergeLogId, Owner, SandboxId};
use crate::sandbox::arena::lock;
use crate::sandbox::{Sandbox, SandboxArena, SandboxFilter, SandboxHandle, SandboxSummary, tracker};

// ---------------------------------------------------------------------------
// EngineOptions
// ---------------------------------------------------------------------------

/// Tunables taken from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    /// Sandboxes idle for longer than this are purged.
    pub idle_ttl_secs: u64,
    /// Merge log entries kept per deck.
    pub merge_log_retain: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 72 * 3600,
            merge_log_retain: 3,
        }
    }
}

impl EngineOptions {
    /// Options from a loaded configuration.
    #[must_use]
    pub const fn from_config(config: &DeckmergeConfig) -> Self {
        Self {
            idle_ttl_secs: config.sandbox.idle_ttl_secs(),
            merge_log_retain: config.merge_log.retain,
        }
    }
}

/// Result of importing a deck.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// The new deck.
    pub deck: DeckIdentity,
    /// Its revision after the import.
    pub revision: Revision,
    /// Ids assigned to the imported records, in input order.
    pub ids: Vec<RecordId>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Sandbox-based merge engine over a record store `S` holding records `R`.
#[derive(Debug)]
pub struct Engine<R, S = MemStore<R>> {
    pub(crate) store: S,
    pub(crate) sandboxes: SandboxArena<R>,
    pub(crate) merge_log: Mutex<MergeLog<R>>,
    deck_locks: Mutex<HashMap<DeckIdentity, Arc<Mutex<()>>>>,
    pub(crate) options: EngineOptions,
}

impl<R: DeckRecord> Engine<R, MemStore<R>> {
    /// An engine over a fresh in-memory store.
    #[must_use]
    pub fn in_memory(options: EngineOptions) -> Self {
        Self::new(MemStore::new(), options)
    }
}

impl<R, S> Engine<R, S>
where
    R: DeckRecord,
    S: RecordStore<R>,
{
    /// An engine over `store` with no sandboxes and an empty merge log.
    pub fn new(store: S, options: EngineOptions) -> Self {
        Self::from_parts(
            store,
            SandboxArena::new(),
            MergeLog::new(options.merge_log_retain),
            options,
        )
    }

    /// Reassemble an engine from previously saved parts.
    pub fn from_parts(
        store: S,
        sandboxes: SandboxArena<R>,
        mut merge_log: MergeLog<R>,
        options: EngineOptions,
    ) -> Self {
        merge_log.set_retain(options.merge_log_retain);
        Self {
            store,
            sandboxes,
            merge_log: Mutex::new(merge_log),
            deck_locks: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// The underlying record store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The sandbox arena.
    pub const fn sandboxes(&self) -> &SandboxArena<R> {
        &self.sandboxes
    }

    /// Configured options.
    pub const fn options(&self) -> EngineOptions {
        self.options
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    pub(crate) fn merge_log(&self) -> MutexGuard<'_, MergeLog<R>> {
        self.merge_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The mutex serializing commits on `deck`.
    pub(crate) fn deck_lock(&self, deck: &DeckIdentity) -> Arc<Mutex<()>> {
        let mut locks = self.deck_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(deck.clone()).or_default())
    }

    pub(crate) fn handle(&self, id: SandboxId) -> Result<SandboxHandle<R>, EngineError> {
        self.sandboxes
            .get(id)
            .ok_or(EngineError::SandboxNotFound { id })
    }

    /// Fail unless `R` can live in `deck` and the deck has a baseline.
    pub(crate) fn ensure_deck(&self, deck: &DeckIdentity) -> Result<(), EngineError> {
        if !R::deck_types().contains(&deck.deck_type) {
            return Err(EngineError::DeckTypeMismatch {
                deck: deck.clone(),
                expected: R::deck_types().to_vec(),
            });
        }
        if !self.store.has_deck(deck)? {
            return Err(EngineError::DeckNotFound { deck: deck.clone() });
        }
        Ok(())
    }

    /// Drop journal entries no open sandbox on `deck` can still ask for.
    /// The caller holds the deck's mutex.
    pub(crate) fn compact_journal(&self, deck: &DeckIdentity) {
        let oldest_base = self
            .sandboxes
            .on_deck(deck, None)
            .iter()
            .map(|(_, h)| lock(h).base_revision)
            .min();
        let result = match oldest_base {
            Some(revision) => Ok(revision),
            None => self.store.revision(deck),
        }
        .and_then(|up_to| self.store.compact(deck, up_to));
        match result {
            Ok(0) => {}
            Ok(dropped) => tracing::debug!(%deck, dropped, "compacted journal"),
            Err(err) => tracing::warn!(%deck, error = %err, "journal compaction failed"),
        }
    }

    /// [`Self::compact_journal`] for callers not holding the deck's mutex.
    fn compact_journal_locked(&self, deck: &DeckIdentity) {
        let deck_lock = self.deck_lock(deck);
        let _guard = deck_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.compact_journal(deck);
    }

    /// Baseline of `deck` as it stood at `revision`.
    fn baseline_at(
        &self,
        deck: &DeckIdentity,
        revision: Revision,
    ) -> Result<BTreeMap<RecordId, R>, EngineError> {
        Ok(diff::load(&self.store, deck, revision)?.at_base)
    }

    /// Run an edit on a valid sandbox against its baseline, then touch it.
    fn edit<T>(
        &self,
        id: SandboxId,
        now: u64,
        f: impl FnOnce(&mut Sandbox<R>, &BTreeMap<RecordId, R>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let handle = self.handle(id)?;
        let mut sb = lock(&handle);
        if !sb.valid {
            return Err(EngineError::StaleSandbox { id });
        }
        let base = self.baseline_at(&sb.deck, sb.base_revision)?;
        let out = f(&mut *sb, &base)?;
        sb.touch(now);
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Decks
    // -----------------------------------------------------------------------

    /// Create `deck` with `records` as its first revision.
    ///
    /// # Errors
    /// `DeckTypeMismatch` if `R` cannot live in the deck, `Conflict` if the
    /// deck exists or two records share a natural key.
    #[instrument(skip_all, fields(deck = %deck))]
    pub fn import_deck(
        &self,
        deck: &DeckIdentity,
        records: Vec<R>,
    ) -> Result<ImportReport, EngineError> {
        if !R::deck_types().contains(&deck.deck_type) {
            return Err(EngineError::DeckTypeMismatch {
                deck: deck.clone(),
                expected: R::deck_types().to_vec(),
            });
        }
        let mut keys = BTreeMap::new();
        for (i, r) in records.iter().enumerate() {
            if let Some(prev) = keys.insert(r.natural_key(), i) {
                return Err(EngineError::Conflict {
                    detail: format!(
                        "import records {prev} and {i} share natural key {:?}",
                        r.natural_key()
                    ),
                });
            }
        }

        let deck_lock = self.deck_lock(deck);
        let _guard = deck_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.create_deck(deck)?;
        let mut ids = Vec::with_capacity(records.len());
        let mut writes = Vec::with_capacity(records.len());
        for r in records {
            let id = self.store.allocate_id(deck)?;
            ids.push(id);
            writes.push(Write::Upsert(Record::new(id, r)));
        }
        let receipt = self.store.commit(deck, writes)?;
        tracing::info!(records = ids.len(), revision = %receipt.revision, "imported deck");
        Ok(ImportReport {
            deck: deck.clone(),
            revision: receipt.revision,
            ids,
        })
    }

    // -----------------------------------------------------------------------
    // Sandbox lifecycle
    // -----------------------------------------------------------------------

    /// Open a sandbox on `deck` for `owner`. Nothing is copied; the sandbox
    /// remembers the deck's current revision.
    ///
    /// # Errors
    /// `DeckTypeMismatch` or `DeckNotFound`.
    #[instrument(skip_all, fields(deck = %deck, owner = %owner))]
    pub fn checkout(
        &self,
        deck: &DeckIdentity,
        selection: Selection,
        owner: Owner,
        now: u64,
    ) -> Result<SandboxId, EngineError> {
        self.ensure_deck(deck)?;
        // Compaction must see the new sandbox once its base revision is read.
        let deck_lock = self.deck_lock(deck);
        let _guard = deck_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let revision = self.store.revision(deck)?;
        let id = self.sandboxes.insert_with(|id| {
            Sandbox::new(id, deck.clone(), owner, selection, revision, now)
        });
        tracing::info!(sandbox = %id, %revision, "checked out sandbox");
        Ok(id)
    }

    /// Delete a sandbox and its entries. Returns whether it existed.
    #[instrument(skip(self))]
    pub fn discard(&self, id: SandboxId) -> bool {
        let Some(handle) = self.sandboxes.remove(id) else {
            return false;
        };
        let deck = lock(&handle).deck.clone();
        tracing::info!("discarded sandbox");
        self.compact_journal_locked(&deck);
        true
    }

    /// Mark a sandbox stale.
    ///
    /// # Errors
    /// `SandboxNotFound`.
    pub fn invalidate(&self, id: SandboxId) -> Result<(), EngineError> {
        let handle = self.handle(id)?;
        lock(&handle).invalidate();
        tracing::warn!(sandbox = %id, "sandbox invalidated");
        Ok(())
    }

    /// Bump a sandbox's last-updated time.
    ///
    /// # Errors
    /// `SandboxNotFound`.
    pub fn touch(&self, id: SandboxId, now: u64) -> Result<(), EngineError> {
        let handle = self.handle(id)?;
        lock(&handle).touch(now);
        Ok(())
    }

    /// A copy of a sandbox's full state.
    ///
    /// # Errors
    /// `SandboxNotFound`.
    pub fn sandbox(&self, id: SandboxId) -> Result<Sandbox<R>, EngineError> {
        let handle = self.handle(id)?;
        let sb = lock(&handle).clone();
        Ok(sb)
    }

    /// Summaries of sandboxes passing `filter`, sorted by id.
    pub fn list_sandboxes(&self, filter: &SandboxFilter) -> Vec<SandboxSummary> {
        self.sandboxes
            .handles()
            .into_iter()
            .filter_map(|(_, h)| {
                let sb = lock(&h);
                filter.matches(&*sb).then(|| sb.summary())
            })
            .collect()
    }

    /// Discard sandboxes idle for longer than the configured TTL. Returns the
    /// purged ids.
    #[instrument(skip(self))]
    pub fn purge_idle(&self, now: u64) -> Vec<SandboxId> {
        let ttl = self.options.idle_ttl_secs;
        let idle: Vec<SandboxId> = self
            .sandboxes
            .handles()
            .into_iter()
            .filter(|(_, h)| now.saturating_sub(lock(h).last_updated) > ttl)
            .map(|(id, _)| id)
            .collect();
        let mut decks = BTreeSet::new();
        for id in &idle {
            if let Some(handle) = self.sandboxes.remove(*id) {
                decks.insert(lock(&handle).deck.clone());
            }
        }
        if !idle.is_empty() {
            tracing::info!(purged = idle.len(), "purged idle sandboxes");
        }
        for deck in &decks {
            self.compact_journal_locked(deck);
        }
        idle
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    /// Records visible in the sandbox, sorted by id.
    ///
    /// # Errors
    /// `SandboxNotFound` or a store failure.
    pub fn sandbox_records(&self, id: SandboxId) -> Result<Vec<Record<R>>, EngineError> {
        let handle = self.handle(id)?;
        let sb = lock(&handle);
        let base = self.baseline_at(&sb.deck, sb.base_revision)?;
        Ok(tracker::visible_records(&*sb, &base))
    }

    /// Add a new record; returns its freshly allocated id.
    ///
    /// # Errors
    /// `StaleSandbox`, or `Conflict` if its natural key is taken or it lies
    /// outside the selection.
    #[instrument(skip(self, record))]
    pub fn add_record(&self, id: SandboxId, record: R, now: u64) -> Result<RecordId, EngineError> {
        let record_id = self.edit(id, now, |sb, base| {
            let deck = sb.deck.clone();
            tracker::add_new(sb, base, record, || {
                self.store.allocate_id(&deck).map_err(EngineError::from)
            })
        })?;
        tracing::debug!(record = %record_id, "added record");
        Ok(record_id)
    }

    /// Replace a visible record's content.
    ///
    /// # Errors
    /// `StaleSandbox`, `RecordNotFound` or `Conflict`.
    #[instrument(skip(self, record))]
    pub fn modify_record(
        &self,
        id: SandboxId,
        record_id: RecordId,
        record: R,
        now: u64,
    ) -> Result<ChangeCode, EngineError> {
        let code = self.edit(id, now, |sb, base| {
            tracker::modify(sb, base, record_id, record)
        })?;
        tracing::debug!(%code, "modified record");
        Ok(code)
    }

    /// Mark a visible record deleted. Returns `None` when the record was new
    /// in this sandbox and its entry was dropped instead.
    ///
    /// # Errors
    /// `StaleSandbox`, `RecordNotFound` or `Conflict`.
    #[instrument(skip(self))]
    pub fn delete_record(
        &self,
        id: SandboxId,
        record_id: RecordId,
        now: u64,
    ) -> Result<Option<ChangeCode>, EngineError> {
        let code = self.edit(id, now, |sb, base| tracker::mark_deleted(sb, base, record_id))?;
        tracing::debug!(dropped = code.is_none(), "deleted record");
        Ok(code)
    }

    /// Revert a record to the baseline. Returns whether there was anything to
    /// revert; undoing twice is a no-op.
    ///
    /// # Errors
    /// `SandboxNotFound` or `StaleSandbox`.
    #[instrument(skip(self))]
    pub fn undo_record(
        &self,
        id: SandboxId,
        record_id: RecordId,
        now: u64,
    ) -> Result<bool, EngineError> {
        let handle = self.handle(id)?;
        let mut sb = lock(&handle);
        if !sb.valid {
            return Err(EngineError::StaleSandbox { id });
        }
        let reverted = tracker::undo(&mut *sb, record_id);
        sb.touch(now);
        tracing::debug!(reverted, "undid record");
        Ok(reverted)
    }

    // -----------------------------------------------------------------------
    // Mergeability
    // -----------------------------------------------------------------------

    /// Compare a sandbox with the current baseline.
    ///
    /// # Errors
    /// `SandboxNotFound`, `DeckTypeMismatch`, `DeckNotFound` or a store
    /// failure.
    #[instrument(skip(self))]
    pub fn check_mergeable(&self, id: SandboxId) -> Result<ConflictSet<R>, EngineError> {
        let handle = self.handle(id)?;
        let sb = lock(&handle);
        self.ensure_deck(&sb.deck)?;
        let delta = diff::load(&self.store, &sb.deck, sb.base_revision)?;
        let set = analyze(&*sb, &delta).conflicts;
        tracing::debug!(
            conflicts = set.conflicts.len(),
            added = set.added,
            updated = set.updated,
            deleted = set.deleted,
            "checked mergeability"
        );
        Ok(set)
    }

    /// Fold the current baseline into a sandbox with one resolution per
    /// conflict. On success the sandbox is valid and based on the current
    /// revision.
    ///
    /// # Errors
    /// `IncompleteResolution` or `Conflict`; the sandbox is unchanged.
    #[instrument(skip(self, resolutions))]
    pub fn apply_resolutions(
        &self,
        id: SandboxId,
        resolutions: Vec<Resolution<R>>,
        now: u64,
    ) -> Result<SandboxId, EngineError> {
        let handle = self.handle(id)?;
        let mut sb = lock(&handle);
        self.ensure_deck(&sb.deck)?;
        let delta = diff::load(&self.store, &sb.deck, sb.base_revision)?;
        let analysis = analyze(&*sb, &delta);
        let resolved = analysis.conflicts.conflicts.len();
        apply_resolutions(&mut *sb, analysis, resolutions, now)?;
        tracing::info!(resolved, revision = %sb.base_revision, "applied merge resolutions");
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Merge log
    // -----------------------------------------------------------------------

    /// Merge log entries, newest first, optionally limited to one deck.
    pub fn merge_logs(&self, deck: Option<&DeckIdentity>) -> Vec<MergeLogSummary> {
        self.merge_log().list(deck)
    }

    /// One merge log entry in full.
    ///
    /// # Errors
    /// `MergeLogNotFound` if it never existed or was pruned.
    pub fn merge_log_entry(&self, id: MergeLogId) -> Result<MergeLogEntry<R>, EngineError> {
        self.merge_log()
            .get(id)
            .cloned()
            .ok_or(EngineError::MergeLogNotFound { id })
    }

    /// A copy of the whole merge log.
    pub fn merge_log_snapshot(&self) -> MergeLog<R> {
        self.merge_log().clone()
    }
}

#[cfg(test)]
mod tests {
    use deckmerge_store::{DeckType, Fault};

    use super::*;
    use crate::merge::types::MergeAction;
    use crate::model::deck::BDeckRecord;
    use crate::model::types::Dtg;

    fn deck() -> DeckIdentity {
        DeckIdentity::new("AL", 5, 2024, DeckType::B).unwrap()
    }

    fn fix(dtg: &str, wind: u16) -> BDeckRecord {
        BDeckRecord {
            dtg: Dtg::new(dtg).unwrap(),
            wind_radius_threshold: 34,
            lat_tenths: 200,
            lon_tenths: -600,
            max_wind_kt: wind,
            min_pressure_mb: None,
            storm_type: "TS".to_owned(),
            radii_nm: [0; 4],
        }
    }

    fn engine() -> (Engine<BDeckRecord>, Vec<RecordId>) {
        let engine = Engine::in_memory(EngineOptions::default());
        let report = engine
            .import_deck(
                &deck(),
                vec![fix("2024081500", 50), fix("2024081506", 55)],
            )
            .unwrap();
        (engine, report.ids)
    }

    fn owner(name: &str) -> Owner {
        Owner::new(name).unwrap()
    }

    #[test]
    fn import_rejects_duplicate_keys_and_existing_decks() {
        let (engine, _) = engine();
        let err = engine.import_deck(&deck(), vec![]).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));

        let other = DeckIdentity::new("AL", 6, 2024, DeckType::B).unwrap();
        let err = engine
            .import_deck(&other, vec![fix("2024081500", 1), fix("2024081500", 2)])
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }

    #[test]
    fn checkout_validates_deck() {
        let (engine, _) = engine();
        let missing = DeckIdentity::new("AL", 9, 2024, DeckType::B).unwrap();
        assert!(matches!(
            engine.checkout(&missing, Selection::all(), owner("a"), 1),
            Err(EngineError::DeckNotFound { .. })
        ));
        let wrong = DeckIdentity::new("AL", 5, 2024, DeckType::A).unwrap();
        assert!(matches!(
            engine.checkout(&wrong, Selection::all(), owner("a"), 1),
            Err(EngineError::DeckTypeMismatch { .. })
        ));
    }

    #[test]
    fn edits_touch_and_show_in_view() {
        let (engine, ids) = engine();
        let sb = engine
            .checkout(&deck(), Selection::all(), owner("alice"), 10)
            .unwrap();
        engine.modify_record(sb, ids[0], fix("2024081500", 60), 20).unwrap();
        let new_id = engine.add_record(sb, fix("2024081512", 65), 30).unwrap();
        engine.delete_record(sb, ids[1], 40).unwrap();

        let view = engine.sandbox_records(sb).unwrap();
        let ids_in_view: Vec<_> = view.iter().map(|r| r.id).collect();
        assert_eq!(ids_in_view, vec![ids[0], new_id]);
        assert_eq!(engine.sandbox(sb).unwrap().last_updated, 40);

        // Baseline is untouched.
        assert_eq!(engine.store().get(&deck(), &|_| true).unwrap().len(), 2);
    }

    #[test]
    fn undo_twice_is_noop() {
        let (engine, ids) = engine();
        let sb = engine
            .checkout(&deck(), Selection::all(), owner("alice"), 10)
            .unwrap();
        engine.modify_record(sb, ids[0], fix("2024081500", 60), 20).unwrap();
        assert!(engine.undo_record(sb, ids[0], 21).unwrap());
        assert!(!engine.undo_record(sb, ids[0], 22).unwrap());
        assert!(engine.sandbox(sb).unwrap().entries.is_empty());
    }

    #[test]
    fn stale_sandbox_rejects_edits() {
        let (engine, ids) = engine();
        let sb = engine
            .checkout(&deck(), Selection::all(), owner("alice"), 10)
            .unwrap();
        engine.invalidate(sb).unwrap();
        assert!(matches!(
            engine.modify_record(sb, ids[0], fix("2024081500", 60), 20),
            Err(EngineError::StaleSandbox { .. })
        ));
        assert!(matches!(
            engine.undo_record(sb, ids[0], 20),
            Err(EngineError::StaleSandbox { .. })
        ));
    }

    #[test]
    fn discard_is_idempotent() {
        let (engine, _) = engine();
        let sb = engine
            .checkout(&deck(), Selection::all(), owner("alice"), 10)
            .unwrap();
        assert!(engine.discard(sb));
        assert!(!engine.discard(sb));
        assert!(matches!(
            engine.sandbox_records(sb),
            Err(EngineError::SandboxNotFound { .. })
        ));
    }

    #[test]
    fn list_filters_by_owner_and_validity() {
        let (engine, _) = engine();
        let a = engine
            .checkout(&deck(), Selection::all(), owner("alice"), 10)
            .unwrap();
        let b = engine
            .checkout(&deck(), Selection::all(), owner("bob"), 10)
            .unwrap();
        engine.invalidate(b).unwrap();

        let alice = engine.list_sandboxes(&SandboxFilter {
            owner: Some(owner("alice")),
            ..SandboxFilter::default()
        });
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].id, a);

        let stale = engine.list_sandboxes(&SandboxFilter {
            valid: Some(false),
            ..SandboxFilter::default()
        });
        assert_eq!(stale.iter().map(|s| s.id).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn purge_idle_removes_only_expired() {
        let engine: Engine<BDeckRecord> = Engine::in_memory(EngineOptions {
            idle_ttl_secs: 100,
            merge_log_retain: 3,
        });
        engine.import_deck(&deck(), vec![fix("2024081500", 50)]).unwrap();
        let old = engine
            .checkout(&deck(), Selection::all(), owner("a"), 0)
            .unwrap();
        let fresh = engine
            .checkout(&deck(), Selection::all(), owner("b"), 150)
            .unwrap();
        assert_eq!(engine.purge_idle(200), vec![old]);
        assert!(engine.sandbox(fresh).is_ok());
        assert!(engine.sandbox(old).is_err());
    }

    #[test]
    fn resolutions_revalidate_a_stale_sandbox() {
        let (engine, ids) = engine();
        let sb = engine
            .checkout(&deck(), Selection::all(), owner("alice"), 10)
            .unwrap();
        engine.modify_record(sb, ids[0], fix("2024081500", 60), 20).unwrap();

        let receipt = engine
            .store()
            .commit(
                &deck(),
                vec![Write::Upsert(Record::new(ids[0], fix("2024081500", 70)))],
            )
            .unwrap();
        engine.invalidate(sb).unwrap();

        let set = engine.check_mergeable(sb).unwrap();
        assert_eq!(set.conflict_ids(), vec![ids[0]]);
        assert_eq!(set.current_revision, receipt.revision);

        engine
            .apply_resolutions(sb, vec![Resolution::new(ids[0], MergeAction::UseSandbox)], 30)
            .unwrap();
        let state = engine.sandbox(sb).unwrap();
        assert!(state.valid);
        assert_eq!(state.base_revision, receipt.revision);
        assert!(engine.check_mergeable(sb).unwrap().is_clean());
    }

    #[test]
    fn read_fault_surfaces_as_store_unavailable() {
        let (engine, _) = engine();
        let sb = engine
            .checkout(&deck(), Selection::all(), owner("alice"), 10)
            .unwrap();
        engine.store().inject(Fault::FailRead);
        assert!(matches!(
            engine.sandbox_records(sb),
            Err(EngineError::StoreUnavailable { .. })
        ));
        assert!(engine.sandbox_records(sb).is_ok());
    }

    fn journal_len(engine: &Engine<BDeckRecord>) -> usize {
        engine.store().snapshot().unwrap().decks[0].journal.len()
    }

    #[test]
    fn journal_stays_empty_without_open_sandboxes() {
        let (engine, ids) = engine();
        for round in 0..200_u16 {
            let sb = engine
                .checkout(&deck(), Selection::all(), owner("alice"), 1)
                .unwrap();
            engine
                .modify_record(sb, ids[0], fix("2024081500", 60 + round % 2), 2)
                .unwrap();
            engine.checkin(sb, 3).unwrap();
        }
        assert_eq!(engine.store().revision(&deck()).unwrap(), Revision(201));
        assert_eq!(journal_len(&engine), 0);
    }

    #[test]
    fn open_sandboxes_pin_the_journal() {
        let (engine, ids) = engine();
        let pinned = engine
            .checkout(&deck(), Selection::all(), owner("alice"), 1)
            .unwrap();
        let sb = engine
            .checkout(&deck(), Selection::all(), owner("bob"), 1)
            .unwrap();
        engine.modify_record(sb, ids[1], fix("2024081506", 57), 2).unwrap();
        engine.checkin(sb, 3).unwrap();

        // The import is dropped; the checkin after alice's base is kept.
        assert_eq!(journal_len(&engine), 1);
        assert_eq!(engine.check_mergeable(pinned).unwrap().updated, 1);

        assert!(engine.discard(pinned));
        assert_eq!(journal_len(&engine), 0);

        let idle = engine
            .checkout(&deck(), Selection::all(), owner("carol"), 1)
            .unwrap();
        let sb = engine
            .checkout(&deck(), Selection::all(), owner("dave"), 1)
            .unwrap();
        engine.modify_record(sb, ids[0], fix("2024081500", 61), 2).unwrap();
        engine.checkin(sb, 3).unwrap();
        assert_eq!(journal_len(&engine), 1);

        let ttl = engine.options().idle_ttl_secs;
        assert_eq!(engine.purge_idle(ttl + 10), vec![idle]);
        assert_eq!(journal_len(&engine), 0);
    }
}
