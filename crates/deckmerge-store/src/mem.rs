//! In-memory [`RecordStore`] implementation.
//!
//! [`MemStore`] keeps every deck as an ordered map of records plus a journal
//! of applied writes. All state sits behind one `RwLock`, so a commit is
//! atomic with respect to every other reader and writer.
//!
//! Faults are injected per instance with [`MemStore::inject`]. Each fault
//! fires once and is then cleared.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::RecordStore;
use crate::types::{CommitReceipt, DeckIdentity, JournalEntry, Record, RecordId, Revision, Write};

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// A one-shot failure to inject into the next matching operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The next commit fails before writing anything.
    FailCommit,
    /// The next commit applies this many writes, then fails. Models a
    /// backend without multi-record transactions.
    FailAfterWrites(usize),
    /// The next read (`get`, `get_record`, `revision`, `changes_since`) fails.
    FailRead,
}

impl Fault {
    const fn is_commit_fault(self) -> bool {
        matches!(self, Self::FailCommit | Self::FailAfterWrites(_))
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct DeckTable<R> {
    records: BTreeMap<RecordId, R>,
    revision: Revision,
    journal: Vec<JournalEntry<R>>,
    /// Entries at or below this revision have been dropped.
    compacted: Revision,
}

impl<R> DeckTable<R> {
    const fn empty() -> Self {
        Self {
            records: BTreeMap::new(),
            revision: Revision(0),
            journal: Vec::new(),
            compacted: Revision(0),
        }
    }
}

impl<R: Clone> DeckTable<R> {
    /// Apply one write, journaling it under `revision`.
    fn apply(&mut self, revision: Revision, write: Write<R>) {
        let (record_id, before, after) = match write {
            Write::Upsert(record) => {
                let before = self.records.insert(record.id, record.data.clone());
                (record.id, before, Some(record.data))
            }
            Write::Tombstone(id) => (id, self.records.remove(&id), None),
        };
        self.journal.push(JournalEntry {
            revision,
            record_id,
            before,
            after,
        });
    }
}

#[derive(Debug)]
struct Inner<R> {
    decks: BTreeMap<DeckIdentity, DeckTable<R>>,
    next_id: u64,
}

impl<R> Inner<R> {
    fn table(&self, deck: &DeckIdentity) -> Result<&DeckTable<R>, StoreError> {
        self.decks.get(deck).ok_or_else(|| StoreError::DeckNotFound {
            deck: deck.clone(),
        })
    }

    fn table_mut(&mut self, deck: &DeckIdentity) -> Result<&mut DeckTable<R>, StoreError> {
        self.decks
            .get_mut(deck)
            .ok_or_else(|| StoreError::DeckNotFound { deck: deck.clone() })
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Serializable image of a [`MemStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemSnapshot<R> {
    /// Next id the store will allocate.
    pub next_id: u64,
    /// Every deck, sorted by identity.
    pub decks: Vec<DeckSnapshot<R>>,
}

impl<R> Default for MemSnapshot<R> {
    fn default() -> Self {
        Self {
            next_id: 1,
            decks: Vec::new(),
        }
    }
}

/// Serializable image of one deck.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckSnapshot<R> {
    /// Which deck.
    pub deck: DeckIdentity,
    /// Its current revision.
    pub revision: Revision,
    /// Committed records sorted by id.
    pub records: Vec<Record<R>>,
    /// Write journal after `compacted`.
    pub journal: Vec<JournalEntry<R>>,
    /// Newest revision whose journal entries were dropped.
    #[serde(default)]
    pub compacted: Revision,
}

// ---------------------------------------------------------------------------
// MemStore
// ---------------------------------------------------------------------------

/// Thread-safe in-memory record store.
#[derive(Debug)]
pub struct MemStore<R> {
    inner: RwLock<Inner<R>>,
    fault: Mutex<Option<Fault>>,
}

impl<R> Default for MemStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> MemStore<R> {
    /// An empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                decks: BTreeMap::new(),
                next_id: 1,
            }),
            fault: Mutex::new(None),
        }
    }

    /// Arm a one-shot fault. Replaces any fault that has not fired yet.
    pub fn inject(&self, fault: Fault) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = Some(fault);
        }
    }

    /// Disarm any pending fault.
    pub fn clear_fault(&self) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = None;
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner<R>>, StoreError> {
        self.inner.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner<R>>, StoreError> {
        self.inner.write().map_err(|_| poisoned())
    }

    fn fault_slot(&self) -> Result<MutexGuard<'_, Option<Fault>>, StoreError> {
        self.fault.lock().map_err(|_| poisoned())
    }

    /// Take the pending fault if it applies to a read.
    fn take_read_fault(&self) -> Result<(), StoreError> {
        let mut slot = self.fault_slot()?;
        if *slot == Some(Fault::FailRead) {
            *slot = None;
            return Err(StoreError::Unavailable {
                message: "injected read fault".to_owned(),
            });
        }
        Ok(())
    }

    fn take_commit_fault(&self) -> Result<Option<Fault>, StoreError> {
        let mut slot = self.fault_slot()?;
        Ok(match *slot {
            Some(f) if f.is_commit_fault() => slot.take(),
            _ => None,
        })
    }
}

impl<R: Clone> MemStore<R> {
    /// Rebuild a store from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: MemSnapshot<R>) -> Self {
        let decks = snapshot
            .decks
            .into_iter()
            .map(|d| {
                let table = DeckTable {
                    records: d.records.into_iter().map(|r| (r.id, r.data)).collect(),
                    revision: d.revision,
                    journal: d.journal,
                    compacted: d.compacted,
                };
                (d.deck, table)
            })
            .collect();
        Self {
            inner: RwLock::new(Inner {
                decks,
                next_id: snapshot.next_id.max(1),
            }),
            fault: Mutex::new(None),
        }
    }

    /// Export the full store contents.
    ///
    /// # Errors
    /// Fails only if the internal lock is poisoned.
    pub fn snapshot(&self) -> Result<MemSnapshot<R>, StoreError> {
        let inner = self.read()?;
        let decks = inner
            .decks
            .iter()
            .map(|(deck, table)| DeckSnapshot {
                deck: deck.clone(),
                revision: table.revision,
                records: table
                    .records
                    .iter()
                    .map(|(id, data)| Record::new(*id, data.clone()))
                    .collect(),
                journal: table.journal.clone(),
                compacted: table.compacted,
            })
            .collect();
        Ok(MemSnapshot {
            next_id: inner.next_id,
            decks,
        })
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable {
        message: "store lock poisoned".to_owned(),
    }
}

impl<R: Clone + Send + Sync> RecordStore<R> for MemStore<R> {
    fn create_deck(&self, deck: &DeckIdentity) -> Result<Revision, StoreError> {
        let mut inner = self.write()?;
        if inner.decks.contains_key(deck) {
            return Err(StoreError::DeckExists { deck: deck.clone() });
        }
        inner.decks.insert(deck.clone(), DeckTable::empty());
        tracing::debug!(%deck, "created deck");
        Ok(Revision(0))
    }

    fn has_deck(&self, deck: &DeckIdentity) -> Result<bool, StoreError> {
        Ok(self.read()?.decks.contains_key(deck))
    }

    fn decks(&self) -> Result<Vec<DeckIdentity>, StoreError> {
        Ok(self.read()?.decks.keys().cloned().collect())
    }

    fn get(
        &self,
        deck: &DeckIdentity,
        filter: &dyn Fn(&Record<R>) -> bool,
    ) -> Result<Vec<Record<R>>, StoreError> {
        self.take_read_fault()?;
        let inner = self.read()?;
        let table = inner.table(deck)?;
        Ok(table
            .records
            .iter()
            .map(|(id, data)| Record::new(*id, data.clone()))
            .filter(|r| filter(r))
            .collect())
    }

    fn get_record(
        &self,
        deck: &DeckIdentity,
        id: RecordId,
    ) -> Result<Option<Record<R>>, StoreError> {
        self.take_read_fault()?;
        let inner = self.read()?;
        let table = inner.table(deck)?;
        Ok(table.records.get(&id).map(|data| Record::new(id, data.clone())))
    }

    fn revision(&self, deck: &DeckIdentity) -> Result<Revision, StoreError> {
        self.take_read_fault()?;
        Ok(self.read()?.table(deck)?.revision)
    }

    fn changes_since(
        &self,
        deck: &DeckIdentity,
        since: Revision,
    ) -> Result<Vec<JournalEntry<R>>, StoreError> {
        self.take_read_fault()?;
        let inner = self.read()?;
        let table = inner.table(deck)?;
        if since < table.compacted {
            return Err(StoreError::JournalCompacted {
                deck: deck.clone(),
                since,
                compacted: table.compacted,
            });
        }
        // Journal is append-only in revision order.
        let start = table.journal.partition_point(|e| e.revision <= since);
        Ok(table.journal[start..].to_vec())
    }

    fn allocate_id(&self, deck: &DeckIdentity) -> Result<RecordId, StoreError> {
        let mut inner = self.write()?;
        inner.table(deck)?;
        let id = RecordId(inner.next_id);
        inner.next_id += 1;
        Ok(id)
    }

    fn commit(
        &self,
        deck: &DeckIdentity,
        writes: Vec<Write<R>>,
    ) -> Result<CommitReceipt, StoreError> {
        let fault = self.take_commit_fault()?;
        let mut inner = self.write()?;

        let max_upsert = writes
            .iter()
            .filter_map(|w| match w {
                Write::Upsert(r) => Some(r.id.0),
                Write::Tombstone(_) => None,
            })
            .max();

        let table = inner.table_mut(deck)?;
        if writes.is_empty() {
            return Ok(CommitReceipt {
                applied: 0,
                revision: table.revision,
            });
        }

        let total = writes.len();
        let revision = table.revision.next();
        match fault {
            Some(Fault::FailCommit) => {
                return Err(StoreError::Unavailable {
                    message: "injected commit fault".to_owned(),
                });
            }
            Some(Fault::FailAfterWrites(n)) => {
                let applied = n.min(total);
                if applied > 0 {
                    table.revision = revision;
                }
                for write in writes.into_iter().take(applied) {
                    table.apply(revision, write);
                }
                tracing::warn!(%deck, applied, total, "injected partial commit");
                return Err(StoreError::PartialCommit {
                    deck: deck.clone(),
                    applied,
                    message: "injected fault after partial apply".to_owned(),
                });
            }
            Some(Fault::FailRead) | None => {}
        }

        table.revision = revision;
        for write in writes {
            table.apply(revision, write);
        }
        if let Some(max) = max_upsert
            && max >= inner.next_id
        {
            inner.next_id = max + 1;
        }
        tracing::debug!(%deck, %revision, applied = total, "committed batch");
        Ok(CommitReceipt {
            applied: total,
            revision,
        })
    }

    fn compact(&self, deck: &DeckIdentity, up_to: Revision) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let table = inner.table_mut(deck)?;
        let up_to = up_to.min(table.revision);
        if up_to <= table.compacted {
            return Ok(0);
        }
        let cut = table.journal.partition_point(|e| e.revision <= up_to);
        table.journal.drain(..cut);
        table.compacted = up_to;
        tracing::debug!(%deck, %up_to, dropped = cut, "compacted journal");
        Ok(cut)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
