//! The [`RecordStore`] trait: the single boundary between the merge engine
//! and durable baseline storage.
//!
//! The engine never sees storage internals. It reads committed records,
//! asks for the journal of writes since a revision, allocates record ids and
//! submits write batches. Conflict awareness lives above this layer.
//!
//! | Group    | Methods                                           |
//! |----------|---------------------------------------------------|
//! | Decks    | `create_deck`, `has_deck`, `decks`                |
//! | Reads    | `get`, `get_record`, `revision`, `changes_since`  |
//! | Writes   | `allocate_id`, `commit`, `compact`                |

use crate::error::StoreError;
use crate::types::{CommitReceipt, DeckIdentity, JournalEntry, Record, RecordId, Revision, Write};

/// Durable storage of committed baseline records, generic over the record
/// payload `R`.
///
/// Implementations must be safe to share between threads; all methods take
/// `&self`.
///
/// # Commit contract
///
/// `commit` applies a whole batch or nothing. A backend that cannot promise
/// this reports [`StoreError::PartialCommit`] when a batch fails midway; the
/// caller is then responsible for restoring the prior state.
pub trait RecordStore<R>: Send + Sync {
    // -----------------------------------------------------------------------
    // Decks
    // -----------------------------------------------------------------------

    /// Register an empty baseline for `deck` at revision 0.
    ///
    /// Fails with [`StoreError::DeckExists`] if the deck is already present.
    fn create_deck(&self, deck: &DeckIdentity) -> Result<Revision, StoreError>;

    /// Whether `deck` has a baseline.
    fn has_deck(&self, deck: &DeckIdentity) -> Result<bool, StoreError>;

    /// All decks with a baseline, sorted.
    fn decks(&self) -> Result<Vec<DeckIdentity>, StoreError>;

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Committed records of `deck` accepted by `filter`, sorted by id.
    fn get(
        &self,
        deck: &DeckIdentity,
        filter: &dyn Fn(&Record<R>) -> bool,
    ) -> Result<Vec<Record<R>>, StoreError>;

    /// One committed record, or `None` if the id is absent from `deck`.
    fn get_record(&self, deck: &DeckIdentity, id: RecordId)
    -> Result<Option<Record<R>>, StoreError>;

    /// Current revision of `deck`.
    fn revision(&self, deck: &DeckIdentity) -> Result<Revision, StoreError>;

    /// Journal entries of `deck` with a revision strictly greater than
    /// `since`, in commit order.
    ///
    /// Fails with [`StoreError::JournalCompacted`] if `since` predates the
    /// last [`compact`](Self::compact).
    fn changes_since(
        &self,
        deck: &DeckIdentity,
        since: Revision,
    ) -> Result<Vec<JournalEntry<R>>, StoreError>;

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Reserve a fresh record id. Ids are never handed out twice.
    fn allocate_id(&self, deck: &DeckIdentity) -> Result<RecordId, StoreError>;

    /// Apply a batch of writes to `deck` as one revision.
    ///
    /// An empty batch is a no-op that reports the current revision.
    fn commit(&self, deck: &DeckIdentity, writes: Vec<Write<R>>)
    -> Result<CommitReceipt, StoreError>;

    /// Drop journal entries of `deck` with a revision at or below `up_to`.
    /// Records are untouched. Returns the number of entries dropped.
    ///
    /// `up_to` is clamped to the current revision.
    fn compact(&self, deck: &DeckIdentity, up_to: Revision) -> Result<usize, StoreError>;
}
