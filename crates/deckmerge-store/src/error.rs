//! Error types for record store operations.
//!
//! [`StoreError`] is the single error type returned by all
//! [`RecordStore`](crate::RecordStore) methods. Variants distinguish a failure
//! that left the store untouched from one that applied part of a batch, so
//! the engine can decide whether compensation is needed.

use thiserror::Error;

use crate::types::{DeckIdentity, Revision};

/// Errors returned by [`RecordStore`](crate::RecordStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The deck identity has no baseline in this store.
    #[error("deck not found: {deck}")]
    DeckNotFound {
        /// The deck that was looked up.
        deck: DeckIdentity,
    },

    /// The deck already exists and cannot be created again.
    #[error("deck already exists: {deck}")]
    DeckExists {
        /// The deck that was created twice.
        deck: DeckIdentity,
    },

    /// The store could not be reached or refused the operation. Nothing was
    /// written.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Backend-specific description.
        message: String,
    },

    /// A commit failed after some of its writes were applied. The store is
    /// left in an intermediate state that the caller must repair.
    #[error("partial commit on {deck}: {applied} write(s) applied before failure: {message}")]
    PartialCommit {
        /// The deck being written.
        deck: DeckIdentity,
        /// Writes that landed before the failure.
        applied: usize,
        /// Backend-specific description.
        message: String,
    },

    /// The journal no longer reaches back to the requested revision.
    #[error("journal of {deck} is compacted through {compacted}; changes since {since} are gone")]
    JournalCompacted {
        /// The deck that was read.
        deck: DeckIdentity,
        /// The requested starting revision.
        since: Revision,
        /// Newest revision whose entries were dropped.
        compacted: Revision,
    },
}

impl StoreError {
    /// Returns `true` if the store may hold some of the failed batch's writes.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::PartialCommit { .. })
    }
}
