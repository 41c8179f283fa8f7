//! Record store boundary for deckmerge.
//!
//! This crate defines the [`RecordStore`] trait, the only interface through
//! which the merge engine reads and writes committed deck records, along
//! with an in-memory implementation used by tests and the CLI state file.
//!
//! # Crate layout
//!
//! - [`store`]: the [`RecordStore`] trait definition.
//! - [`types`]: value types used in trait signatures ([`DeckIdentity`],
//!   [`RecordId`], [`Revision`], [`Record`], [`Write`], [`JournalEntry`]).
//! - [`error`]: the [`StoreError`] enum returned by all trait methods.
//! - [`mem`]: [`MemStore`], a thread-safe in-memory store with a revision
//!   journal and one-shot fault injection.

pub mod error;
pub mod mem;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use mem::{Fault, MemSnapshot, MemStore};
pub use store::RecordStore;
pub use types::{
    CommitReceipt, DeckIdentity, DeckType, IdentityError, JournalEntry, Record, RecordId,
    Revision, Write,
};
