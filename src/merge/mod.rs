//! Mergeability checking and conflict resolution.
//!
//! The pipeline runs in three steps, one module each:
//!
//! - **diff**: Derive the baseline's net changes since a sandbox's base
//!   revision from the store journal ([`BaselineDelta`]).
//! - **check**: Cross those changes with the sandbox's entries, producing a
//!   [`ConflictSet`] and the updates that fold clean changes in.
//! - **resolve**: Apply one [`Resolution`] per conflict, all or nothing.
//!
//! # Determinism
//!
//! Given the same sandbox and the same journal, the check always produces the
//! same conflicts in the same order:
//!
//! - Records are visited in id order.
//! - Content equality, not timestamps, decides whether two edits agree.

pub mod check;
pub mod diff;
pub mod resolve;
pub mod types;

pub use check::{EntryUpdate, MergeAnalysis, analyze, offered_actions};
pub use diff::BaselineDelta;
pub use resolve::apply_resolutions;
pub use types::{
    BaselineChange, BaselineChangeKind, ConflictRecordPair, ConflictSet, MergeAction, Resolution,
};
