//! Core types for mergeability checking and conflict resolution.
//!
//! Defines the data structures that flow through the delta → check →
//! resolve pipeline.

use std::fmt;

use deckmerge_store::{DeckIdentity, RecordId, Revision};
use serde::{Deserialize, Serialize};

use crate::model::record::FieldDiff;
use crate::model::types::{ChangeCode, SandboxId};

// ---------------------------------------------------------------------------
// BaselineChange
// ---------------------------------------------------------------------------

/// How the baseline changed one record since a sandbox's base revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineChangeKind {
    /// The record was added.
    New,
    /// The record's content changed.
    Modify,
    /// The record was removed.
    Delete,
}

impl fmt::Display for BaselineChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Net baseline change of one record between two revisions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BaselineChange<R> {
    /// Absent at the base revision, present now.
    New {
        /// Current content.
        after: R,
    },
    /// Present at both revisions with different content.
    Modify {
        /// Content at the base revision.
        before: R,
        /// Current content.
        after: R,
    },
    /// Present at the base revision, absent now.
    Delete {
        /// Content at the base revision.
        before: R,
    },
}

impl<R: PartialEq> BaselineChange<R> {
    /// Classify a `(before, after)` pair. Returns `None` when the record is
    /// the same at both revisions.
    pub fn classify(before: Option<R>, after: Option<R>) -> Option<Self> {
        match (before, after) {
            (None, Some(after)) => Some(Self::New { after }),
            (Some(before), Some(after)) if before != after => Some(Self::Modify { before, after }),
            (Some(before), None) => Some(Self::Delete { before }),
            _ => None,
        }
    }
}

impl<R> BaselineChange<R> {
    /// The change kind.
    pub const fn kind(&self) -> BaselineChangeKind {
        match self {
            Self::New { .. } => BaselineChangeKind::New,
            Self::Modify { .. } => BaselineChangeKind::Modify,
            Self::Delete { .. } => BaselineChangeKind::Delete,
        }
    }

    /// Content at the base revision.
    pub const fn before(&self) -> Option<&R> {
        match self {
            Self::New { .. } => None,
            Self::Modify { before, .. } | Self::Delete { before } => Some(before),
        }
    }

    /// Current content.
    pub const fn after(&self) -> Option<&R> {
        match self {
            Self::New { after } | Self::Modify { after, .. } => Some(after),
            Self::Delete { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// MergeAction / Resolution
// ---------------------------------------------------------------------------

/// A user decision for one conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    /// Keep the sandbox's intent.
    UseSandbox,
    /// Take the baseline's current state.
    UseBaseline,
    /// Use a caller-supplied reconciled record.
    Merged,
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UseSandbox => write!(f, "use_sandbox"),
            Self::UseBaseline => write!(f, "use_baseline"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// Resolution of one conflict, keyed by the sandbox-side record id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resolution<R> {
    /// The conflict's `record_id`.
    pub record_id: RecordId,
    /// Chosen action.
    pub action: MergeAction,
    /// Reconciled record. Required for `merged`; optional content for a
    /// `use_sandbox` that recreates a record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_record: Option<R>,
}

impl<R> Resolution<R> {
    /// A resolution without a merged record.
    pub const fn new(record_id: RecordId, action: MergeAction) -> Self {
        Self {
            record_id,
            action,
            merged_record: None,
        }
    }

    /// A `merged` resolution.
    pub const fn merged(record_id: RecordId, record: R) -> Self {
        Self {
            record_id,
            action: MergeAction::Merged,
            merged_record: Some(record),
        }
    }
}

// ---------------------------------------------------------------------------
// ConflictRecordPair / ConflictSet
// ---------------------------------------------------------------------------

/// A record both the sandbox and the baseline changed since checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecordPair<R> {
    /// The sandbox-side record id; resolutions refer to it.
    pub record_id: RecordId,
    /// The baseline-side record id. Differs from `record_id` only when a
    /// sandbox `New` record collides by natural key with a baseline `New`.
    pub baseline_record_id: RecordId,
    /// Sandbox change code.
    pub sandbox_code: ChangeCode,
    /// Sandbox content snapshot.
    pub sandbox_record: R,
    /// What the baseline did.
    pub baseline_change: BaselineChangeKind,
    /// Baseline content at the sandbox's base revision.
    pub baseline_before: Option<R>,
    /// Current baseline content.
    pub baseline_after: Option<R>,
    /// Actions that may resolve this conflict.
    pub actions: Vec<MergeAction>,
    /// Fields that differ between the sandbox record and the baseline.
    pub field_diffs: Vec<FieldDiff>,
}

/// Result of a mergeability check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet<R> {
    /// The checked sandbox.
    pub sandbox_id: SandboxId,
    /// Its deck.
    pub deck: DeckIdentity,
    /// Revision the sandbox is based on.
    pub base_revision: Revision,
    /// Current deck revision.
    pub current_revision: Revision,
    /// Baseline additions that fold in cleanly.
    pub added: usize,
    /// Baseline updates that fold in cleanly.
    pub updated: usize,
    /// Baseline deletions that fold in cleanly.
    pub deleted: usize,
    /// Conflicts, sorted by `record_id`.
    pub conflicts: Vec<ConflictRecordPair<R>>,
}

impl<R> ConflictSet<R> {
    /// No conflicts.
    pub const fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Whether the baseline moved past the sandbox's base revision.
    pub fn baseline_moved(&self) -> bool {
        self.current_revision != self.base_revision
    }

    /// Sandbox-side ids of every conflict.
    pub fn conflict_ids(&self) -> Vec<RecordId> {
        self.conflicts.iter().map(|c| c.record_id).collect()
    }
}
