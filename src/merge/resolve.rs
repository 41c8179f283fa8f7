//! Merge resolver: fold the baseline's concurrent changes into a sandbox
//! according to one resolution per conflict.
//!
//! Application is all-or-nothing: every resolution is validated and every
//! resulting entry update computed before the sandbox is touched. Updates
//! are then written through the change tracker.
//!
//! A record that the sandbox keeps after the baseline deleted it, or that the
//! sandbox deleted and now brings back, is recreated: it stays `New` through
//! any number of later conflicts and is committed under a fresh id.

use std::collections::BTreeMap;

use deckmerge_store::RecordId;

use crate::error::EngineError;
use crate::merge::check::{EntryUpdate, MergeAnalysis};
use crate::merge::types::{BaselineChangeKind, ConflictRecordPair, MergeAction, Resolution};
use crate::model::record::DeckRecord;
use crate::model::types::ChangeCode;
use crate::sandbox::{Sandbox, tracker};

/// Match resolutions to conflicts one-to-one.
fn pair_up<'a, R>(
    analysis: &'a MergeAnalysis<R>,
    resolutions: Vec<Resolution<R>>,
) -> Result<Vec<(&'a ConflictRecordPair<R>, Resolution<R>)>, EngineError> {
    let set = &analysis.conflicts;
    let mut by_id: BTreeMap<RecordId, Resolution<R>> = BTreeMap::new();
    let mut duplicates = Vec::new();
    for r in resolutions {
        let id = r.record_id;
        if by_id.insert(id, r).is_some() {
            duplicates.push(id.to_string());
        }
    }
    let unknown: Vec<String> = by_id
        .keys()
        .filter(|id| !set.conflicts.iter().any(|c| c.record_id == **id))
        .map(ToString::to_string)
        .collect();
    let missing: Vec<RecordId> = set
        .conflicts
        .iter()
        .map(|c| c.record_id)
        .filter(|id| !by_id.contains_key(id))
        .collect();

    if !duplicates.is_empty() || !unknown.is_empty() || !missing.is_empty() {
        let mut detail = Vec::new();
        if !duplicates.is_empty() {
            detail.push(format!("duplicate resolution(s) for {}", duplicates.join(", ")));
        }
        if !unknown.is_empty() {
            detail.push(format!("no conflict on record(s) {}", unknown.join(", ")));
        }
        return Err(EngineError::IncompleteResolution {
            sandbox: set.sandbox_id,
            missing,
            detail: detail.join("; "),
        });
    }

    Ok(set
        .conflicts
        .iter()
        .filter_map(|c| by_id.remove(&c.record_id).map(|r| (c, r)))
        .collect())
}

/// Baseline side wins: drop the sandbox's entry and track the baseline's
/// current state.
fn take_baseline<R: Clone>(c: &ConflictRecordPair<R>) -> Vec<EntryUpdate<R>> {
    let mut out = Vec::with_capacity(2);
    if c.record_id != c.baseline_record_id {
        out.push(EntryUpdate::Remove { id: c.record_id });
    }
    out.push(match &c.baseline_after {
        Some(after) => EntryUpdate::Set {
            id: c.baseline_record_id,
            code: ChangeCode::Unchanged,
            record: after.clone(),
        },
        None => EntryUpdate::Remove {
            id: c.baseline_record_id,
        },
    });
    out
}

/// Sandbox side wins: re-express the sandbox's intent against the current
/// baseline. `recreating` is set when the sandbox entry already recreates
/// the record.
fn take_sandbox<R: Clone>(
    c: &ConflictRecordPair<R>,
    content: R,
    recreating: bool,
) -> Vec<EntryUpdate<R>> {
    let mut out = Vec::with_capacity(2);
    if c.record_id != c.baseline_record_id {
        out.push(EntryUpdate::Remove { id: c.record_id });
    }
    let id = c.baseline_record_id;
    let exists = c.baseline_after.is_some();
    let recreating = recreating && c.record_id == id;
    // Present at the sandbox's base revision, so the id was committed.
    let committed = c.baseline_before.is_some();
    out.push(match (c.sandbox_code, exists) {
        (ChangeCode::Delete, true) => EntryUpdate::Set {
            id,
            code: ChangeCode::Delete,
            record: content,
        },
        (ChangeCode::Delete, false) => EntryUpdate::Remove { id },
        (ChangeCode::New, true) if recreating => EntryUpdate::Recreate {
            id,
            record: content,
        },
        (ChangeCode::New | ChangeCode::Modify | ChangeCode::Unchanged, true) => EntryUpdate::Set {
            id,
            code: ChangeCode::Modify,
            record: content,
        },
        (ChangeCode::New | ChangeCode::Modify | ChangeCode::Unchanged, false)
            if recreating || committed =>
        {
            EntryUpdate::Recreate {
                id,
                record: content,
            }
        }
        (ChangeCode::New | ChangeCode::Modify | ChangeCode::Unchanged, false) => {
            EntryUpdate::Set {
                id,
                code: ChangeCode::New,
                record: content,
            }
        }
    });
    out
}

/// Entry updates for one resolved conflict.
fn outcome<R: DeckRecord>(
    c: &ConflictRecordPair<R>,
    r: Resolution<R>,
    recreating: bool,
) -> Result<Vec<EntryUpdate<R>>, EngineError> {
    if !c.actions.contains(&r.action) {
        return Err(EngineError::Conflict {
            detail: format!(
                "action {} is not offered for record {} ({} in sandbox, {} in baseline)",
                r.action, c.record_id, c.sandbox_code, c.baseline_change
            ),
        });
    }
    let updates = match (c.sandbox_code, c.baseline_change, r.action) {
        (_, _, MergeAction::UseBaseline) => take_baseline(c),
        // Deleting and recreating is not the same as keeping the baseline's
        // edit: the record comes back as New.
        (ChangeCode::Delete, BaselineChangeKind::Modify, MergeAction::UseSandbox) => {
            let content = r
                .merged_record
                .or_else(|| c.baseline_after.clone())
                .unwrap_or_else(|| c.sandbox_record.clone());
            vec![EntryUpdate::Recreate {
                id: c.record_id,
                record: content,
            }]
        }
        (ChangeCode::Modify, BaselineChangeKind::Delete, MergeAction::UseSandbox) => {
            let content = r.merged_record.unwrap_or_else(|| c.sandbox_record.clone());
            vec![EntryUpdate::Recreate {
                id: c.record_id,
                record: content,
            }]
        }
        (_, _, MergeAction::UseSandbox) => {
            let content = if c.sandbox_code == ChangeCode::Delete {
                c.baseline_after
                    .clone()
                    .unwrap_or_else(|| c.sandbox_record.clone())
            } else {
                c.sandbox_record.clone()
            };
            take_sandbox(c, content, recreating)
        }
        (_, _, MergeAction::Merged) => {
            let Some(merged) = r.merged_record else {
                return Err(EngineError::Conflict {
                    detail: format!("merged resolution for record {} has no merged_record", c.record_id),
                });
            };
            let code = if c.baseline_after.is_some() {
                ChangeCode::Modify
            } else {
                ChangeCode::New
            };
            vec![EntryUpdate::Set {
                id: c.baseline_record_id,
                code,
                record: merged,
            }]
        }
    };
    Ok(updates)
}

fn apply<R>(sandbox: &mut Sandbox<R>, update: EntryUpdate<R>) {
    match update {
        EntryUpdate::Set { id, code, record } => tracker::set_entry(sandbox, id, code, record),
        EntryUpdate::Recreate { id, record } => tracker::recreate(sandbox, id, record),
        EntryUpdate::Remove { id } => {
            tracker::undo(sandbox, id);
        }
    }
}

/// Fold `analysis` into `sandbox` using one resolution per conflict, then
/// mark the sandbox valid at the analysed current revision.
///
/// # Errors
/// - [`EngineError::IncompleteResolution`] if a conflict has no resolution,
///   or a resolution is duplicated or matches no conflict.
/// - [`EngineError::Conflict`] if an action is not offered for its conflict
///   or a `merged` resolution lacks a record.
///
/// The sandbox is unchanged on error.
pub fn apply_resolutions<R: DeckRecord>(
    sandbox: &mut Sandbox<R>,
    analysis: MergeAnalysis<R>,
    resolutions: Vec<Resolution<R>>,
    now: u64,
) -> Result<(), EngineError> {
    let mut updates = Vec::new();
    for (conflict, resolution) in pair_up(&analysis, resolutions)? {
        let recreating = sandbox.recreated.contains(&conflict.record_id);
        updates.extend(outcome(conflict, resolution, recreating)?);
    }

    let current = analysis.conflicts.current_revision;
    for update in analysis.folds.into_iter().chain(updates) {
        apply(sandbox, update);
    }
    sandbox.valid = true;
    sandbox.base_revision = current;
    sandbox.touch(now);
    Ok(())
}
