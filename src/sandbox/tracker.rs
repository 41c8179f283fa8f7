//! Change tracker: the four edit operations on a sandbox's entry set.
//!
//! Every operation takes the baseline as it stood at the sandbox's
//! `base_revision` and validates completely before mutating, so a failed
//! edit leaves the entry set untouched.
//!
//! | Existing entry | `modify`          | `mark_deleted`   |
//! |----------------|-------------------|------------------|
//! | none           | `Modify`          | `Delete`         |
//! | `Unchanged`    | `Modify`          | `Delete`         |
//! | `New`          | stays `New`       | entry removed    |
//! | `Modify`       | `Modify`          | `Delete`         |
//! | `Delete`       | `Conflict`        | `Conflict`       |
//!
//! A `New` entry that recreates a record the baseline still holds becomes
//! `Delete` on `mark_deleted`.
//!
//! The merge resolver writes entries through [`set_entry`], [`recreate`] and
//! [`undo`] as well, so `Sandbox::recreated` always agrees with the entries.

use std::collections::BTreeMap;

use deckmerge_store::{Record, RecordId};

use crate::error::EngineError;
use crate::model::record::DeckRecord;
use crate::model::types::ChangeCode;
use crate::sandbox::{ModifiedEntry, Sandbox};

/// The sandbox's view: baseline at `base_revision` overlaid with its
/// entries, excluding deletions. Includes records outside the selection.
pub fn view<'a, R>(
    sandbox: &'a Sandbox<R>,
    base: &'a BTreeMap<RecordId, R>,
) -> BTreeMap<RecordId, &'a R> {
    let mut out: BTreeMap<RecordId, &R> = base.iter().map(|(id, r)| (*id, r)).collect();
    for (id, entry) in &sandbox.entries {
        if entry.code == ChangeCode::Delete {
            out.remove(id);
        } else {
            out.insert(*id, &entry.record);
        }
    }
    out
}

/// The records the owner sees: the view restricted to the selection.
pub fn visible_records<R: DeckRecord>(
    sandbox: &Sandbox<R>,
    base: &BTreeMap<RecordId, R>,
) -> Vec<Record<R>> {
    view(sandbox, base)
        .into_iter()
        .filter(|(_, r)| sandbox.selection.matches(*r))
        .map(|(id, r)| Record::new(id, r.clone()))
        .collect()
}

fn check_selection<R: DeckRecord>(sandbox: &Sandbox<R>, record: &R) -> Result<(), EngineError> {
    if sandbox.selection.matches(record) {
        Ok(())
    } else {
        Err(EngineError::Conflict {
            detail: format!(
                "record at {} is outside the checkout selection of sandbox {}",
                record.dtg(),
                sandbox.id
            ),
        })
    }
}

fn check_key_free<R: DeckRecord>(
    sandbox: &Sandbox<R>,
    base: &BTreeMap<RecordId, R>,
    record: &R,
    except: Option<RecordId>,
) -> Result<(), EngineError> {
    let key = record.natural_key();
    let holder = view(sandbox, base)
        .into_iter()
        .find(|(id, r)| Some(*id) != except && r.natural_key() == key);
    match holder {
        Some((id, _)) => Err(EngineError::Conflict {
            detail: format!("record {id} already has natural key {key:?}"),
        }),
        None => Ok(()),
    }
}

fn check_visible<R: DeckRecord>(
    sandbox: &Sandbox<R>,
    base: &BTreeMap<RecordId, R>,
    id: RecordId,
) -> Result<(), EngineError> {
    let visible = view(sandbox, base)
        .get(&id)
        .is_some_and(|r| sandbox.selection.matches(*r));
    if visible {
        Ok(())
    } else {
        Err(EngineError::RecordNotFound {
            sandbox: sandbox.id,
            record: id,
        })
    }
}

/// Store `record` under `code` as the entry for `id`. Any code other than
/// `New` ends a pending recreation of `id`.
pub fn set_entry<R>(sandbox: &mut Sandbox<R>, id: RecordId, code: ChangeCode, record: R) {
    if code != ChangeCode::New {
        sandbox.recreated.remove(&id);
    }
    sandbox.entries.insert(id, ModifiedEntry::new(code, record));
}

/// Bring back `id`, a record the baseline holds or once held, as `New` with
/// `record`. Checkin commits it under a fresh id.
pub fn recreate<R>(sandbox: &mut Sandbox<R>, id: RecordId, record: R) {
    sandbox
        .entries
        .insert(id, ModifiedEntry::new(ChangeCode::New, record));
    sandbox.recreated.insert(id);
}

/// Add a record the baseline does not have. `allocate` is only called once
/// validation passed.
///
/// # Errors
/// `Conflict` if the record is outside the selection or its natural key is
/// already present in the view.
pub fn add_new<R: DeckRecord>(
    sandbox: &mut Sandbox<R>,
    base: &BTreeMap<RecordId, R>,
    record: R,
    allocate: impl FnOnce() -> Result<RecordId, EngineError>,
) -> Result<RecordId, EngineError> {
    check_selection(sandbox, &record)?;
    check_key_free(sandbox, base, &record, None)?;
    let id = allocate()?;
    if sandbox.entries.contains_key(&id) || base.contains_key(&id) {
        return Err(EngineError::Conflict {
            detail: format!("record id {id} is already in use"),
        });
    }
    set_entry(sandbox, id, ChangeCode::New, record);
    Ok(id)
}

/// Replace a visible record's content. Returns the resulting change code.
///
/// # Errors
/// `RecordNotFound` if the id is not visible, `Conflict` if it is deleted in
/// this sandbox, the new content leaves the selection, or its natural key
/// collides with another record.
pub fn modify<R: DeckRecord>(
    sandbox: &mut Sandbox<R>,
    base: &BTreeMap<RecordId, R>,
    id: RecordId,
    record: R,
) -> Result<ChangeCode, EngineError> {
    if sandbox
        .entries
        .get(&id)
        .is_some_and(|e| e.code == ChangeCode::Delete)
    {
        return Err(EngineError::Conflict {
            detail: format!("record {id} is deleted in sandbox {}", sandbox.id),
        });
    }
    check_visible(sandbox, base, id)?;
    check_selection(sandbox, &record)?;
    check_key_free(sandbox, base, &record, Some(id))?;

    let code = match sandbox.entries.get(&id).map(|e| e.code) {
        Some(ChangeCode::New) => ChangeCode::New,
        _ => ChangeCode::Modify,
    };
    set_entry(sandbox, id, code, record);
    Ok(code)
}

/// Mark a visible record deleted. Deleting a record the sandbox introduced
/// drops its entry instead. Returns the resulting change code, or `None` if
/// the entry was dropped.
///
/// # Errors
/// `RecordNotFound` if the id is not visible, `Conflict` if it is already
/// deleted.
pub fn mark_deleted<R: DeckRecord>(
    sandbox: &mut Sandbox<R>,
    base: &BTreeMap<RecordId, R>,
    id: RecordId,
) -> Result<Option<ChangeCode>, EngineError> {
    match sandbox.entries.get(&id).map(|e| e.code) {
        Some(ChangeCode::Delete) => Err(EngineError::Conflict {
            detail: format!("record {id} is already deleted in sandbox {}", sandbox.id),
        }),
        Some(ChangeCode::New) => {
            check_visible(sandbox, base, id)?;
            if let Some(r) = base.get(&id) {
                set_entry(sandbox, id, ChangeCode::Delete, r.clone());
                return Ok(Some(ChangeCode::Delete));
            }
            undo(sandbox, id);
            Ok(None)
        }
        Some(ChangeCode::Modify | ChangeCode::Unchanged) | None => {
            check_visible(sandbox, base, id)?;
            let snapshot = match (base.get(&id), sandbox.entries.get(&id)) {
                (Some(r), _) => r.clone(),
                (None, Some(e)) => e.record.clone(),
                (None, None) => {
                    return Err(EngineError::RecordNotFound {
                        sandbox: sandbox.id,
                        record: id,
                    });
                }
            };
            set_entry(sandbox, id, ChangeCode::Delete, snapshot);
            Ok(Some(ChangeCode::Delete))
        }
    }
}

/// Drop the sandbox's entry for `id`, reverting it to baseline. Returns
/// whether an entry existed; a second call is a no-op.
pub fn undo<R>(sandbox: &mut Sandbox<R>, id: RecordId) -> bool {
    sandbox.recreated.remove(&id);
    sandbox.entries.remove(&id).is_some()
}

#[cfg(test)]
mod tests {
    use deckmerge_store::{DeckIdentity, DeckType, Revision};

    use super::*;
    use crate::model::deck::BDeckRecord;
    use crate::model::record::Selection;
    use crate::model::types::{Dtg, Owner, SandboxId};

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

    fn setup() -> (Sandbox<BDeckRecord>, BTreeMap<RecordId, BDeckRecord>) {
        let sb = Sandbox::new(
            SandboxId(1),
            DeckIdentity::new("AL", 5, 2024, DeckType::B).unwrap(),
            Owner::new("alice").unwrap(),
            Selection::all(),
            Revision(1),
            0,
        );
        let base = BTreeMap::from([
            (RecordId(1), fix("2024081500", 50)),
            (RecordId(2), fix("2024081506", 55)),
        ]);
        (sb, base)
    }

    fn code(sb: &Sandbox<BDeckRecord>, id: u64) -> Option<ChangeCode> {
        sb.entries.get(&RecordId(id)).map(|e| e.code)
    }

    #[test]
    fn add_new_allocates_after_validation() {
        let (mut sb, base) = setup();
        let id = add_new(&mut sb, &base, fix("2024081512", 60), || Ok(RecordId(10))).unwrap();
        assert_eq!(id, RecordId(10));
        assert_eq!(code(&sb, 10), Some(ChangeCode::New));

        let mut called = false;
        let err = add_new(&mut sb, &base, fix("2024081500", 99), || {
            called = true;
            Ok(RecordId(11))
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert!(!called);
    }

    #[test]
    fn add_new_rejects_key_of_other_new_entry() {
        let (mut sb, base) = setup();
        add_new(&mut sb, &base, fix("2024081512", 60), || Ok(RecordId(10))).unwrap();
        assert!(add_new(&mut sb, &base, fix("2024081512", 65), || Ok(RecordId(11))).is_err());
    }

    #[test]
    fn add_new_allows_key_freed_by_delete() {
        let (mut sb, base) = setup();
        mark_deleted(&mut sb, &base, RecordId(1)).unwrap();
        add_new(&mut sb, &base, fix("2024081500", 70), || Ok(RecordId(10))).unwrap();
        assert_eq!(view(&sb, &base).len(), 2);
    }

    #[test]
    fn modify_baseline_record_becomes_modify() {
        let (mut sb, base) = setup();
        let c = modify(&mut sb, &base, RecordId(1), fix("2024081500", 60)).unwrap();
        assert_eq!(c, ChangeCode::Modify);
        assert_eq!(view(&sb, &base)[&RecordId(1)].max_wind_kt, 60);
    }

    #[test]
    fn modify_new_stays_new() {
        let (mut sb, base) = setup();
        add_new(&mut sb, &base, fix("2024081512", 60), || Ok(RecordId(10))).unwrap();
        let c = modify(&mut sb, &base, RecordId(10), fix("2024081512", 65)).unwrap();
        assert_eq!(c, ChangeCode::New);
    }

    #[test]
    fn modify_unchanged_becomes_modify() {
        let (mut sb, base) = setup();
        sb.entries.insert(
            RecordId(2),
            ModifiedEntry::new(ChangeCode::Unchanged, fix("2024081506", 55)),
        );
        modify(&mut sb, &base, RecordId(2), fix("2024081506", 56)).unwrap();
        assert_eq!(code(&sb, 2), Some(ChangeCode::Modify));
    }

    #[test]
    fn modify_deleted_is_conflict() {
        let (mut sb, base) = setup();
        mark_deleted(&mut sb, &base, RecordId(1)).unwrap();
        let err = modify(&mut sb, &base, RecordId(1), fix("2024081500", 60)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }

    #[test]
    fn modify_unknown_is_not_found() {
        let (mut sb, base) = setup();
        let err = modify(&mut sb, &base, RecordId(9), fix("2024081500", 60)).unwrap_err();
        assert!(matches!(err, EngineError::RecordNotFound { .. }));
    }

    #[test]
    fn modify_into_taken_key_is_conflict() {
        let (mut sb, base) = setup();
        let err = modify(&mut sb, &base, RecordId(1), fix("2024081506", 60)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert!(sb.entries.is_empty());
    }

    #[test]
    fn delete_new_drops_entry() {
        let (mut sb, base) = setup();
        add_new(&mut sb, &base, fix("2024081512", 60), || Ok(RecordId(10))).unwrap();
        assert_eq!(mark_deleted(&mut sb, &base, RecordId(10)).unwrap(), None);
        assert!(sb.entries.is_empty());
    }

    #[test]
    fn delete_modified_keeps_baseline_snapshot() {
        let (mut sb, base) = setup();
        modify(&mut sb, &base, RecordId(1), fix("2024081500", 60)).unwrap();
        mark_deleted(&mut sb, &base, RecordId(1)).unwrap();
        let entry = &sb.entries[&RecordId(1)];
        assert_eq!(entry.code, ChangeCode::Delete);
        assert_eq!(entry.record.max_wind_kt, 50);
        assert!(!view(&sb, &base).contains_key(&RecordId(1)));
    }

    #[test]
    fn delete_twice_is_conflict() {
        let (mut sb, base) = setup();
        mark_deleted(&mut sb, &base, RecordId(2)).unwrap();
        assert!(mark_deleted(&mut sb, &base, RecordId(2)).is_err());
    }

    #[test]
    fn undo_is_idempotent() {
        let (mut sb, base) = setup();
        modify(&mut sb, &base, RecordId(1), fix("2024081500", 60)).unwrap();
        assert!(undo(&mut sb, RecordId(1)));
        assert!(!undo(&mut sb, RecordId(1)));
        assert!(sb.entries.is_empty());
    }

    #[test]
    fn deleting_a_recreated_record_deletes_it_again() {
        let (mut sb, base) = setup();
        recreate(&mut sb, RecordId(2), fix("2024081506", 58));
        assert_eq!(code(&sb, 2), Some(ChangeCode::New));

        // Editing keeps the recreation pending.
        modify(&mut sb, &base, RecordId(2), fix("2024081506", 59)).unwrap();
        assert!(sb.recreated.contains(&RecordId(2)));

        let c = mark_deleted(&mut sb, &base, RecordId(2)).unwrap();
        assert_eq!(c, Some(ChangeCode::Delete));
        assert_eq!(sb.entries[&RecordId(2)].record.max_wind_kt, 55);
        assert!(sb.recreated.is_empty());
    }

    #[test]
    fn undo_forgets_a_recreation() {
        let (mut sb, _) = setup();
        recreate(&mut sb, RecordId(7), fix("2024081512", 40));
        assert!(undo(&mut sb, RecordId(7)));
        assert!(sb.entries.is_empty());
        assert!(sb.recreated.is_empty());
    }

    #[test]
    fn set_entry_ends_recreation_unless_new() {
        let (mut sb, _) = setup();
        recreate(&mut sb, RecordId(2), fix("2024081506", 58));
        set_entry(&mut sb, RecordId(2), ChangeCode::New, fix("2024081506", 60));
        assert!(sb.recreated.contains(&RecordId(2)));
        set_entry(&mut sb, RecordId(2), ChangeCode::Unchanged, fix("2024081506", 55));
        assert!(sb.recreated.is_empty());
    }

    #[test]
    fn selection_hides_and_protects_records() {
        let (mut sb, base) = setup();
        sb.selection = Selection {
            dtg_from: Some(Dtg::new("2024081506").unwrap()),
            ..Selection::default()
        };
        let visible = visible_records(&sb, &base);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, RecordId(2));

        let err = modify(&mut sb, &base, RecordId(1), fix("2024081500", 60)).unwrap_err();
        assert!(matches!(err, EngineError::RecordNotFound { .. }));
        let err = add_new(&mut sb, &base, fix("2024081418", 40), || Ok(RecordId(10))).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }
}
