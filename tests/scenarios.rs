//! End-to-end forecaster workflows driven through the engine API.

mod common;

use common::{baseline, checkout, engine_with, fix, wind};
use deckmerge::EngineError;
use deckmerge::merge::{BaselineChangeKind, MergeAction, Resolution};
use deckmerge::model::ChangeCode;

#[test]
fn concurrent_intensity_edits_resolve_and_roll_back() {
    let (engine, ids) = engine_with(&[50]);
    let r1 = ids[0];

    let a = checkout(&engine, "alice");
    engine.modify_record(a, r1, fix("2024081500", 60), 2).unwrap();
    let b = checkout(&engine, "bob");
    engine.modify_record(b, r1, fix("2024081500", 70), 2).unwrap();

    let report = engine.checkin(b, 3).unwrap();
    assert_eq!(report.invalidated, vec![a]);
    assert_eq!(wind(&engine, r1), Some(70));
    assert!(!engine.sandbox(a).unwrap().valid);

    let conflicts = engine.check_mergeable(a).unwrap();
    assert_eq!(conflicts.conflict_ids(), vec![r1]);
    let conflict = &conflicts.conflicts[0];
    assert_eq!(conflict.sandbox_code, ChangeCode::Modify);
    assert_eq!(conflict.baseline_change, BaselineChangeKind::Modify);
    assert_eq!(conflict.baseline_before.as_ref().unwrap().max_wind_kt, 50);
    assert_eq!(conflict.baseline_after.as_ref().unwrap().max_wind_kt, 70);
    assert!(conflict.actions.contains(&MergeAction::Merged));
    assert!(conflict.field_diffs.iter().any(|d| d.field == "max_wind_kt"));

    engine
        .apply_resolutions(a, vec![Resolution::new(r1, MergeAction::UseSandbox)], 4)
        .unwrap();
    assert!(engine.sandbox(a).unwrap().valid);
    let log = engine.checkin(a, 5).unwrap().merge_log_id.unwrap();
    assert_eq!(wind(&engine, r1), Some(60));

    engine.rollback(log, 6).unwrap();
    assert_eq!(wind(&engine, r1), Some(70));
}

#[test]
fn independent_deletes_of_the_same_record_agree() {
    let (engine, ids) = engine_with(&[50, 55]);
    let r2 = ids[1];

    let a = checkout(&engine, "alice");
    engine.delete_record(a, r2, 2).unwrap();
    let b = checkout(&engine, "bob");
    engine.delete_record(b, r2, 2).unwrap();
    engine.checkin(b, 3).unwrap();

    let conflicts = engine.check_mergeable(a).unwrap();
    assert!(conflicts.is_clean());
    assert_eq!(conflicts.deleted, 1);

    // The overlap made the sandbox stale; an empty resolution re-bases it.
    engine.apply_resolutions(a, Vec::new(), 4).unwrap();
    engine.checkin(a, 5).unwrap();

    let records = baseline(&engine);
    assert_eq!(records.len(), 1);
    assert!(records.iter().all(|r| r.id != r2));
}

#[test]
fn deleted_record_edited_elsewhere_can_be_kept_or_dropped() {
    for action in [MergeAction::UseBaseline, MergeAction::UseSandbox] {
        let (engine, ids) = engine_with(&[50, 55]);
        let r2 = ids[1];

        let a = checkout(&engine, "alice");
        engine.delete_record(a, r2, 2).unwrap();
        let b = checkout(&engine, "bob");
        engine.modify_record(b, r2, fix("2024081506", 58), 2).unwrap();
        engine.checkin(b, 3).unwrap();

        let conflicts = engine.check_mergeable(a).unwrap();
        assert_eq!(conflicts.conflict_ids(), vec![r2]);
        assert_eq!(conflicts.conflicts[0].sandbox_code, ChangeCode::Delete);
        assert!(!conflicts.conflicts[0].actions.contains(&MergeAction::Merged));

        engine
            .apply_resolutions(a, vec![Resolution::new(r2, action)], 4)
            .unwrap();
        engine.checkin(a, 5).unwrap();

        let winds: Vec<u16> = baseline(&engine).iter().map(|r| r.data.max_wind_kt).collect();
        assert_eq!(winds, vec![50, 58], "{action}");
    }
}

#[test]
fn merged_record_replaces_both_sides() {
    let (engine, ids) = engine_with(&[50]);
    let a = checkout(&engine, "alice");
    engine.modify_record(a, ids[0], fix("2024081500", 60), 2).unwrap();
    let b = checkout(&engine, "bob");
    engine.modify_record(b, ids[0], fix("2024081500", 70), 2).unwrap();
    engine.checkin(b, 3).unwrap();

    engine
        .apply_resolutions(a, vec![Resolution::merged(ids[0], fix("2024081500", 65))], 4)
        .unwrap();
    engine.checkin(a, 5).unwrap();
    assert_eq!(wind(&engine, ids[0]), Some(65));
}

#[test]
fn resolutions_must_cover_every_conflict() {
    let (engine, ids) = engine_with(&[50, 55]);
    let a = checkout(&engine, "alice");
    engine.modify_record(a, ids[0], fix("2024081500", 60), 2).unwrap();
    engine.modify_record(a, ids[1], fix("2024081506", 60), 2).unwrap();
    let b = checkout(&engine, "bob");
    engine.modify_record(b, ids[0], fix("2024081500", 70), 2).unwrap();
    engine.modify_record(b, ids[1], fix("2024081506", 70), 2).unwrap();
    engine.checkin(b, 3).unwrap();

    let err = engine
        .apply_resolutions(a, vec![Resolution::new(ids[0], MergeAction::UseSandbox)], 4)
        .unwrap_err();
    match err {
        EngineError::IncompleteResolution { missing, .. } => assert_eq!(missing, vec![ids[1]]),
        other => panic!("unexpected error: {other}"),
    }
    // Nothing was applied.
    assert!(!engine.sandbox(a).unwrap().valid);
}

#[test]
fn same_fix_added_twice_is_paired_by_natural_key() {
    let (engine, _) = engine_with(&[50]);
    let a = checkout(&engine, "alice");
    let ours = engine.add_record(a, fix("2024081506", 55), 2).unwrap();
    let b = checkout(&engine, "bob");
    engine.add_record(b, fix("2024081506", 60), 2).unwrap();
    engine.checkin(b, 3).unwrap();

    let conflicts = engine.check_mergeable(a).unwrap();
    assert_eq!(conflicts.conflict_ids(), vec![ours]);
    assert_ne!(conflicts.conflicts[0].baseline_record_id, ours);
    assert_eq!(conflicts.conflicts[0].baseline_change, BaselineChangeKind::New);

    engine
        .apply_resolutions(a, vec![Resolution::new(ours, MergeAction::UseSandbox)], 4)
        .unwrap();
    engine.checkin(a, 5).unwrap();

    let winds: Vec<u16> = baseline(&engine).iter().map(|r| r.data.max_wind_kt).collect();
    assert_eq!(winds, vec![50, 55]);
}

#[test]
fn undo_is_idempotent() {
    let (engine, ids) = engine_with(&[50]);
    let a = checkout(&engine, "alice");
    engine.modify_record(a, ids[0], fix("2024081500", 60), 2).unwrap();
    assert!(engine.undo_record(a, ids[0], 3).unwrap());
    assert!(!engine.undo_record(a, ids[0], 4).unwrap());
    assert!(engine.sandbox(a).unwrap().entries.is_empty());
    assert_eq!(engine.checkin(a, 5).unwrap().written, 0);
}

#[test]
fn fix_moved_onto_an_added_fix_is_paired_and_resolvable() {
    let (engine, ids) = engine_with(&[50, 55]);
    let a = checkout(&engine, "alice");
    let ours = engine.add_record(a, fix("2024081512", 60), 2).unwrap();
    let b = checkout(&engine, "bob");
    engine.modify_record(b, ids[1], fix("2024081512", 65), 2).unwrap();
    engine.checkin(b, 3).unwrap();

    let conflicts = engine.check_mergeable(a).unwrap();
    assert_eq!(conflicts.conflict_ids(), vec![ours]);
    assert_eq!(conflicts.conflicts[0].baseline_record_id, ids[1]);
    assert_eq!(conflicts.conflicts[0].baseline_change, BaselineChangeKind::Modify);

    engine
        .apply_resolutions(a, vec![Resolution::new(ours, MergeAction::UseSandbox)], 4)
        .unwrap();
    engine.checkin(a, 5).unwrap();

    let records = baseline(&engine);
    assert_eq!(records.len(), 2);
    assert_eq!(wind(&engine, ids[1]), Some(60));
    assert!(records.iter().all(|r| r.id != ours));
}
