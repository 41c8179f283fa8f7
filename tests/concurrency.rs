//! Parallel checkins and edits against one engine.

mod common;

use std::collections::BTreeSet;
use std::thread;

use common::{baseline, checkout, dtg, engine_with, fix, wind};
use deckmerge::EngineError;
use deckmerge::model::ChangeCode;

const WORKERS: u16 = 8;

#[test]
fn parallel_checkins_on_disjoint_records_all_land() {
    let winds = vec![40; usize::from(WORKERS)];
    let (engine, ids) = engine_with(&winds);
    let sandboxes: Vec<_> = (0..WORKERS)
        .map(|i| checkout(&engine, &format!("forecaster{i}")))
        .collect();

    thread::scope(|s| {
        for (i, (&sb, &id)) in sandboxes.iter().zip(&ids).enumerate() {
            let engine = &engine;
            s.spawn(move || {
                let n = u32::try_from(i).unwrap();
                let speed = 50 + u16::try_from(i).unwrap();
                engine.modify_record(sb, id, fix(&dtg(n), speed), 2).unwrap();
                engine.checkin(sb, 3).unwrap();
            });
        }
    });

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(wind(&engine, *id), Some(50 + u16::try_from(i).unwrap()));
    }
    assert_eq!(engine.merge_logs(None).len(), 3, "retention caps the log");
    assert!(engine.sandboxes().is_empty());
}

#[test]
fn racing_adds_of_one_fix_leave_a_single_record() {
    let (engine, _) = engine_with(&[50]);
    let sandboxes: Vec<_> = (0..WORKERS)
        .map(|i| checkout(&engine, &format!("forecaster{i}")))
        .collect();
    for (i, &sb) in sandboxes.iter().enumerate() {
        engine
            .add_record(sb, fix(&dtg(1), 60 + u16::try_from(i).unwrap()), 2)
            .unwrap();
    }

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = sandboxes
            .iter()
            .map(|&sb| {
                let engine = &engine;
                s.spawn(move || engine.checkin(sb, 3))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::StaleSandbox { .. }))
    );

    let records = baseline(&engine);
    assert_eq!(records.len(), 2);
    let keys: BTreeSet<_> = records.iter().map(|r| r.data.dtg.clone()).collect();
    assert_eq!(keys.len(), 2, "no duplicate natural keys");
}

#[test]
fn edits_to_one_sandbox_from_many_threads_serialize() {
    let winds = vec![40; usize::from(WORKERS)];
    let (engine, ids) = engine_with(&winds);
    let sb = checkout(&engine, "alice");

    thread::scope(|s| {
        for (i, &id) in ids.iter().enumerate() {
            let engine = &engine;
            s.spawn(move || {
                let n = u32::try_from(i).unwrap();
                engine.modify_record(sb, id, fix(&dtg(n), 45), 10 + u64::from(n)).unwrap();
            });
        }
    });

    let sandbox = engine.sandbox(sb).unwrap();
    assert_eq!(sandbox.entries.len(), ids.len());
    assert!(sandbox.entries.values().all(|e| e.code == ChangeCode::Modify));
    assert_eq!(sandbox.last_updated, 10 + u64::from(WORKERS) - 1);

    assert_eq!(engine.checkin(sb, 100).unwrap().written, ids.len());
    assert!(baseline(&engine).iter().all(|r| r.data.max_wind_kt == 45));
}

#[test]
fn checkin_and_rollback_race_without_tearing() {
    let (engine, ids) = engine_with(&[50, 55]);
    let a = checkout(&engine, "alice");
    engine.modify_record(a, ids[0], fix(&dtg(0), 60), 2).unwrap();
    let log = engine.checkin(a, 3).unwrap().merge_log_id.unwrap();

    let b = checkout(&engine, "bob");
    engine.modify_record(b, ids[1], fix(&dtg(1), 65), 4).unwrap();

    thread::scope(|s| {
        s.spawn(|| engine.rollback(log, 5).unwrap());
        s.spawn(|| engine.checkin(b, 5).unwrap());
    });

    assert_eq!(wind(&engine, ids[0]), Some(50));
    assert_eq!(wind(&engine, ids[1]), Some(65));
}
