//! Shared helpers for deckmerge integration tests.
//!
//! Every test builds its own in-memory engine; CLI tests use temp
//! directories so there are no side effects on the working tree.

#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Output};

use deckmerge::engine::{Engine, EngineOptions};
use deckmerge::model::{BDeckRecord, Dtg, Owner, SandboxId, Selection};
use deckmerge_store::{DeckIdentity, DeckType, Record, RecordId, RecordStore};

/// The deck every scenario works on.
pub fn deck() -> DeckIdentity {
    DeckIdentity::new("AL", 5, 2024, DeckType::B).expect("valid deck identity")
}

/// A best-track fix at `dtg` with the given intensity.
pub fn fix(dtg: &str, wind: u16) -> BDeckRecord {
    BDeckRecord {
        dtg: Dtg::new(dtg).expect("valid DTG"),
        wind_radius_threshold: 34,
        lat_tenths: 250,
        lon_tenths: -700,
        max_wind_kt: wind,
        min_pressure_mb: Some(1000),
        storm_type: "TS".to_owned(),
        radii_nm: [60, 40, 30, 50],
    }
}

/// The DTG of the `n`th six-hourly fix from 2024-08-15 00Z.
pub fn dtg(n: u32) -> String {
    let day = 15 + n / 4;
    let hour = (n % 4) * 6;
    format!("202408{day:02}{hour:02}")
}

/// An engine holding `deck()` with one fix per wind speed in `winds`.
pub fn engine_with(winds: &[u16]) -> (Engine<BDeckRecord>, Vec<RecordId>) {
    let engine = Engine::in_memory(EngineOptions::default());
    let records = winds
        .iter()
        .enumerate()
        .map(|(i, w)| fix(&dtg(u32::try_from(i).expect("small index")), *w))
        .collect();
    let ids = engine
        .import_deck(&deck(), records)
        .expect("import succeeds")
        .ids;
    (engine, ids)
}

/// Check out `deck()` for `owner`.
pub fn checkout(engine: &Engine<BDeckRecord>, owner: &str) -> SandboxId {
    engine
        .checkout(
            &deck(),
            Selection::all(),
            Owner::new(owner).expect("valid owner"),
            1,
        )
        .expect("checkout succeeds")
}

/// All committed records of `deck()`.
pub fn baseline(engine: &Engine<BDeckRecord>) -> Vec<Record<BDeckRecord>> {
    engine
        .store()
        .get(&deck(), &|_| true)
        .expect("store readable")
}

/// Committed wind speed of one record.
pub fn wind(engine: &Engine<BDeckRecord>, id: RecordId) -> Option<u16> {
    engine
        .store()
        .get_record(&deck(), id)
        .expect("store readable")
        .map(|r| r.data.max_wind_kt)
}

/// Run the deckmerge binary in `dir` with a private state directory.
pub fn deckmerge_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_deckmerge"))
        .args(args)
        .current_dir(dir)
        .env("DECKMERGE_LOG", "warn")
        .env_remove("DECKMERGE_DECK_TYPE")
        .env_remove("DECKMERGE_CONFIG")
        .env_remove("DECKMERGE_OWNER")
        .output()
        .expect("failed to run deckmerge")
}

/// Run deckmerge, assert success and parse stdout as JSON.
pub fn deckmerge_json(dir: &Path, args: &[&str]) -> serde_json::Value {
    let out = deckmerge_in(dir, args);
    assert!(
        out.status.success(),
        "deckmerge {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout is JSON")
}
