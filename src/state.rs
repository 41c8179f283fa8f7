//! Persisted engine state for the command-line tool.
//!
//! Each deck type has one JSON state file under the state directory holding
//! the record store, the sandbox arena and the merge log:
//!
//! ```text
//! .deckmerge/
//!   b.json      # StateFile<BDeckRecord>
//!   b.lock      # exclusive lock held while a command runs
//!   a.json
//!   ...
//! ```
//!
//! A command takes the lock, loads, runs, saves and releases. Saves are
//! atomic: the state is written to a temp file in the same directory,
//! fsynced, then renamed over the target.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use deckmerge_store::{DeckType, MemSnapshot, MemStore};
use fs4::fs_std::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineOptions};
use crate::error::EngineError;
use crate::merge_log::MergeLog;
use crate::model::record::DeckRecord;
use crate::sandbox::{ArenaSnapshot, SandboxArena};

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// StateFile
// ---------------------------------------------------------------------------

/// Everything a CLI invocation needs to rebuild an [`Engine`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile<R> {
    /// Format version.
    pub version: u32,
    /// Record store contents.
    pub store: MemSnapshot<R>,
    /// Open sandboxes.
    pub sandboxes: ArenaSnapshot<R>,
    /// Merge history.
    pub merge_log: MergeLog<R>,
}

impl<R> Default for StateFile<R> {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            store: MemSnapshot::default(),
            sandboxes: ArenaSnapshot::default(),
            merge_log: MergeLog::default(),
        }
    }
}

impl<R: DeckRecord> Engine<R, MemStore<R>> {
    /// Rebuild an engine from saved state.
    #[must_use]
    pub fn from_state(state: StateFile<R>, options: EngineOptions) -> Self {
        Self::from_parts(
            MemStore::from_snapshot(state.store),
            SandboxArena::from_snapshot(state.sandboxes),
            state.merge_log,
            options,
        )
    }

    /// Capture the engine's full state.
    ///
    /// # Errors
    /// Fails only if the store's internal lock is poisoned.
    pub fn to_state(&self) -> Result<StateFile<R>, EngineError> {
        Ok(StateFile {
            version: STATE_VERSION,
            store: self.store.snapshot()?,
            sandboxes: self.sandboxes.snapshot(),
            merge_log: self.merge_log_snapshot(),
        })
    }
}

// ---------------------------------------------------------------------------
// StateDir / StateLock
// ---------------------------------------------------------------------------

/// The state directory.
#[derive(Clone, Debug)]
pub struct StateDir {
    dir: PathBuf,
}

impl StateDir {
    /// A state directory rooted at `dir`. Nothing is created yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for `deck_type`.
    pub fn state_path(&self, deck_type: DeckType) -> PathBuf {
        self.dir.join(format!("{deck_type}.json"))
    }

    /// Path of the lock file for `deck_type`.
    pub fn lock_path(&self, deck_type: DeckType) -> PathBuf {
        self.dir.join(format!("{deck_type}.lock"))
    }

    /// Take the exclusive lock for `deck_type`, blocking until it is free.
    /// The lock is released when the returned guard is dropped.
    ///
    /// # Errors
    /// I/O failures creating the directory or locking the file.
    pub fn lock(&self, deck_type: DeckType) -> Result<StateLock, EngineError> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(deck_type))?;
        FileExt::lock_exclusive(&file)?;
        tracing::debug!(dir = %self.dir.display(), %deck_type, "state lock acquired");
        Ok(StateLock {
            _file: file,
            path: self.state_path(deck_type),
        })
    }
}

/// Exclusive access to one deck type's state file.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
    path: PathBuf,
}

impl StateLock {
    /// Path of the guarded state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file. A missing file yields empty state.
    ///
    /// # Errors
    /// `StateCorrupted` if the file does not parse, `Io` on read failure.
    pub fn load<R: DeserializeOwned>(&self) -> Result<StateFile<R>, EngineError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateFile::default());
            }
            Err(e) => return Err(e.into()),
        };
        let state: StateFile<R> =
            serde_json::from_str(&contents).map_err(|e| EngineError::StateCorrupted {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        if state.version > STATE_VERSION {
            return Err(EngineError::StateCorrupted {
                path: self.path.clone(),
                detail: format!(
                    "state version {} is newer than supported version {STATE_VERSION}",
                    state.version
                ),
            });
        }
        Ok(state)
    }

    /// Write the state file atomically.
    ///
    /// # Errors
    /// I/O or serialization failure. The previous file is left intact.
    pub fn save<R: Serialize>(&self, state: &StateFile<R>) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(state).map_err(|e| EngineError::StateCorrupted {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| EngineError::Io(e.error))?;
        tracing::debug!(path = %self.path.display(), bytes = json.len(), "state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use deckmerge_store::{DeckIdentity, RecordStore};

    use super::*;
    use crate::merge::types::Resolution;
    use crate::model::deck::BDeckRecord;
    use crate::model::record::Selection;
    use crate::model::types::{Dtg, Owner};

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

    #[test]
    fn missing_file_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::new(dir.path().join("state"));
        let lock = state_dir.lock(DeckType::B).unwrap();
        let state: StateFile<BDeckRecord> = lock.load().unwrap();
        assert_eq!(state, StateFile::default());
        assert!(state_dir.lock_path(DeckType::B).exists());
    }

    #[test]
    fn engine_state_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::new(dir.path());
        let deck = DeckIdentity::new("AL", 5, 2024, DeckType::B).unwrap();

        let engine: Engine<BDeckRecord> = Engine::in_memory(EngineOptions::default());
        let ids = engine
            .import_deck(&deck, vec![fix("2024081500", 50)])
            .unwrap()
            .ids;
        let sb = engine
            .checkout(&deck, Selection::all(), Owner::new("alice").unwrap(), 1)
            .unwrap();
        engine.modify_record(sb, ids[0], fix("2024081500", 60), 2).unwrap();

        {
            let lock = state_dir.lock(DeckType::B).unwrap();
            lock.save(&engine.to_state().unwrap()).unwrap();
        }

        let lock = state_dir.lock(DeckType::B).unwrap();
        let restored: Engine<BDeckRecord> =
            Engine::from_state(lock.load().unwrap(), EngineOptions::default());
        assert_eq!(restored.sandbox(sb).unwrap(), engine.sandbox(sb).unwrap());
        assert_eq!(
            restored.store().get(&deck, &|_| true).unwrap(),
            engine.store().get(&deck, &|_| true).unwrap()
        );

        // Ids keep increasing after a reload.
        let next = restored
            .checkout(&deck, Selection::all(), Owner::new("bob").unwrap(), 3)
            .unwrap();
        assert!(next > sb);
        let new_id = restored.add_record(next, fix("2024081506", 40), 4).unwrap();
        assert!(new_id > ids[0]);
    }

    #[test]
    fn deck_records_cross_json_without_default() {
        let deck = DeckIdentity::new("AL", 5, 2024, DeckType::B).unwrap();
        let engine: Engine<BDeckRecord> = Engine::in_memory(EngineOptions::default());
        let ids = engine
            .import_deck(&deck, vec![fix("2024081500", 50)])
            .unwrap()
            .ids;
        let sb = engine
            .checkout(&deck, Selection::all(), Owner::new("alice").unwrap(), 1)
            .unwrap();
        engine.modify_record(sb, ids[0], fix("2024081500", 60), 2).unwrap();
        engine.add_record(sb, fix("2024081506", 45), 2).unwrap();

        let state = engine.to_state().unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: StateFile<BDeckRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);

        let text = format!(
            r#"[{{"record_id":{},"action":"use_sandbox"}},{{"record_id":{},"action":"merged","merged_record":{}}}]"#,
            ids[0].0,
            ids[0].0 + 1,
            serde_json::to_string(&fix("2024081500", 65)).unwrap()
        );
        let resolutions: Vec<Resolution<BDeckRecord>> = serde_json::from_str(&text).unwrap();
        assert_eq!(resolutions[0].merged_record, None);
        assert_eq!(
            resolutions[1].merged_record.as_ref().map(|r| r.max_wind_kt),
            Some(65)
        );
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::new(dir.path());
        fs::write(state_dir.state_path(DeckType::A), "{not json").unwrap();
        let lock = state_dir.lock(DeckType::A).unwrap();
        let err = lock.load::<BDeckRecord>().unwrap_err();
        assert!(matches!(err, EngineError::StateCorrupted { .. }));
    }
}
