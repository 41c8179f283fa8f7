//! Command-line surface: one subcommand per engine operation.
//!
//! Every command loads the deck type's state file under its exclusive lock,
//! runs against an [`Engine`] rebuilt from it, saves the state back when the
//! command can change it, and prints the result as pretty JSON on stdout.

use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use clap_complete::Shell;
use deckmerge::config::DeckmergeConfig;
use deckmerge::engine::{Engine, EngineOptions};
use deckmerge::merge::Resolution;
use deckmerge::model::{
    ADeckRecord, BDeckRecord, DeckRecord, Dtg, EDeckRecord, FDeckRecord, ForecastTrackRecord,
    MergeLogId, Owner, SandboxId, Selection, now_secs,
};
use deckmerge::sandbox::SandboxFilter;
use deckmerge::state::StateDir;
use deckmerge_store::{DeckIdentity, DeckType, RecordId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// deckmerge subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a deck from a JSON array of records
    ///
    /// Fails if the deck already exists or two records share a natural key.
    Import {
        /// Storm id, e.g. al052024
        storm: String,
        /// JSON file with the records ('-' for stdin)
        file: PathBuf,
    },

    /// Open a sandbox on a deck
    Checkout {
        /// Storm id, e.g. al052024
        storm: String,
        /// Owner of the new sandbox
        #[arg(long, env = "DECKMERGE_OWNER")]
        owner: String,
        /// Earliest DTG to include (YYYYMMDDHH)
        #[arg(long)]
        from: Option<String>,
        /// Latest DTG to include (YYYYMMDDHH)
        #[arg(long)]
        to: Option<String>,
        /// Only include these techniques (repeatable)
        #[arg(long = "technique")]
        techniques: Vec<String>,
    },

    /// Show the records visible in a sandbox
    Records {
        /// Sandbox id
        sandbox: SandboxId,
    },

    /// Add a new record to a sandbox
    Add {
        /// Sandbox id
        sandbox: SandboxId,
        /// JSON file with the record ('-' for stdin)
        file: PathBuf,
    },

    /// Replace a record's content in a sandbox
    Modify {
        /// Sandbox id
        sandbox: SandboxId,
        /// Record id
        record: RecordId,
        /// JSON file with the new content ('-' for stdin)
        file: PathBuf,
    },

    /// Mark a record deleted in a sandbox
    Delete {
        /// Sandbox id
        sandbox: SandboxId,
        /// Record id
        record: RecordId,
    },

    /// Revert a record in a sandbox to the baseline
    Undo {
        /// Sandbox id
        sandbox: SandboxId,
        /// Record id
        record: RecordId,
    },

    /// Compare a sandbox with the current baseline
    Check {
        /// Sandbox id
        sandbox: SandboxId,
    },

    /// Fold the baseline into a sandbox, resolving each conflict
    ///
    /// The file holds a JSON array of
    /// {"record_id": N, "action": "use_sandbox|use_baseline|merged", "merged_record": {...}}
    /// with exactly one entry per conflict reported by 'check'.
    Resolve {
        /// Sandbox id
        sandbox: SandboxId,
        /// JSON file with the resolutions ('-' for stdin)
        file: PathBuf,
    },

    /// Commit a sandbox into the baseline
    Checkin {
        /// Sandbox id
        sandbox: SandboxId,
    },

    /// Reverse a checkin
    Rollback {
        /// Merge log id
        merge_log: MergeLogId,
    },

    /// Delete a sandbox without committing it
    Discard {
        /// Sandbox id
        sandbox: SandboxId,
    },

    /// List open sandboxes
    List {
        /// Only sandboxes on this storm
        #[arg(long)]
        storm: Option<String>,
        /// Only sandboxes owned by this owner
        #[arg(long)]
        owner: Option<String>,
        /// Only stale sandboxes
        #[arg(long, conflicts_with = "valid")]
        stale: bool,
        /// Only valid sandboxes
        #[arg(long)]
        valid: bool,
    },

    /// Show the merge log
    Logs {
        /// Only entries on this storm
        #[arg(long)]
        storm: Option<String>,
        /// Show one entry in full
        #[arg(long, conflicts_with = "storm")]
        id: Option<MergeLogId>,
    },

    /// Discard sandboxes idle for longer than the configured TTL
    Purge,

    /// Print shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

impl Commands {
    /// Whether the command can change persisted state.
    const fn mutates(&self) -> bool {
        !matches!(
            self,
            Self::Records { .. }
                | Self::Check { .. }
                | Self::List { .. }
                | Self::Logs { .. }
                | Self::Completions { .. }
        )
    }
}

/// Run `command` on the state of `deck_type`.
///
/// # Errors
/// Any engine, state or input failure.
pub fn run(command: Commands, deck_type: DeckType, config: &DeckmergeConfig) -> Result<()> {
    match deck_type {
        DeckType::A => run_typed::<ADeckRecord>(command, deck_type, config),
        DeckType::B | DeckType::GenesisB => run_typed::<BDeckRecord>(command, deck_type, config),
        DeckType::E | DeckType::GenesisE => run_typed::<EDeckRecord>(command, deck_type, config),
        DeckType::F => run_typed::<FDeckRecord>(command, deck_type, config),
        DeckType::ForecastTrack => run_typed::<ForecastTrackRecord>(command, deck_type, config),
    }
}

fn run_typed<R: DeckRecord>(
    command: Commands,
    deck_type: DeckType,
    config: &DeckmergeConfig,
) -> Result<()> {
    let state_dir = StateDir::new(&config.state.dir);
    let lock = state_dir.lock(deck_type)?;
    let engine: Engine<R> =
        Engine::from_state(lock.load::<R>()?, EngineOptions::from_config(config));

    let mutates = command.mutates();
    let result = execute(&engine, command, deck_type);
    // Failed commands can still change state (a checkin that finds conflicts
    // invalidates its sandbox), so save either way.
    if mutates {
        lock.save(&engine.to_state()?)?;
    }
    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn execute<R: DeckRecord>(engine: &Engine<R>, command: Commands, deck_type: DeckType) -> Result<Value> {
    let now = now_secs();
    let deck = |storm: &str| -> Result<DeckIdentity> {
        Ok(DeckIdentity::from_storm_id(storm, deck_type)?)
    };
    let value = match command {
        Commands::Import { storm, file } => {
            let records: Vec<R> = read_json(&file)?;
            to_value(engine.import_deck(&deck(&storm)?, records)?)?
        }
        Commands::Checkout {
            storm,
            owner,
            from,
            to,
            techniques,
        } => {
            let selection = Selection {
                dtg_from: from.as_deref().map(Dtg::new).transpose()?,
                dtg_to: to.as_deref().map(Dtg::new).transpose()?,
                techniques,
            };
            let id = engine.checkout(&deck(&storm)?, selection, Owner::new(&owner)?, now)?;
            json!({ "sandbox_id": id })
        }
        Commands::Records { sandbox } => to_value(engine.sandbox_records(sandbox)?)?,
        Commands::Add { sandbox, file } => {
            let record: R = read_json(&file)?;
            let id = engine.add_record(sandbox, record, now)?;
            json!({ "record_id": id })
        }
        Commands::Modify {
            sandbox,
            record,
            file,
        } => {
            let content: R = read_json(&file)?;
            let code = engine.modify_record(sandbox, record, content, now)?;
            json!({ "record_id": record, "code": code })
        }
        Commands::Delete { sandbox, record } => {
            let code = engine.delete_record(sandbox, record, now)?;
            json!({ "record_id": record, "code": code })
        }
        Commands::Undo { sandbox, record } => {
            let reverted = engine.undo_record(sandbox, record, now)?;
            json!({ "record_id": record, "reverted": reverted })
        }
        Commands::Check { sandbox } => to_value(engine.check_mergeable(sandbox)?)?,
        Commands::Resolve { sandbox, file } => {
            let resolutions: Vec<Resolution<R>> = read_json(&file)?;
            let id = engine.apply_resolutions(sandbox, resolutions, now)?;
            json!({ "sandbox_id": id })
        }
        Commands::Checkin { sandbox } => to_value(engine.checkin(sandbox, now)?)?,
        Commands::Rollback { merge_log } => to_value(engine.rollback(merge_log, now)?)?,
        Commands::Discard { sandbox } => json!({ "discarded": engine.discard(sandbox) }),
        Commands::List {
            storm,
            owner,
            stale,
            valid,
        } => {
            let filter = SandboxFilter {
                deck: storm.as_deref().map(deck).transpose()?,
                owner: owner.as_deref().map(Owner::new).transpose()?,
                valid: if stale {
                    Some(false)
                } else if valid {
                    Some(true)
                } else {
                    None
                },
            };
            to_value(engine.list_sandboxes(&filter))?
        }
        Commands::Logs { storm, id } => match id {
            Some(id) => to_value(engine.merge_log_entry(id)?)?,
            None => {
                let deck = storm.as_deref().map(deck).transpose()?;
                to_value(engine.merge_logs(deck.as_ref()))?
            }
        },
        Commands::Purge => json!({ "purged": engine.purge_idle(now) }),
        Commands::Completions { .. } => Value::Null,
    };
    Ok(value)
}

fn to_value(value: impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}
