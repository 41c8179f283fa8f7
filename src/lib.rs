//! deckmerge library crate.
//!
//! The primary interface is the `deckmerge` binary. This lib.rs exposes the
//! engine so that integration tests and benchmarks can drive sandboxes,
//! mergeability checks and checkins directly without going through the CLI.

pub mod checkin;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod merge_log;
pub mod model;
pub mod sandbox;
pub mod state;
pub mod telemetry;

pub use checkin::{CheckinReport, RollbackReport};
pub use engine::{Engine, EngineOptions, ImportReport};
pub use error::EngineError;
