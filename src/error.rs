//! Engine error types for deckmerge.
//!
//! Defines [`EngineError`], the unified error type for sandbox, merge and
//! checkin operations. Error messages are operator-friendly: each variant
//! says what went wrong and how to proceed.

use std::fmt;
use std::path::PathBuf;

use deckmerge_store::{DeckIdentity, DeckType, IdentityError, RecordId, StoreError};

use crate::model::types::{MergeLogId, SandboxId, ValidationError};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified error type for engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// The sandbox does not exist (never created, discarded or checked in).
    SandboxNotFound {
        /// The sandbox that was looked up.
        id: SandboxId,
    },

    /// The deck identity has no baseline.
    DeckNotFound {
        /// The deck that was looked up.
        deck: DeckIdentity,
    },

    /// The record id is not visible in the sandbox.
    RecordNotFound {
        /// The sandbox being edited.
        sandbox: SandboxId,
        /// The missing record.
        record: RecordId,
    },

    /// The merge log entry does not exist or was pruned.
    MergeLogNotFound {
        /// The entry that was looked up.
        id: MergeLogId,
    },

    /// The deck's type does not match the record kind being used with it.
    DeckTypeMismatch {
        /// The deck that was addressed.
        deck: DeckIdentity,
        /// Deck types the record kind supports.
        expected: Vec<DeckType>,
    },

    /// An edit or resolution violates change-code or natural-key rules.
    Conflict {
        /// What conflicted.
        detail: String,
    },

    /// Resolutions do not cover the conflict set exactly once.
    IncompleteResolution {
        /// The sandbox being resolved.
        sandbox: SandboxId,
        /// Conflicting record ids without a resolution.
        missing: Vec<RecordId>,
        /// Extra detail (duplicate or unknown resolutions).
        detail: String,
    },

    /// The sandbox is invalid and must be re-merged first.
    StaleSandbox {
        /// The stale sandbox.
        id: SandboxId,
    },

    /// The merge log entry was already rolled back.
    AlreadyRolledBack {
        /// The entry.
        id: MergeLogId,
    },

    /// The record store failed; nothing was changed.
    StoreUnavailable {
        /// Store-provided description.
        detail: String,
    },

    /// A partial store write could not be repaired. The deck needs manual
    /// attention.
    Inconsistent {
        /// The affected deck.
        deck: DeckIdentity,
        /// What failed.
        detail: String,
    },

    /// A deck identity, owner, DTG or id failed validation.
    InvalidInput {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration file could not be loaded or parsed.
    Config {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// The persisted state file is unreadable.
    StateCorrupted {
        /// Path to the state file.
        path: PathBuf,
        /// Parse failure.
        detail: String,
    },

    /// An I/O error occurred.
    Io(std::io::Error),
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SandboxNotFound { id } => {
                write!(
                    f,
                    "sandbox {id} not found.\n  To fix: list open sandboxes:\n    deckmerge list"
                )
            }
            Self::DeckNotFound { deck } => {
                write!(
                    f,
                    "deck '{deck}' has no baseline.\n  To fix: import the deck first:\n    deckmerge --deck-type {} import {} <records.json>",
                    deck.deck_type,
                    deck.storm_id()
                )
            }
            Self::RecordNotFound { sandbox, record } => {
                write!(
                    f,
                    "record {record} is not visible in sandbox {sandbox}.\n  To fix: list the sandbox records:\n    deckmerge records {sandbox}"
                )
            }
            Self::MergeLogNotFound { id } => {
                write!(
                    f,
                    "merge log entry {id} not found (it may have been pruned).\n  To fix: list the retained entries:\n    deckmerge logs <storm>"
                )
            }
            Self::DeckTypeMismatch { deck, expected } => {
                let expected: Vec<&str> = expected.iter().map(|t| t.as_str()).collect();
                write!(
                    f,
                    "deck '{deck}' does not hold this record kind (expected deck type {}).\n  To fix: pass the matching --deck-type.",
                    expected.join(" or ")
                )
            }
            Self::Conflict { detail } => {
                write!(
                    f,
                    "conflict: {detail}\n  To fix: inspect the sandbox records and adjust the edit."
                )
            }
            Self::IncompleteResolution {
                sandbox,
                missing,
                detail,
            } => {
                write!(f, "resolutions for sandbox {sandbox} are incomplete")?;
                if !missing.is_empty() {
                    let ids: Vec<String> = missing.iter().map(ToString::to_string).collect();
                    write!(f, "; unresolved record(s): {}", ids.join(", "))?;
                }
                if !detail.is_empty() {
                    write!(f, "; {detail}")?;
                }
                write!(
                    f,
                    "\n  To fix: supply exactly one resolution per conflict:\n    deckmerge check {sandbox}"
                )
            }
            Self::StaleSandbox { id } => {
                write!(
                    f,
                    "sandbox {id} is stale: the baseline changed underneath it.\n  To fix: check and resolve conflicts, then retry:\n    deckmerge check {id}\n    deckmerge resolve {id} <resolutions.json>"
                )
            }
            Self::AlreadyRolledBack { id } => {
                write!(
                    f,
                    "merge log entry {id} was already rolled back.\n  To fix: nothing to do; a rollback applies once."
                )
            }
            Self::StoreUnavailable { detail } => {
                write!(
                    f,
                    "record store unavailable: {detail}\n  To fix: retry the operation; no changes were applied."
                )
            }
            Self::Inconsistent { deck, detail } => {
                write!(
                    f,
                    "deck '{deck}' may be inconsistent: {detail}\n  To fix: stop editing this deck and restore it from the merge log or a backup."
                )
            }
            Self::InvalidInput { value, reason } => {
                write!(f, "invalid value '{value}': {reason}")
            }
            Self::Config { path, detail } => {
                write!(
                    f,
                    "configuration error in '{}': {}\n  To fix: edit the config file and correct the issue.",
                    path.display(),
                    detail
                )
            }
            Self::StateCorrupted { path, detail } => {
                write!(
                    f,
                    "state file '{}' is unreadable: {}\n  To fix: restore it from a backup or move it aside to start fresh.",
                    path.display(),
                    detail
                )
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DeckNotFound { deck } => Self::DeckNotFound { deck },
            StoreError::DeckExists { deck } => Self::Conflict {
                detail: format!("deck '{deck}' already exists"),
            },
            StoreError::Unavailable { message } => Self::StoreUnavailable { detail: message },
            StoreError::PartialCommit {
                deck,
                applied,
                message,
            } => Self::Inconsistent {
                deck,
                detail: format!("{applied} write(s) applied before failure: {message}"),
            },
            err @ StoreError::JournalCompacted { .. } => Self::StoreUnavailable {
                detail: err.to_string(),
            },
        }
    }
}

impl From<crate::config::ConfigError> for EngineError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config {
            path: err.path.unwrap_or_default(),
            detail: err.message,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidInput {
            value: err.value,
            reason: err.reason,
        }
    }
}

impl From<IdentityError> for EngineError {
    fn from(err: IdentityError) -> Self {
        Self::InvalidInput {
            value: err.value,
            reason: err.reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn deck() -> DeckIdentity {
        DeckIdentity::new("AL", 5, 2024, DeckType::B).unwrap()
    }

    #[test]
    fn display_sandbox_not_found() {
        let msg = EngineError::SandboxNotFound { id: SandboxId(9) }.to_string();
        assert!(msg.contains("sandbox 9 not found"));
        assert!(msg.contains("deckmerge list"));
    }

    #[test]
    fn display_deck_not_found_suggests_import() {
        let msg = EngineError::DeckNotFound { deck: deck() }.to_string();
        assert!(msg.contains("al052024/b"));
        assert!(msg.contains("--deck-type b import al052024"));
    }

    #[test]
    fn display_deck_type_mismatch_lists_expected() {
        let msg = EngineError::DeckTypeMismatch {
            deck: deck(),
            expected: vec![DeckType::E, DeckType::GenesisE],
        }
        .to_string();
        assert!(msg.contains("e or genesis-e"));
    }

    #[test]
    fn display_incomplete_resolution() {
        let msg = EngineError::IncompleteResolution {
            sandbox: SandboxId(3),
            missing: vec![RecordId(4), RecordId(8)],
            detail: String::new(),
        }
        .to_string();
        assert!(msg.contains("unresolved record(s): 4, 8"));
        assert!(msg.contains("deckmerge check 3"));
        assert!(!msg.contains("; ;"));
    }

    #[test]
    fn display_stale_sandbox_points_at_check_and_resolve() {
        let msg = EngineError::StaleSandbox { id: SandboxId(2) }.to_string();
        assert!(msg.contains("stale"));
        assert!(msg.contains("deckmerge check 2"));
        assert!(msg.contains("deckmerge resolve 2"));
    }

    #[test]
    fn display_every_hint_variant_has_to_fix() {
        let errs = [
            EngineError::RecordNotFound {
                sandbox: SandboxId(1),
                record: RecordId(2),
            },
            EngineError::MergeLogNotFound { id: MergeLogId(5) },
            EngineError::Conflict {
                detail: "x".to_owned(),
            },
            EngineError::AlreadyRolledBack { id: MergeLogId(5) },
            EngineError::StoreUnavailable {
                detail: "down".to_owned(),
            },
            EngineError::Inconsistent {
                deck: deck(),
                detail: "half".to_owned(),
            },
            EngineError::Config {
                path: PathBuf::from("deckmerge.toml"),
                detail: "bad".to_owned(),
            },
            EngineError::StateCorrupted {
                path: PathBuf::from("b.json"),
                detail: "eof".to_owned(),
            },
            EngineError::Io(std::io::Error::other("disk full")),
        ];
        for err in errs {
            assert!(err.to_string().contains("To fix:"), "{err}");
        }
    }

    #[test]
    fn error_source_io_only() {
        let io = EngineError::Io(std::io::Error::other("x"));
        assert!(std::error::Error::source(&io).is_some());
        let other = EngineError::StaleSandbox { id: SandboxId(1) };
        assert!(std::error::Error::source(&other).is_none());
    }

    #[test]
    fn from_store_error_maps_variants() {
        let err: EngineError = StoreError::Unavailable {
            message: "timeout".to_owned(),
        }
        .into();
        assert!(matches!(err, EngineError::StoreUnavailable { ref detail } if detail == "timeout"));

        let err: EngineError = StoreError::DeckNotFound { deck: deck() }.into();
        assert!(matches!(err, EngineError::DeckNotFound { .. }));

        let err: EngineError = StoreError::PartialCommit {
            deck: deck(),
            applied: 2,
            message: "boom".to_owned(),
        }
        .into();
        assert!(matches!(err, EngineError::Inconsistent { .. }));
    }

    #[test]
    fn from_validation_error() {
        let err: EngineError = crate::model::types::Owner::new("").unwrap_err().into();
        match err {
            EngineError::InvalidInput { value, reason } => {
                assert_eq!(value, "");
                assert_eq!(reason, "must not be empty");
            }
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn from_config_error() {
        let err: EngineError = crate::config::ConfigError {
            path: Some(PathBuf::from("/etc/deckmerge.toml")),
            message: "bad syntax".to_owned(),
        }
        .into();
        assert!(matches!(err, EngineError::Config { ref path, .. } if path == &PathBuf::from("/etc/deckmerge.toml")));
    }
}
