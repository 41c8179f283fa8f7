//! Record model: identifiers, change codes, deck record kinds and the
//! capability traits the engine is generic over.

pub mod deck;
pub mod record;
pub mod types;

pub use deck::{ADeckRecord, BDeckRecord, EDeckRecord, FDeckRecord, ForecastTrackRecord};
pub use record::{DeckRecord, FieldDiff, RecordContent, RecordIdentity, Selection};
pub use types::{ChangeCode, Dtg, MergeLogId, Owner, SandboxId, ValidationError, now_secs};
