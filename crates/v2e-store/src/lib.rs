//! Persistent state store: the embedded KV file that makes crash recovery
//! correct for both FSMs. See `store::Store` for the bucketed API and
//! `records` for the data model it persists.

mod error;
pub mod records;
mod store;

pub use error::StoreError;
pub use records::{
    Checkpoint, Event, EventType, MacroRecord, MacroState, PermitAllocation, ProviderRecord,
    ProviderState,
};
pub use store::Store;

/// Default file name for the embedded store, overridable by callers (the
/// CLI exposes this via `--db` / `V2E_DB_PATH`).
pub const DEFAULT_DB_FILE: &str = "session.db";
