//! Embedded single-file KV store.
//!
//! Backed by [`redb`]. Five bucketed tables created on open if absent:
//! `fsm_states` (macro), `provider_states`, `checkpoints`, `permits`, and
//! `sessions` (reserved for future multi-session metadata; unused by the
//! core today but created so the bucket layout in `spec.md` §6 is stable
//! from the first write).
//!
//! Every record is bincode-encoded before being stored as a table value —
//! bincode's field-declaration-order encoding is the "stable field ordering"
//! the persisted file layout calls for.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableTable, TableDefinition};

use crate::records::{Checkpoint, MacroRecord, PermitAllocation, ProviderRecord};
use crate::StoreError;

const FSM_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("fsm_states");
const PROVIDER_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("provider_states");
const CHECKPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("checkpoints");
const PERMITS: TableDefinition<&str, &[u8]> = TableDefinition::new("permits");
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the embedded store. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Opens (creating if absent) the KV file at `path`, ensuring every
    /// bucket exists. Bounded by a 10-second acquisition timeout per
    /// `spec.md` §4.5.
    pub async fn open(path: impl AsRef<Path> + Send + 'static) -> Result<Self, StoreError> {
        let opened = tokio::time::timeout(
            OPEN_TIMEOUT,
            tokio::task::spawn_blocking(move || Self::open_blocking(path)),
        )
        .await
        .map_err(|_| StoreError::OpenTimeout)?
        .map_err(|e| StoreError::Backend(e.to_string()))??;

        Ok(opened)
    }

    fn open_blocking(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Backend(e.to_string()))?;

        let write = db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            write
                .open_table(FSM_STATES)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            write
                .open_table(PROVIDER_STATES)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            write
                .open_table(CHECKPOINTS)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            write
                .open_table(PERMITS)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            write
                .open_table(SESSIONS)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        write.commit().map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    // -----------------------------------------------------------------
    // Macro state
    // -----------------------------------------------------------------

    pub async fn save_macro_state(&self, record: MacroRecord) -> Result<(), StoreError> {
        self.put(FSM_STATES, record.id.clone(), &record).await
    }

    pub async fn get_macro_state(&self, id: &str) -> Result<Option<MacroRecord>, StoreError> {
        self.get(FSM_STATES, id.to_string()).await
    }

    // -----------------------------------------------------------------
    // Provider state
    // -----------------------------------------------------------------

    pub async fn save_provider_state(&self, record: ProviderRecord) -> Result<(), StoreError> {
        self.put(PROVIDER_STATES, record.id.clone(), &record).await
    }

    pub async fn get_provider_state(&self, id: &str) -> Result<Option<ProviderRecord>, StoreError> {
        self.get(PROVIDER_STATES, id.to_string()).await
    }

    pub async fn list_provider_states(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        self.list_all(PROVIDER_STATES).await
    }

    pub async fn delete_provider_state(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let write = db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
            {
                let mut table = write
                    .open_table(PROVIDER_STATES)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                table
                    .remove(id.as_str())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
            write.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    // -----------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------

    /// Persists a checkpoint. Fails without writing if `checkpoint.urn` does
    /// not parse.
    pub async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        checkpoint
            .validate_urn()
            .map_err(|e| StoreError::InvalidUrn(e.to_string()))?;
        self.put(CHECKPOINTS, checkpoint.urn.clone(), &checkpoint).await
    }

    pub async fn get_checkpoint(&self, urn: &str) -> Result<Option<Checkpoint>, StoreError> {
        self.get(CHECKPOINTS, urn.to_string()).await
    }

    /// Linear scan over all checkpoints, filtered by `provider_id`.
    pub async fn list_checkpoints_by_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        let all: Vec<Checkpoint> = self.list_all(CHECKPOINTS).await?;
        Ok(all
            .into_iter()
            .filter(|c| c.provider_id == provider_id)
            .collect())
    }

    // -----------------------------------------------------------------
    // Permits
    // -----------------------------------------------------------------

    pub async fn save_permit_allocation(
        &self,
        allocation: PermitAllocation,
    ) -> Result<(), StoreError> {
        self.put(PERMITS, allocation.provider_id.clone(), &allocation)
            .await
    }

    pub async fn get_permit_allocation(
        &self,
        provider_id: &str,
    ) -> Result<Option<PermitAllocation>, StoreError> {
        self.get(PERMITS, provider_id.to_string()).await
    }

    // -----------------------------------------------------------------
    // Generic helpers
    // -----------------------------------------------------------------

    async fn put<T>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: String,
        value: &T,
    ) -> Result<(), StoreError>
    where
        T: serde::Serialize,
    {
        let bytes = bincode::serialize(value).map_err(|e| StoreError::Encode(e.to_string()))?;
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let write = db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
            {
                let mut t = write
                    .open_table(table)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                t.insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
            write.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn get<T>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: String,
    ) -> Result<Option<T>, StoreError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let db = self.db.clone();
        let bytes = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, StoreError> {
            let read = db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
            let t = read
                .open_table(table)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(t.get(key.as_str())
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .map(|v| v.value().to_vec()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))??;

        match bytes {
            Some(b) => {
                let v = bincode::deserialize(&b).map_err(|e| StoreError::Encode(e.to_string()))?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    async fn list_all<T>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> Result<Vec<T>, StoreError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let db = self.db.clone();
        let raw = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<u8>>, StoreError> {
            let read = db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
            let t = read
                .open_table(table)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let mut out = Vec::new();
            for entry in t.iter().map_err(|e| StoreError::Backend(e.to_string()))? {
                let (_, v) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
                out.push(v.value().to_vec());
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))??;

        raw.into_iter()
            .map(|b| bincode::deserialize(&b).map_err(|e| StoreError::Encode(e.to_string())))
            .collect()
    }
}
