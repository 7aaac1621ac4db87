// ============================
// callverify backend-lib/src/storage.rs
// ============================
//! Durable session store.
//!
//! Sessions live in a single redb table keyed by the provider's call id. The
//! value is the JSON object `{"timestamp": <expires at>, "flag": <confirmed>}`.
//! redb serialises write transactions and hands readers committed snapshots,
//! so a read that starts after a commit always observes it.
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Persisted state of one verification session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRecord {
    /// Unix time (seconds) the verification window closes
    #[serde(rename = "timestamp")]
    pub expires_at: i64,
    /// Whether the provider has confirmed the call
    #[serde(rename = "flag")]
    pub confirmed: bool,
}

impl SessionRecord {
    pub fn pending(expires_at: i64) -> Self {
        Self {
            expires_at,
            confirmed: false,
        }
    }

    /// The same session with the confirmation applied.
    #[must_use]
    pub fn confirm(self) -> Self {
        Self {
            confirmed: true,
            ..self
        }
    }
}

/// Trait for session storage backends
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create or overwrite the record for `call_id`.
    async fn put(&self, call_id: &str, record: SessionRecord) -> Result<(), AppError>;

    /// Fetch the record for `call_id`, `None` if it was never written.
    async fn get(&self, call_id: &str) -> Result<Option<SessionRecord>, AppError>;

    /// Mark the session for `call_id` confirmed in a single transaction.
    ///
    /// Returns the record as it was before, `None` if there is no session.
    /// A missing session is not created and a confirmed one is left as is.
    async fn confirm(&self, call_id: &str) -> Result<Option<SessionRecord>, AppError>;

    /// Delete every record whose window closed before `cutoff`.
    /// Returns the number of records removed.
    async fn purge_expired(&self, cutoff: i64) -> Result<usize, AppError>;
}

/// redb-backed implementation of the SessionStore trait.
///
/// Clones share one database handle; the file is closed when the last clone
/// is dropped.
#[derive(Clone)]
pub struct RedbSessionStore {
    db: Arc<Database>,
}

impl RedbSessionStore {
    /// Open the database at `path`, creating it if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Store(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }

        let db = Database::create(path).map_err(redb::Error::from)?;
        tracing::info!(path = %path.display(), "Session store opened");
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl SessionStore for RedbSessionStore {
    async fn put(&self, call_id: &str, record: SessionRecord) -> Result<(), AppError> {
        let value = encode_record(&record)?;
        let db = Arc::clone(&self.db);
        let key = call_id.to_owned();

        tokio::task::spawn_blocking(move || put_record(&db, &key, &value)).await??;
        Ok(())
    }

    async fn get(&self, call_id: &str) -> Result<Option<SessionRecord>, AppError> {
        let db = Arc::clone(&self.db);
        let key = call_id.to_owned();

        let raw = tokio::task::spawn_blocking(move || get_record(&db, &key)).await??;
        raw.map(|bytes| decode_record(call_id, &bytes)).transpose()
    }

    async fn confirm(&self, call_id: &str) -> Result<Option<SessionRecord>, AppError> {
        let db = Arc::clone(&self.db);
        let key = call_id.to_owned();

        tokio::task::spawn_blocking(move || confirm_record(&db, &key)).await?
    }

    async fn purge_expired(&self, cutoff: i64) -> Result<usize, AppError> {
        let db = Arc::clone(&self.db);
        let removed = tokio::task::spawn_blocking(move || purge_records(&db, cutoff)).await??;
        Ok(removed)
    }
}

fn put_record(db: &Database, call_id: &str, value: &[u8]) -> Result<(), redb::Error> {
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(SESSIONS)?;
        table.insert(call_id, value)?;
    }
    txn.commit()?;
    Ok(())
}

fn get_record(db: &Database, call_id: &str) -> Result<Option<Vec<u8>>, redb::Error> {
    let txn = db.begin_read()?;
    let table = match txn.open_table(SESSIONS) {
        Ok(table) => table,
        // Nothing has been written yet
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = table.get(call_id)?.map(|guard| guard.value().to_vec());
    Ok(value)
}

fn confirm_record(db: &Database, call_id: &str) -> Result<Option<SessionRecord>, AppError> {
    let txn = db.begin_write().map_err(redb::Error::from)?;
    let previous = {
        let mut table = txn.open_table(SESSIONS).map_err(redb::Error::from)?;
        let raw = table
            .get(call_id)
            .map_err(redb::Error::from)?
            .map(|guard| guard.value().to_vec());
        let previous = raw
            .map(|bytes| decode_record(call_id, &bytes))
            .transpose()?;

        if let Some(record) = previous.filter(|r| !r.confirmed) {
            let value = encode_record(&record.confirm())?;
            table
                .insert(call_id, value.as_slice())
                .map_err(redb::Error::from)?;
        }
        previous
    };
    // Dropping the transaction on an early return aborts it
    txn.commit().map_err(redb::Error::from)?;
    Ok(previous)
}

fn purge_records(db: &Database, cutoff: i64) -> Result<usize, redb::Error> {
    let txn = db.begin_write()?;
    let removed = {
        let mut table = txn.open_table(SESSIONS)?;
        let mut stale = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match serde_json::from_slice::<SessionRecord>(value.value()) {
                Ok(record) if record.expires_at < cutoff => stale.push(key.value().to_owned()),
                Ok(_) => {},
                Err(e) => {
                    tracing::warn!(call_id = key.value(), error = %e, "Skipping undecodable session record");
                },
            }
        }
        for key in &stale {
            table.remove(key.as_str())?;
        }
        stale.len()
    };
    txn.commit()?;
    Ok(removed)
}

fn encode_record(record: &SessionRecord) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec(record)
        .map_err(|e| AppError::Store(format!("Cannot encode session record: {e}")))
}

fn decode_record(call_id: &str, bytes: &[u8]) -> Result<SessionRecord, AppError> {
    serde_json::from_slice(bytes)
        .map_err(|e| AppError::Store(format!("Corrupt session record for {call_id}: {e}")))
}
