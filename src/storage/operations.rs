use std::sync::Arc;

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use crate::{
    config::{Database, LedgerConfig},
    ledger::{
        LedgerState,
        persist::SCHEMA_VERSION as LEDGER_SCHEMA_VERSION,
        service::Ledger,
    },
    storage::{
        db::{self, SecondsSinceUnix},
        error::StorageError,
        schema::{columns, tables},
    },
    transfer::ValueTransfer,
};

use columns::*;
use tables::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub snapshot_id: i64,
    pub schema_version: u32,
    pub taken_at: SecondsSinceUnix,
    pub size: usize,
}

/// Keeps ledger snapshots, one row per restart cycle.
pub struct Storage {
    pub(crate) db: rusqlite::Connection,
}

impl Storage {
    /// when called, opens a data base connection
    pub fn new(db_config: &Database) -> Result<Self, StorageError> {
        Ok(Self::from_existing_conn(db::open(db_config)?))
    }

    pub fn from_existing_conn(db: rusqlite::Connection) -> Self {
        Self { db }
    }

    pub fn save_snapshot(
        &mut self,
        schema_version: u32,
        body: &[u8],
    ) -> Result<SnapshotInfo, StorageError> {
        let taken_at = Utc::now().timestamp();
        let tx = self.db.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {SNAPSHOTS} ({SCHEMA_VERSION}, {TAKEN_AT}, {BODY}) VALUES (?1, ?2, ?3)"
            ),
            params![schema_version, taken_at, body],
        )?;
        let snapshot_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(SnapshotInfo {
            snapshot_id,
            schema_version,
            taken_at,
            size: body.len(),
        })
    }

    pub fn latest_snapshot(&self) -> Result<Option<(SnapshotInfo, Vec<u8>)>, StorageError> {
        Ok(self
            .db
            .query_row(
                &format!(
                    "SELECT {SNAPSHOT_ID}, {SCHEMA_VERSION}, {TAKEN_AT}, {BODY} FROM {SNAPSHOTS}
                     ORDER BY {SNAPSHOT_ID} DESC LIMIT 1"
                ),
                [],
                |row| {
                    let body: Vec<u8> = row.get(3)?;
                    Ok((
                        SnapshotInfo {
                            snapshot_id: row.get(0)?,
                            schema_version: row.get(1)?,
                            taken_at: row.get(2)?,
                            size: body.len(),
                        },
                        body,
                    ))
                },
            )
            .optional()?)
    }

    /// Newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, StorageError> {
        let mut stmt = self.db.prepare(&format!(
            "SELECT {SNAPSHOT_ID}, {SCHEMA_VERSION}, {TAKEN_AT}, LENGTH({BODY}) FROM {SNAPSHOTS}
             ORDER BY {SNAPSHOT_ID} DESC"
        ))?;
        let snapshots = stmt
            .query_map([], |row| {
                Ok(SnapshotInfo {
                    snapshot_id: row.get(0)?,
                    schema_version: row.get(1)?,
                    taken_at: row.get(2)?,
                    size: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    /// Startup path: rebuilds the ledger from the newest snapshot, or starts
    /// an empty one when there is none. An unreadable snapshot is an error,
    /// never silently replaced by an empty ledger.
    pub fn restore_ledger(
        &self,
        transfers: Arc<dyn ValueTransfer>,
        limits: LedgerConfig,
    ) -> Result<Ledger, StorageError> {
        match self.latest_snapshot()? {
            Some((info, body)) => {
                log::info!(
                    "restoring snapshot {} (schema v{}, {} bytes)",
                    info.snapshot_id,
                    info.schema_version,
                    info.size
                );
                Ok(Ledger::restore(&body, transfers, limits)?)
            }
            None => {
                log::info!("no snapshot found, starting with an empty ledger");
                Ok(Ledger::new(LedgerState::default(), transfers, limits))
            }
        }
    }

    /// Pre-restart checkpoint.
    pub fn checkpoint(&mut self, ledger: &Ledger) -> Result<SnapshotInfo, StorageError> {
        let body = ledger.snapshot()?;
        let info = self.save_snapshot(LEDGER_SCHEMA_VERSION, &body)?;
        log::info!(
            "stored snapshot {} ({} bytes)",
            info.snapshot_id,
            info.size
        );
        Ok(info)
    }
}
