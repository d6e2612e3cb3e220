//! Value-transfer collaborator: moves funds to sellers and creators.

use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, params};
use thiserror::Error;

use crate::{
    domain::{identity::Identity, nft::Amount},
    storage::schema::{AMOUNT, MEMO, PAID_AT, PAYOUTS, RECIPIENT},
};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer to {0} was rejected")]
    Rejected(Identity),

    #[error("payout journal error: {0}")]
    Journal(#[from] rusqlite::Error),

    #[error("transfer service unavailable: {0}")]
    Unavailable(String),
}

/// A single outbound payment. Called without any ledger state held, so
/// implementations may block.
pub trait ValueTransfer: Send + Sync {
    fn transfer(&self, to: &Identity, amount: Amount, memo: &str) -> Result<(), TransferError>;
}

/// Local transfer service: records every payout in the `payouts` table.
pub struct PayoutJournal {
    db: Mutex<Connection>,
}

impl PayoutJournal {
    pub fn new(db: Connection) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn total_paid_to(&self, recipient: &Identity) -> Result<Amount, TransferError> {
        let db = self
            .db
            .lock()
            .map_err(|e| TransferError::Unavailable(format!("journal lock poisoned: {e}")))?;
        let total: i64 = db.query_row(
            &format!("SELECT COALESCE(SUM({AMOUNT}), 0) FROM {PAYOUTS} WHERE {RECIPIENT} = ?1"),
            params![recipient.as_str()],
            |row| row.get(0),
        )?;
        Ok(total as Amount)
    }
}

impl ValueTransfer for PayoutJournal {
    fn transfer(&self, to: &Identity, amount: Amount, memo: &str) -> Result<(), TransferError> {
        let amount = i64::try_from(amount)
            .map_err(|_| TransferError::Unavailable(format!("amount {amount} exceeds journal range")))?;
        let db = self
            .db
            .lock()
            .map_err(|e| TransferError::Unavailable(format!("journal lock poisoned: {e}")))?;
        db.execute(
            &format!(
                "INSERT INTO {PAYOUTS} ({RECIPIENT}, {AMOUNT}, {MEMO}, {PAID_AT}) VALUES (?1, ?2, ?3, ?4)"
            ),
            params![to.as_str(), amount, memo, Utc::now().timestamp()],
        )?;
        log::debug!("paid {amount} to {to} ({memo})");
        Ok(())
    }
}
