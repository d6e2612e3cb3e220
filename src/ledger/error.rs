use std::fmt::Display;

use thiserror::Error;

use crate::domain::{nft::NftId, project::ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Project(ProjectId),
    Track { project: ProjectId, track: u64 },
    Nft(NftId),
    PendingSettlement(NftId),
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Project(id) => write!(f, "project {id}"),
            Entity::Track { project, track } => write!(f, "track {track} of project {project}"),
            Entity::Nft(id) => write!(f, "nft {id}"),
            Entity::PendingSettlement(id) => write!(f, "pending settlement for nft {id}"),
        }
    }
}

/// Why an input was refused before anything was touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("title must not be empty")]
    EmptyTitle,

    #[error("title longer than {max} characters")]
    TitleTooLong { max: usize },

    #[error("description longer than {max} characters")]
    DescriptionTooLong { max: usize },

    #[error("name must not be empty")]
    EmptyName,

    #[error("content hash must not be empty")]
    EmptyContentHash,

    #[error("price must be greater than zero")]
    ZeroPrice,

    #[error("royalty percentage {0} is outside 0..=100")]
    RoyaltyOutOfRange(u8),

    #[error("nft is not for sale")]
    NotForSale,

    #[error("buyer already owns this nft")]
    BuyerIsOwner,

    #[error("cannot transfer an nft to its current owner")]
    TransferToSelf,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("caller {caller} is not allowed to {action}")]
    Unauthorized { caller: String, action: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("nft {0} is locked by another purchase")]
    Locked(NftId),

    #[error("payment to seller failed, nothing changed: {0}")]
    ExternalTransferFailed(String),

    #[error("seller paid but royalty transfer for nft {nft} failed, reconciliation required: {reason}")]
    RoyaltyTransferFailed { nft: NftId, reason: String },

    #[error("identifier space exhausted")]
    AllocatorExhausted,

    #[error("unsupported snapshot schema version {found} (newest known is {supported})")]
    SchemaMismatch { found: u32, supported: u32 },

    #[error("ledger halted after a fatal error, mutating calls are refused")]
    Halted,

    #[error("ledger is draining for a checkpoint, mutating calls are refused")]
    Draining,
}

impl LedgerError {
    /// Fatal errors stop the service from accepting further mutations.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::AllocatorExhausted | LedgerError::SchemaMismatch { .. }
        )
    }

    pub(crate) fn unauthorized(caller: &impl Display, action: &'static str) -> Self {
        LedgerError::Unauthorized {
            caller: caller.to_string(),
            action,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
