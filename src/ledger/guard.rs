use crate::{
    domain::{identity::Identity, nft::Nft, project::Project},
    ledger::error::{LedgerError, LedgerResult},
};

/// What a caller may do with a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    None,
    Contributor,
    Owner,
}

pub fn authorize(caller: &Identity, project: &Project) -> Access {
    if caller == &project.owner {
        Access::Owner
    } else if project.is_contributor(caller) {
        Access::Contributor
    } else {
        Access::None
    }
}

/// Content operations: tracks, metadata, minting from the project.
pub fn require_contributor(
    caller: &Identity,
    project: &Project,
    action: &'static str,
) -> LedgerResult<()> {
    match authorize(caller, project) {
        Access::Owner | Access::Contributor => Ok(()),
        Access::None => Err(LedgerError::unauthorized(caller, action)),
    }
}

/// Membership operations: collaborators, deletion.
pub fn require_owner(caller: &Identity, project: &Project, action: &'static str) -> LedgerResult<()> {
    match authorize(caller, project) {
        Access::Owner => Ok(()),
        Access::Contributor | Access::None => Err(LedgerError::unauthorized(caller, action)),
    }
}

pub fn require_nft_owner(caller: &Identity, nft: &Nft, action: &'static str) -> LedgerResult<()> {
    if caller == &nft.owner {
        Ok(())
    } else {
        Err(LedgerError::unauthorized(caller, action))
    }
}
