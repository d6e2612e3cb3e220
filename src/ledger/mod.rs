//! The authoritative ledger for projects, tracks and nfts.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::ledger::{allocator::IdAllocator, store::EntityStore};

pub mod allocator;
pub mod drain;
pub mod error;
pub mod guard;
pub mod persist;
pub mod purchase;
pub mod service;
pub mod store;

/// Everything a snapshot captures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub ids: IdAllocator,
    pub store: EntityStore,
}

/// Mutations under the state lock are validated up front and never panic
/// midway, a poisoned lock still holds a consistent state.
pub(crate) fn lock_state(state: &Mutex<LedgerState>) -> MutexGuard<'_, LedgerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
