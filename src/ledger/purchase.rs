//! Purchase settlement: validate, lock, pay seller, pay royalty, commit.
//!
//! The ledger state mutex is released around each external transfer. Only
//! the per-nft purchase lock is held across those calls, so reads and
//! unrelated mutations keep running while a purchase is suspended.

use std::{collections::HashSet, sync::Mutex};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        identity::Identity,
        nft::{Amount, NftId, RoyaltyPayment, SaleKind},
    },
    ledger::{
        LedgerState,
        error::{Entity, InvalidInput, LedgerError, LedgerResult},
        lock_state,
    },
    transfer::{TransferError, ValueTransfer},
};

/// Exclusive, non-queueing purchase locks keyed by nft id.
#[derive(Debug, Default)]
pub struct PurchaseLocks {
    held: Mutex<HashSet<NftId>>,
}

/// Releases its nft when dropped.
#[derive(Debug)]
pub struct NftLock<'a> {
    locks: &'a PurchaseLocks,
    nft: NftId,
}

impl PurchaseLocks {
    /// Takes the lock for `nft` or fails with `Locked` right away.
    pub fn try_lock(&self, nft: NftId) -> LedgerResult<NftLock<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(nft) {
            return Err(LedgerError::Locked(nft));
        }
        Ok(NftLock { locks: self, nft })
    }

    #[cfg(test)]
    pub fn is_locked(&self, nft: NftId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&nft)
    }
}

impl Drop for NftLock<'_> {
    fn drop(&mut self) {
        self.locks
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.nft);
    }
}

/// How a sale price is divided between seller and creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub price: Amount,
    pub seller_amount: Amount,
    pub royalty_amount: Amount,
}

impl Split {
    /// `royalty = floor(price * pct / 100)`, the remainder goes to the seller,
    /// so truncation always lands on the seller's side.
    pub fn compute(price: Amount, royalty_percentage: u8) -> LedgerResult<Split> {
        if royalty_percentage > 100 {
            return Err(InvalidInput::RoyaltyOutOfRange(royalty_percentage).into());
        }
        let royalty = (u128::from(price) * u128::from(royalty_percentage)) / 100;
        // royalty <= price, so it fits back into an Amount
        let royalty_amount = royalty as Amount;
        Ok(Split {
            price,
            seller_amount: price - royalty_amount,
            royalty_amount,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseState {
    Requested,
    Validated,
    FundsLocked,
    Settled,
    Failed,
    PartiallySettled,
}

/// A purchase whose seller leg went through but whose royalty leg did not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlement {
    pub nft_id: NftId,
    pub seller: Identity,
    pub buyer: Identity,
    pub creator: Identity,
    pub split: Split,
    pub settlement_id: String,
    pub failed_at: i64,
}

impl PendingSettlement {
    pub fn involves(&self, who: &Identity) -> bool {
        who == &self.buyer || who == &self.seller || who == &self.creator
    }
}

/// Outcome of a settled purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub nft_id: NftId,
    pub seller: Identity,
    pub buyer: Identity,
    pub creator: Identity,
    pub split: Split,
    pub settlement_id: String,
}

struct Attempt {
    nft: NftId,
    state: PurchaseState,
}

impl Attempt {
    fn new(nft: NftId) -> Self {
        Self {
            nft,
            state: PurchaseState::Requested,
        }
    }

    fn advance(&mut self, to: PurchaseState) {
        log::debug!("purchase of nft {}: {:?} -> {:?}", self.nft, self.state, to);
        self.state = to;
    }
}

/// Listing terms captured while validating.
struct Terms {
    seller: Identity,
    creator: Identity,
    price: Amount,
    royalty_percentage: u8,
    settlement_id: String,
}

pub struct PurchaseEngine<'a> {
    pub state: &'a Mutex<LedgerState>,
    pub locks: &'a PurchaseLocks,
    pub transfers: &'a dyn ValueTransfer,
}

impl PurchaseEngine<'_> {
    pub fn buy(&self, nft_id: NftId, buyer: &Identity, now: i64) -> LedgerResult<Settlement> {
        let mut attempt = Attempt::new(nft_id);

        validate(&lock_state(self.state), nft_id, buyer)?;
        attempt.advance(PurchaseState::Validated);

        let _lock = self.locks.try_lock(nft_id).inspect_err(|_| {
            attempt.advance(PurchaseState::Failed);
        })?;
        // a purchase that held the lock before us may have committed in between
        let terms = validate(&lock_state(self.state), nft_id, buyer).inspect_err(|_| {
            attempt.advance(PurchaseState::Failed);
        })?;
        let split = Split::compute(terms.price, terms.royalty_percentage)?;
        attempt.advance(PurchaseState::FundsLocked);

        let settlement = Settlement {
            nft_id,
            seller: terms.seller,
            buyer: buyer.clone(),
            creator: terms.creator,
            split,
            settlement_id: terms.settlement_id,
        };

        if let Err(e) = self.pay(&settlement.seller, split.seller_amount, &settlement.settlement_id) {
            attempt.advance(PurchaseState::Failed);
            log::warn!("nft {nft_id}: seller payment failed, purchase aborted: {e}");
            return Err(LedgerError::ExternalTransferFailed(e.to_string()));
        }

        if let Err(e) = self.pay(&settlement.creator, split.royalty_amount, &settlement.settlement_id) {
            attempt.advance(PurchaseState::PartiallySettled);
            log::error!(
                "PARTIAL SETTLEMENT nft {nft_id} ({}): seller {} paid {}, royalty {} to {} failed: {e}. \
                 Ownership unchanged, royalty leg must be retried.",
                settlement.settlement_id,
                settlement.seller,
                split.seller_amount,
                split.royalty_amount,
                settlement.creator,
            );
            lock_state(self.state).store.insert_pending(PendingSettlement {
                nft_id,
                seller: settlement.seller.clone(),
                buyer: settlement.buyer.clone(),
                creator: settlement.creator.clone(),
                split,
                settlement_id: settlement.settlement_id.clone(),
                failed_at: now,
            });
            return Err(LedgerError::RoyaltyTransferFailed {
                nft: nft_id,
                reason: e.to_string(),
            });
        }

        commit(&mut lock_state(self.state), &settlement, now);
        attempt.advance(PurchaseState::Settled);
        log::info!(
            "nft {nft_id} sold to {} for {} (seller {}, royalty {})",
            settlement.buyer,
            split.price,
            split.seller_amount,
            split.royalty_amount
        );
        Ok(settlement)
    }

    /// Re-sends only the royalty leg of a partially settled purchase and
    /// commits it on success.
    pub fn retry_royalty(&self, nft_id: NftId, caller: &Identity, now: i64) -> LedgerResult<Settlement> {
        let _lock = self.locks.try_lock(nft_id)?;

        let pending = lock_state(self.state)
            .store
            .get_pending(nft_id)
            .cloned()
            .ok_or(LedgerError::NotFound(Entity::PendingSettlement(nft_id)))?;
        if !pending.involves(caller) {
            return Err(LedgerError::unauthorized(caller, "reconcile this purchase"));
        }

        if let Err(e) = self.pay(&pending.creator, pending.split.royalty_amount, &pending.settlement_id) {
            log::error!(
                "PARTIAL SETTLEMENT nft {nft_id} ({}): royalty retry to {} failed again: {e}",
                pending.settlement_id,
                pending.creator
            );
            return Err(LedgerError::RoyaltyTransferFailed {
                nft: nft_id,
                reason: e.to_string(),
            });
        }

        let settlement = Settlement {
            nft_id,
            seller: pending.seller,
            buyer: pending.buyer,
            creator: pending.creator,
            split: pending.split,
            settlement_id: pending.settlement_id,
        };
        let mut state = lock_state(self.state);
        state.store.remove_pending(nft_id);
        commit(&mut state, &settlement, now);
        log::info!("nft {nft_id}: royalty reconciled, sold to {}", settlement.buyer);
        Ok(settlement)
    }

    fn pay(&self, to: &Identity, amount: Amount, memo: &str) -> Result<(), TransferError> {
        if amount == 0 {
            return Ok(());
        }
        self.transfers.transfer(to, amount, memo)
    }
}

fn validate(state: &LedgerState, nft_id: NftId, buyer: &Identity) -> LedgerResult<Terms> {
    let nft = state
        .store
        .get_nft(nft_id)
        .ok_or(LedgerError::NotFound(Entity::Nft(nft_id)))?;
    if state.store.get_pending(nft_id).is_some() {
        return Err(LedgerError::Locked(nft_id));
    }
    if !nft.for_sale {
        return Err(InvalidInput::NotForSale.into());
    }
    if &nft.owner == buyer {
        return Err(InvalidInput::BuyerIsOwner.into());
    }
    if nft.price == 0 {
        return Err(InvalidInput::ZeroPrice.into());
    }
    Ok(Terms {
        seller: nft.owner.clone(),
        creator: nft.creator.clone(),
        price: nft.price,
        royalty_percentage: nft.royalty_percentage,
        settlement_id: format!("{nft_id}_{}", nft.sale_history.len()),
    })
}

/// Last step of every settlement: nothing after this can fail.
fn commit(state: &mut LedgerState, settlement: &Settlement, now: i64) {
    let Some(nft) = state.store.get_nft_mut(settlement.nft_id) else {
        log::error!(
            "nft {} vanished before commit of {}",
            settlement.nft_id,
            settlement.settlement_id
        );
        return;
    };
    nft.change_owner(
        settlement.buyer.clone(),
        settlement.split.price,
        SaleKind::Sale,
        now,
    );
    if settlement.split.royalty_amount > 0 {
        state.store.record_royalty(RoyaltyPayment {
            recipient: settlement.creator.clone(),
            amount: settlement.split.royalty_amount,
            nft_id: settlement.nft_id,
            settlement_id: settlement.settlement_id.clone(),
        });
    }
}
