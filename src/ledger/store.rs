//! In-memory entity collections, keyed by id.
//!
//! The store does no authorization: callers pass the access guard first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        identity::Identity,
        nft::{Nft, NftId, RoyaltyPayment},
        project::{Project, ProjectId},
    },
    ledger::purchase::PendingSettlement,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStore {
    projects: BTreeMap<ProjectId, Project>,
    nfts: BTreeMap<NftId, Nft>,
    royalty_payments: Vec<RoyaltyPayment>,
    pending: BTreeMap<NftId, PendingSettlement>,
}

impl EntityStore {
    pub fn insert_project(&mut self, project: Project) {
        self.projects.insert(project.id, project);
    }

    pub fn get_project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(&id)
    }

    pub fn get_project_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.projects.get_mut(&id)
    }

    pub fn remove_project(&mut self, id: ProjectId) -> Option<Project> {
        self.projects.remove(&id)
    }

    /// Owned copies in id order.
    pub fn list_projects(&self) -> Vec<Project> {
        self.projects.values().cloned().collect()
    }

    pub fn projects_owned_by(&self, owner: &Identity) -> Vec<Project> {
        self.projects
            .values()
            .filter(|p| &p.owner == owner)
            .cloned()
            .collect()
    }

    pub fn insert_nft(&mut self, nft: Nft) {
        self.nfts.insert(nft.id, nft);
    }

    pub fn get_nft(&self, id: NftId) -> Option<&Nft> {
        self.nfts.get(&id)
    }

    pub fn get_nft_mut(&mut self, id: NftId) -> Option<&mut Nft> {
        self.nfts.get_mut(&id)
    }

    pub fn list_nfts(&self) -> Vec<Nft> {
        self.nfts.values().cloned().collect()
    }

    pub fn nfts_owned_by(&self, owner: &Identity) -> Vec<Nft> {
        self.nfts
            .values()
            .filter(|n| &n.owner == owner)
            .cloned()
            .collect()
    }

    pub fn nfts_created_by(&self, creator: &Identity) -> Vec<Nft> {
        self.nfts
            .values()
            .filter(|n| &n.creator == creator)
            .cloned()
            .collect()
    }

    pub fn record_royalty(&mut self, payment: RoyaltyPayment) {
        self.royalty_payments.push(payment);
    }

    pub fn royalties_paid_to(&self, recipient: &Identity) -> Vec<RoyaltyPayment> {
        self.royalty_payments
            .iter()
            .filter(|p| &p.recipient == recipient)
            .cloned()
            .collect()
    }

    pub fn insert_pending(&mut self, pending: PendingSettlement) {
        self.pending.insert(pending.nft_id, pending);
    }

    pub fn get_pending(&self, nft: NftId) -> Option<&PendingSettlement> {
        self.pending.get(&nft)
    }

    pub fn remove_pending(&mut self, nft: NftId) -> Option<PendingSettlement> {
        self.pending.remove(&nft)
    }

    pub fn list_pending(&self) -> Vec<PendingSettlement> {
        self.pending.values().cloned().collect()
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn nft_count(&self) -> usize {
        self.nfts.len()
    }
}
