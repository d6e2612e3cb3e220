//! The externally callable operation set.
//!
//! Read-only operations take the state lock briefly and never touch the
//! purchase locks. Mutating operations pass the access guard, and every
//! mutation of an nft holds that nft's purchase lock.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    config::LedgerConfig,
    domain::{
        hash::ContentHash,
        identity::Identity,
        nft::{Amount, MintRequest, Nft, NftId, RoyaltyPayment, SaleKind, SaleRecord},
        project::{NewTrack, Project, ProjectId, Track, TrackId},
    },
    ledger::{
        LedgerState,
        drain::{CallGuard, DrainGate},
        error::{Entity, InvalidInput, LedgerError, LedgerResult},
        guard::{require_contributor, require_nft_owner, require_owner},
        lock_state,
        persist::{self, PersistError},
        purchase::{PendingSettlement, PurchaseEngine, PurchaseLocks, Settlement},
    },
    transfer::ValueTransfer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    ReadOnly,
    Mutating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateProject,
    GetProject,
    ListProjects,
    ListUserProjects,
    UpdateProject,
    DeleteProject,
    AddTrack,
    RemoveTrack,
    GetProjectTracks,
    AddCollaborator,
    RemoveCollaborator,
    MintNft,
    GetNft,
    ListNfts,
    GetNftHistory,
    ListUserNfts,
    ListCreatedNfts,
    UpdateNftPrice,
    SetNftForSale,
    TransferNft,
    BuyNft,
    RetryRoyalty,
    ListRoyaltyEarnings,
    ListPendingSettlements,
    MarketplaceStats,
}

impl Operation {
    pub const fn kind(self) -> CallKind {
        use Operation::*;
        match self {
            CreateProject | UpdateProject | DeleteProject | AddTrack | RemoveTrack
            | AddCollaborator | RemoveCollaborator | MintNft | UpdateNftPrice | SetNftForSale
            | TransferNft | BuyNft | RetryRoyalty => CallKind::Mutating,
            GetProject | ListProjects | ListUserProjects | GetProjectTracks | GetNft | ListNfts
            | GetNftHistory | ListUserNfts | ListCreatedNfts | ListRoyaltyEarnings
            | ListPendingSettlements | MarketplaceStats => CallKind::ReadOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MarketplaceStats {
    pub total_nfts: u64,
    pub nfts_for_sale: u64,
    pub total_sales: u64,
    pub total_volume: Amount,
}

pub struct Ledger {
    state: Mutex<LedgerState>,
    locks: PurchaseLocks,
    transfers: Arc<dyn ValueTransfer>,
    limits: LedgerConfig,
    halted: AtomicBool,
    gate: DrainGate,
}

impl Ledger {
    pub fn new(state: LedgerState, transfers: Arc<dyn ValueTransfer>, limits: LedgerConfig) -> Self {
        Self {
            state: Mutex::new(state),
            locks: PurchaseLocks::default(),
            transfers,
            limits,
            halted: AtomicBool::new(false),
            gate: DrainGate::default(),
        }
    }

    /// Rebuilds a ledger from a snapshot taken by [`Ledger::snapshot`].
    pub fn restore(
        bytes: &[u8],
        transfers: Arc<dyn ValueTransfer>,
        limits: LedgerConfig,
    ) -> Result<Self, PersistError> {
        let state = persist::restore(bytes)?;
        log::info!(
            "restored ledger: {} projects, {} nfts, next id {}",
            state.store.project_count(),
            state.store.nft_count(),
            state.ids.peek()
        );
        Ok(Self::new(state, transfers, limits))
    }

    pub fn snapshot(&self) -> Result<Vec<u8>, PersistError> {
        persist::snapshot(&lock_state(&self.state))
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Admits a mutating call. The guard must live until the call returns.
    fn begin(&self, op: Operation) -> LedgerResult<CallGuard<'_>> {
        debug_assert_eq!(op.kind(), CallKind::Mutating);
        if self.is_halted() {
            return Err(LedgerError::Halted);
        }
        self.gate.enter()
    }

    /// Stops admitting mutating calls and waits until the admitted ones,
    /// purchases suspended on a transfer included, have returned.
    pub fn quiesce(&self) {
        self.gate.drain();
        log::info!("ledger quiesced");
    }

    /// Admits mutating calls again after [`Ledger::quiesce`].
    pub fn resume(&self) {
        self.gate.resume();
    }

    /// Stops accepting mutations once a fatal error surfaced.
    fn check_fatal<T>(&self, op: Operation, result: LedgerResult<T>) -> LedgerResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.halted.store(true, Ordering::SeqCst);
                log::error!("FATAL during {op:?}: {e}. Ledger halted, mutating calls are refused");
            }
        }
        result
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn check_title(&self, title: &str) -> LedgerResult<()> {
        if title.trim().is_empty() {
            return Err(InvalidInput::EmptyTitle.into());
        }
        if title.chars().count() > self.limits.max_title_len {
            return Err(InvalidInput::TitleTooLong {
                max: self.limits.max_title_len,
            }
            .into());
        }
        Ok(())
    }

    fn check_description(&self, description: &str) -> LedgerResult<()> {
        if description.chars().count() > self.limits.max_description_len {
            return Err(InvalidInput::DescriptionTooLong {
                max: self.limits.max_description_len,
            }
            .into());
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // projects
    // ---------------------------------------------------------------------

    pub fn create_project(
        &self,
        caller: &Identity,
        title: String,
        description: String,
    ) -> LedgerResult<ProjectId> {
        let _call = self.begin(Operation::CreateProject)?;
        self.check_title(&title)?;
        self.check_description(&description)?;

        let result = (|| -> LedgerResult<ProjectId> {
            let mut state = lock_state(&self.state);
            let id = state.ids.next_id()?;
            state
                .store
                .insert_project(Project::new(id, title, description, caller.clone()));
            Ok(id)
        })();
        let id = self.check_fatal(Operation::CreateProject, result)?;
        log::info!("{caller} created project {id}");
        Ok(id)
    }

    pub fn get_project(&self, id: ProjectId) -> Option<Project> {
        lock_state(&self.state).store.get_project(id).cloned()
    }

    pub fn list_projects(&self) -> Vec<Project> {
        lock_state(&self.state).store.list_projects()
    }

    pub fn list_user_projects(&self, owner: &Identity) -> Vec<Project> {
        lock_state(&self.state).store.projects_owned_by(owner)
    }

    pub fn update_project(
        &self,
        caller: &Identity,
        id: ProjectId,
        title: String,
        description: String,
    ) -> LedgerResult<()> {
        let _call = self.begin(Operation::UpdateProject)?;
        self.check_title(&title)?;
        self.check_description(&description)?;

        let mut state = lock_state(&self.state);
        let project = state
            .store
            .get_project_mut(id)
            .ok_or(LedgerError::NotFound(Entity::Project(id)))?;
        require_contributor(caller, project, "update project metadata")?;
        project.title = title;
        project.description = description;
        Ok(())
    }

    /// Hard removal. Nfts minted from the project keep their dangling id.
    pub fn delete_project(&self, caller: &Identity, id: ProjectId) -> LedgerResult<Project> {
        let _call = self.begin(Operation::DeleteProject)?;

        let mut state = lock_state(&self.state);
        let project = state
            .store
            .get_project(id)
            .ok_or(LedgerError::NotFound(Entity::Project(id)))?;
        require_owner(caller, project, "delete the project")?;
        let removed = state
            .store
            .remove_project(id)
            .ok_or(LedgerError::NotFound(Entity::Project(id)))?;
        log::info!("{caller} deleted project {id}");
        Ok(removed)
    }

    pub fn add_track(
        &self,
        caller: &Identity,
        project_id: ProjectId,
        name: String,
        content_hash: ContentHash,
        timestamp: u64,
    ) -> LedgerResult<TrackId> {
        let _call = self.begin(Operation::AddTrack)?;
        if name.trim().is_empty() {
            return Err(InvalidInput::EmptyName.into());
        }
        if content_hash.is_empty() {
            return Err(InvalidInput::EmptyContentHash.into());
        }

        let result = (|| -> LedgerResult<TrackId> {
            let mut state = lock_state(&self.state);
            let project = state
                .store
                .get_project_mut(project_id)
                .ok_or(LedgerError::NotFound(Entity::Project(project_id)))?;
            require_contributor(caller, project, "add a track")?;
            project
                .push_track(NewTrack {
                    name,
                    content_hash,
                    uploaded_by: caller.clone(),
                    timestamp,
                })
                .ok_or(LedgerError::AllocatorExhausted)
        })();
        self.check_fatal(Operation::AddTrack, result)
    }

    pub fn remove_track(
        &self,
        caller: &Identity,
        project_id: ProjectId,
        track_id: TrackId,
    ) -> LedgerResult<()> {
        let _call = self.begin(Operation::RemoveTrack)?;

        let mut state = lock_state(&self.state);
        let project = state
            .store
            .get_project_mut(project_id)
            .ok_or(LedgerError::NotFound(Entity::Project(project_id)))?;
        require_contributor(caller, project, "remove a track")?;
        if !project.remove_track(track_id) {
            return Err(LedgerError::NotFound(Entity::Track {
                project: project_id,
                track: track_id,
            }));
        }
        Ok(())
    }

    /// Empty when the project is unknown.
    pub fn get_project_tracks(&self, project_id: ProjectId) -> Vec<Track> {
        lock_state(&self.state)
            .store
            .get_project(project_id)
            .map(|p| p.tracks.clone())
            .unwrap_or_default()
    }

    /// Adding someone who already collaborates is accepted and changes nothing.
    pub fn add_collaborator(
        &self,
        caller: &Identity,
        project_id: ProjectId,
        collaborator: Identity,
    ) -> LedgerResult<()> {
        let _call = self.begin(Operation::AddCollaborator)?;

        let mut state = lock_state(&self.state);
        let project = state
            .store
            .get_project_mut(project_id)
            .ok_or(LedgerError::NotFound(Entity::Project(project_id)))?;
        require_owner(caller, project, "add a collaborator")?;
        if project.contributors.insert(collaborator.clone()) {
            log::info!("{collaborator} joined project {project_id}");
        }
        Ok(())
    }

    pub fn remove_collaborator(
        &self,
        caller: &Identity,
        project_id: ProjectId,
        collaborator: &Identity,
    ) -> LedgerResult<()> {
        let _call = self.begin(Operation::RemoveCollaborator)?;

        let mut state = lock_state(&self.state);
        let project = state
            .store
            .get_project_mut(project_id)
            .ok_or(LedgerError::NotFound(Entity::Project(project_id)))?;
        require_owner(caller, project, "remove a collaborator")?;
        project.contributors.remove(collaborator);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // nfts
    // ---------------------------------------------------------------------

    pub fn mint_nft(&self, caller: &Identity, request: MintRequest) -> LedgerResult<NftId> {
        let _call = self.begin(Operation::MintNft)?;
        if request.name.trim().is_empty() {
            return Err(InvalidInput::EmptyName.into());
        }
        self.check_description(&request.description)?;
        if request.price == 0 {
            return Err(InvalidInput::ZeroPrice.into());
        }
        if request.royalty_percentage > 100 {
            return Err(InvalidInput::RoyaltyOutOfRange(request.royalty_percentage).into());
        }

        let result = (|| -> LedgerResult<NftId> {
            let mut state = lock_state(&self.state);
            let project = state
                .store
                .get_project(request.project_id)
                .ok_or(LedgerError::NotFound(Entity::Project(request.project_id)))?;
            require_contributor(caller, project, "mint from this project")?;
            let id = state.ids.next_id()?;
            state
                .store
                .insert_nft(Nft::mint(id, caller.clone(), request, Self::now()));
            Ok(id)
        })();
        let id = self.check_fatal(Operation::MintNft, result)?;
        log::info!("{caller} minted nft {id}");
        Ok(id)
    }

    pub fn get_nft(&self, id: NftId) -> Option<Nft> {
        lock_state(&self.state).store.get_nft(id).cloned()
    }

    pub fn list_nfts(&self) -> Vec<Nft> {
        lock_state(&self.state).store.list_nfts()
    }

    /// Empty when the nft is unknown.
    pub fn get_nft_history(&self, id: NftId) -> Vec<SaleRecord> {
        lock_state(&self.state)
            .store
            .get_nft(id)
            .map(|n| n.sale_history.clone())
            .unwrap_or_default()
    }

    pub fn list_user_nfts(&self, owner: &Identity) -> Vec<Nft> {
        lock_state(&self.state).store.nfts_owned_by(owner)
    }

    pub fn list_created_nfts(&self, creator: &Identity) -> Vec<Nft> {
        lock_state(&self.state).store.nfts_created_by(creator)
    }

    /// Runs `f` on an nft the caller owns, holding its purchase lock.
    fn with_owned_nft<T>(
        &self,
        caller: &Identity,
        id: NftId,
        action: &'static str,
        f: impl FnOnce(&mut Nft) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let _lock = self.locks.try_lock(id)?;
        let mut state = lock_state(&self.state);
        if state.store.get_pending(id).is_some() {
            return Err(LedgerError::Locked(id));
        }
        let nft = state
            .store
            .get_nft_mut(id)
            .ok_or(LedgerError::NotFound(Entity::Nft(id)))?;
        require_nft_owner(caller, nft, action)?;
        f(nft)
    }

    pub fn update_nft_price(&self, caller: &Identity, id: NftId, new_price: Amount) -> LedgerResult<()> {
        let _call = self.begin(Operation::UpdateNftPrice)?;
        if new_price == 0 {
            return Err(InvalidInput::ZeroPrice.into());
        }

        self.with_owned_nft(caller, id, "update the price", |nft| {
            if !nft.for_sale {
                return Err(InvalidInput::NotForSale.into());
            }
            log::info!("nft {id} price {} -> {new_price}", nft.price);
            nft.price = new_price;
            Ok(())
        })
    }

    pub fn set_nft_for_sale(&self, caller: &Identity, id: NftId, for_sale: bool) -> LedgerResult<()> {
        let _call = self.begin(Operation::SetNftForSale)?;
        self.with_owned_nft(caller, id, "change the sale status", |nft| {
            nft.for_sale = for_sale;
            Ok(())
        })
    }

    /// Gives the nft away. No value moves and no royalty is due.
    pub fn transfer_nft(&self, caller: &Identity, id: NftId, to: Identity) -> LedgerResult<()> {
        let _call = self.begin(Operation::TransferNft)?;
        self.with_owned_nft(caller, id, "transfer the nft", |nft| {
            if nft.owner == to {
                return Err(InvalidInput::TransferToSelf.into());
            }
            nft.change_owner(to, 0, SaleKind::Transfer, Self::now());
            Ok(())
        })
    }

    pub fn buy_nft(&self, buyer: &Identity, id: NftId) -> LedgerResult<Settlement> {
        let _call = self.begin(Operation::BuyNft)?;
        self.engine().buy(id, buyer, Self::now())
    }

    pub fn retry_royalty(&self, caller: &Identity, id: NftId) -> LedgerResult<Settlement> {
        let _call = self.begin(Operation::RetryRoyalty)?;
        self.engine().retry_royalty(id, caller, Self::now())
    }

    fn engine(&self) -> PurchaseEngine<'_> {
        PurchaseEngine {
            state: &self.state,
            locks: &self.locks,
            transfers: self.transfers.as_ref(),
        }
    }

    pub fn list_royalty_earnings(&self, recipient: &Identity) -> Vec<RoyaltyPayment> {
        lock_state(&self.state).store.royalties_paid_to(recipient)
    }

    pub fn list_pending_settlements(&self) -> Vec<PendingSettlement> {
        lock_state(&self.state).store.list_pending()
    }

    pub fn marketplace_stats(&self) -> MarketplaceStats {
        let state = lock_state(&self.state);
        let nfts = state.store.list_nfts();
        let mut stats = MarketplaceStats {
            total_nfts: nfts.len() as u64,
            ..Default::default()
        };
        for nft in &nfts {
            if nft.for_sale {
                stats.nfts_for_sale += 1;
            }
            for record in nft.sale_history.iter().filter(|r| r.kind == SaleKind::Sale) {
                stats.total_sales += 1;
                stats.total_volume = stats.total_volume.saturating_add(record.price);
            }
        }
        stats
    }
}
