use serde::{Deserialize, Serialize};

use crate::domain::{identity::Identity, project::ProjectId};

pub type NftId = u64;

/// Price in the smallest currency denomination.
pub type Amount = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nft {
    pub id: NftId,
    pub name: String,
    pub description: String,
    pub image_ref: String,
    pub creator: Identity,
    pub owner: Identity,
    /// weak reference, the project may be deleted later
    pub project_id: ProjectId,
    pub price: Amount,
    pub royalty_percentage: u8,
    pub for_sale: bool,
    #[serde(default)]
    pub category: String,
    pub created_at: i64,
    pub sale_history: Vec<SaleRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleKind {
    Mint,
    Sale,
    Transfer,
}

/// One entry in an NFT's ownership history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub from: Option<Identity>,
    pub to: Identity,
    pub price: Amount,
    pub timestamp: i64,
    pub kind: SaleKind,
}

/// A royalty that actually reached the creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoyaltyPayment {
    pub recipient: Identity,
    pub amount: Amount,
    pub nft_id: NftId,
    pub settlement_id: String,
}

/// Everything the creator supplies at mint time.
#[derive(Debug, Clone, Deserialize)]
pub struct MintRequest {
    pub name: String,
    pub description: String,
    pub image_ref: String,
    pub project_id: ProjectId,
    pub price: Amount,
    pub royalty_percentage: u8,
    #[serde(default = "default_for_sale")]
    pub for_sale: bool,
    #[serde(default)]
    pub category: String,
}

fn default_for_sale() -> bool {
    true
}

impl Nft {
    pub fn mint(id: NftId, creator: Identity, request: MintRequest, now: i64) -> Self {
        Self {
            id,
            name: request.name,
            description: request.description,
            image_ref: request.image_ref,
            owner: creator.clone(),
            sale_history: vec![SaleRecord {
                from: None,
                to: creator.clone(),
                price: 0,
                timestamp: now,
                kind: SaleKind::Mint,
            }],
            creator,
            project_id: request.project_id,
            price: request.price,
            royalty_percentage: request.royalty_percentage,
            for_sale: request.for_sale,
            category: request.category,
            created_at: now,
        }
    }

    /// Hands the NFT to a new owner and takes it off the market.
    pub fn change_owner(&mut self, to: Identity, price: Amount, kind: SaleKind, now: i64) {
        let from = std::mem::replace(&mut self.owner, to.clone());
        self.for_sale = false;
        self.sale_history.push(SaleRecord {
            from: Some(from),
            to,
            price,
            timestamp: now,
            kind,
        });
    }
}
