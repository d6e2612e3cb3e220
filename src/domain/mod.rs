pub mod hash;
pub mod identity;
pub mod nft;
pub mod project;
