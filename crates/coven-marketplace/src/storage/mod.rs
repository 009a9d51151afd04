//! Keyed entity store consumed by the projector.
//!
//! The projector only needs get-by-id and an atomic write of everything one
//! event produced. Backends must apply a [`Changeset`] entirely or not at all.

mod memory;
mod sqlite;

use primitive_types::H160;

use crate::error::StoreResult;
use crate::model::{Account, MarketplaceInteraction, Transfer};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// All writes produced by one transfer event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    /// Accounts to upsert
    pub accounts: Vec<Account>,
    /// Transfer to insert; committing an id that already exists fails
    pub transfer: Option<Transfer>,
    /// Interactions to insert
    pub interactions: Vec<MarketplaceInteraction>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.transfer.is_none() && self.interactions.is_empty()
    }
}

pub trait EntityStore: Send + Sync {
    fn load_account(&self, id: H160) -> StoreResult<Option<Account>>;

    fn load_transfer(&self, id: &str) -> StoreResult<Option<Transfer>>;

    fn load_interaction(&self, id: &str) -> StoreResult<Option<MarketplaceInteraction>>;

    /// Apply the changeset atomically.
    fn commit(&self, changes: &Changeset) -> StoreResult<()>;

    fn account_count(&self) -> StoreResult<u64>;

    fn transfer_count(&self) -> StoreResult<u64>;

    /// Interactions of one account, ordered by id
    fn interactions_for(&self, account: H160) -> StoreResult<Vec<MarketplaceInteraction>>;
}
