//! Distinct (account, marketplace) pairs.

use crate::error::StoreResult;
use crate::model::{Account, MarketplaceInteraction};
use crate::registry::Marketplace;
use crate::storage::EntityStore;

/// Per-event interaction staging, read-before-write against the entity store.
pub struct InteractionIndex<'a> {
    store: &'a dyn EntityStore,
    staged: Vec<MarketplaceInteraction>,
}

impl<'a> InteractionIndex<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            staged: Vec::new(),
        }
    }

    /// Stage the pair if it was never seen and bump the account's
    /// `unique_marketplace_count`. Returns whether the pair is new.
    pub fn record_if_new(&mut self, account: &mut Account, marketplace: Marketplace) -> StoreResult<bool> {
        let id = MarketplaceInteraction::id_for(account.id, marketplace);

        if self.staged.iter().any(|i| i.id == id) || self.store.load_interaction(&id)?.is_some() {
            return Ok(false);
        }

        account.unique_marketplace_count += 1;
        self.staged.push(MarketplaceInteraction {
            id,
            account: account.id,
            marketplace,
        });
        Ok(true)
    }

    pub fn into_staged(self) -> Vec<MarketplaceInteraction> {
        self.staged
    }
}
