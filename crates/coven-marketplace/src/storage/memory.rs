use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use primitive_types::H160;

use super::{Changeset, EntityStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{Account, MarketplaceInteraction, Transfer};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<H160, Account>,
    transfers: HashMap<String, Transfer>,
    interactions: BTreeMap<String, MarketplaceInteraction>,
}

/// In-process store behind a single mutex. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl EntityStore for MemoryStore {
    fn load_account(&self, id: H160) -> StoreResult<Option<Account>> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    fn load_transfer(&self, id: &str) -> StoreResult<Option<Transfer>> {
        Ok(self.lock()?.transfers.get(id).cloned())
    }

    fn load_interaction(&self, id: &str) -> StoreResult<Option<MarketplaceInteraction>> {
        Ok(self.lock()?.interactions.get(id).cloned())
    }

    fn commit(&self, changes: &Changeset) -> StoreResult<()> {
        let mut state = self.lock()?;

        // Checked before touching anything so a rejected commit leaves no trace.
        if let Some(transfer) = &changes.transfer {
            if state.transfers.contains_key(&transfer.id) {
                return Err(StoreError::DuplicateTransfer(transfer.id.clone()));
            }
        }

        for account in &changes.accounts {
            state.accounts.insert(account.id, account.clone());
        }
        if let Some(transfer) = &changes.transfer {
            state.transfers.insert(transfer.id.clone(), transfer.clone());
        }
        for interaction in &changes.interactions {
            state
                .interactions
                .entry(interaction.id.clone())
                .or_insert_with(|| interaction.clone());
        }
        Ok(())
    }

    fn account_count(&self) -> StoreResult<u64> {
        Ok(self.lock()?.accounts.len() as u64)
    }

    fn transfer_count(&self) -> StoreResult<u64> {
        Ok(self.lock()?.transfers.len() as u64)
    }

    fn interactions_for(&self, account: H160) -> StoreResult<Vec<MarketplaceInteraction>> {
        Ok(self
            .lock()?
            .interactions
            .values()
            .filter(|i| i.account == account)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::transfer_id;
    use crate::registry::Marketplace;
    use primitive_types::{H256, U256};

    fn transfer(hash: u64) -> Transfer {
        Transfer {
            id: transfer_id(H256::from_low_u64_be(hash), 0),
            collection: H160::from_low_u64_be(0xc0),
            from: H160::zero(),
            to: H160::from_low_u64_be(1),
            token_id: U256::one(),
            value: U256::zero(),
            marketplace: Marketplace::Unknown,
            transaction_hash: H256::from_low_u64_be(hash),
            log_index: 0,
            block_number: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_duplicate_transfer_commit_leaves_state_untouched() {
        let store = MemoryStore::new();
        store
            .commit(&Changeset {
                transfer: Some(transfer(1)),
                ..Default::default()
            })
            .unwrap();

        let mut account = Account::new(H160::from_low_u64_be(1));
        account.receive_count = 5;
        let result = store.commit(&Changeset {
            accounts: vec![account],
            transfer: Some(transfer(1)),
            interactions: vec![],
        });

        assert!(matches!(result, Err(StoreError::DuplicateTransfer(_))));
        assert_eq!(store.account_count().unwrap(), 0);
        assert_eq!(store.transfer_count().unwrap(), 1);
    }

    #[test]
    fn test_interactions_for_filters_by_account() {
        let store = MemoryStore::new();
        let a = H160::from_low_u64_be(0xa);
        let b = H160::from_low_u64_be(0xb);
        store
            .commit(&Changeset {
                interactions: vec![
                    MarketplaceInteraction::new(a, Marketplace::Blur),
                    MarketplaceInteraction::new(b, Marketplace::Blur),
                    MarketplaceInteraction::new(a, Marketplace::Seaport),
                ],
                ..Default::default()
            })
            .unwrap();

        let found = store.interactions_for(a).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|i| i.account == a));
    }
}
