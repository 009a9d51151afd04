//! Per-event account staging.
//!
//! An `AccountStore` lives for one transfer event. Accounts are read through
//! from the entity store on first reference and every later read in the same
//! event sees the staged copy, so a self-transfer mutates a single record.
//! Nothing reaches the entity store until the projector commits the event.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use primitive_types::H160;

use crate::error::StoreResult;
use crate::model::Account;
use crate::storage::EntityStore;

pub struct AccountStore<'a> {
    store: &'a dyn EntityStore,
    staged: BTreeMap<H160, Account>,
    dirty: BTreeSet<H160>,
}

impl<'a> AccountStore<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Existing account for `address`, or a zeroed one staged for creation.
    pub fn get_or_create(&mut self, address: H160) -> StoreResult<&mut Account> {
        match self.staged.entry(address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let account = match self.store.load_account(address)? {
                    Some(account) => account,
                    None => {
                        self.dirty.insert(address);
                        Account::new(address)
                    }
                };
                Ok(entry.insert(account))
            }
        }
    }

    /// Mark a staged account as mutated. Unknown addresses are ignored.
    pub fn save(&mut self, address: H160) {
        if self.staged.contains_key(&address) {
            self.dirty.insert(address);
        }
    }

    pub fn get(&self, address: H160) -> Option<&Account> {
        self.staged.get(&address)
    }

    /// Created or saved accounts, to be written with the event.
    pub fn into_dirty(mut self) -> Vec<Account> {
        self.dirty
            .iter()
            .filter_map(|address| self.staged.remove(address))
            .collect()
    }
}
