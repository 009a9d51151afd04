//! Transfer event -> entity state projection.
//!
//! Events must arrive in chain order (block number, then log index). Each
//! event is staged in full and written with one [`EntityStore::commit`], so a
//! rejected or failed event leaves no partial state and re-delivering an
//! applied event is a no-op.

use std::sync::Arc;

use primitive_types::H160;

use crate::accounts::AccountStore;
use crate::classifier::MarketplaceClassifier;
use crate::error::ProjectionError;
use crate::interactions::InteractionIndex;
use crate::model::{transfer_id, Transfer, TransferEvent};
use crate::registry::{AddressRegistry, Marketplace};
use crate::storage::{Changeset, EntityStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOutcome {
    Applied(Transfer),
    /// A transfer with the same id was already applied
    Duplicate(String),
}

pub struct TransferProjector {
    store: Arc<dyn EntityStore>,
    classifier: MarketplaceClassifier,
    zero_address: H160,
}

impl TransferProjector {
    pub fn new(store: Arc<dyn EntityStore>, registry: &AddressRegistry) -> Self {
        Self {
            store,
            classifier: MarketplaceClassifier::new(registry),
            zero_address: registry.zero_address(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn process(&self, event: &TransferEvent) -> Result<ProjectionOutcome, ProjectionError> {
        let fields = event.required()?;
        let id = transfer_id(fields.transaction_hash, fields.log_index);

        if self.store.load_transfer(&id)?.is_some() {
            tracing::debug!(
                target: "coven_marketplace::projector",
                transfer_id = %id,
                "Transfer already applied, skipping"
            );
            return Ok(ProjectionOutcome::Duplicate(id));
        }

        let store = self.store.as_ref();
        let mut accounts = AccountStore::new(store);
        let (from, to) = (fields.from, fields.to);
        let tx_hash = fields.transaction_hash;

        let sender = accounts.get_or_create(from)?;
        sender.send_count += 1;
        sender.last_tx_hash = Some(tx_hash);

        let receiver = accounts.get_or_create(to)?;
        receiver.receive_count += 1;
        receiver.total_spent = receiver.total_spent.saturating_add(event.value);
        receiver.last_tx_hash = Some(tx_hash);

        if from == self.zero_address {
            accounts.get_or_create(to)?.mint_count += 1;
            tracing::debug!(
                target: "coven_marketplace::projector",
                tx_hash = %format!("{tx_hash:#x}"),
                token_id = %fields.token_id,
                "NFT mint detected"
            );
        }
        if to == self.zero_address {
            accounts.get_or_create(from)?.burn_count += 1;
            tracing::debug!(
                target: "coven_marketplace::projector",
                tx_hash = %format!("{tx_hash:#x}"),
                token_id = %fields.token_id,
                "NFT burn detected"
            );
        }

        if event.transaction_sender.is_none() || event.transaction_recipient.is_none() {
            tracing::info!(
                target: "coven_marketplace::projector",
                tx_hash = %format!("{tx_hash:#x}"),
                sender = ?event.transaction_sender,
                recipient = ?event.transaction_recipient,
                "Unusual activity"
            );
        }

        let marketplace = self
            .classifier
            .classify(event.transaction_sender, event.transaction_recipient);
        if marketplace == Marketplace::Unknown {
            tracing::info!(
                target: "coven_marketplace::projector",
                tx_hash = %format!("{tx_hash:#x}"),
                "Unknown marketplace"
            );
        }

        let transfer = Transfer {
            id,
            collection: event.collection,
            from,
            to,
            token_id: fields.token_id,
            value: event.value,
            marketplace,
            transaction_hash: tx_hash,
            log_index: fields.log_index,
            block_number: event.block_number,
            timestamp: event.timestamp,
        };

        let mut interactions = InteractionIndex::new(store);
        for address in [from, to] {
            let account = accounts.get_or_create(address)?;
            interactions.record_if_new(account, marketplace)?;
        }

        accounts.save(from);
        accounts.save(to);

        self.store.commit(&Changeset {
            accounts: accounts.into_dirty(),
            transfer: Some(transfer.clone()),
            interactions: interactions.into_staged(),
        })?;

        Ok(ProjectionOutcome::Applied(transfer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MalformedEvent, StoreError, StoreResult};
    use crate::model::{Account, MarketplaceInteraction};
    use crate::registry::Role;
    use crate::storage::MemoryStore;
    use primitive_types::{H256, U256};

    const A: u64 = 0xaaa;
    const B: u64 = 0xbbb;
    const C: u64 = 0xccc;

    fn addr(n: u64) -> H160 {
        H160::from_low_u64_be(n)
    }

    fn setup() -> (TransferProjector, Arc<MemoryStore>, AddressRegistry) {
        let registry = AddressRegistry::mainnet().unwrap();
        let store = Arc::new(MemoryStore::new());
        (TransferProjector::new(store.clone(), &registry), store, registry)
    }

    fn event(from: H160, to: H160, tx: u64, log_index: u64) -> TransferEvent {
        TransferEvent {
            collection: addr(0xc0),
            from: Some(from),
            to: Some(to),
            token_id: Some(U256::from(tx)),
            transaction_hash: Some(H256::from_low_u64_be(tx)),
            log_index: Some(log_index),
            ..Default::default()
        }
    }

    fn account(store: &MemoryStore, n: u64) -> Account {
        store.load_account(addr(n)).unwrap().unwrap()
    }

    #[test]
    fn test_mint_scenario() {
        let (projector, store, _) = setup();

        let outcome = projector.process(&event(H160::zero(), addr(A), 1, 0)).unwrap();

        let ProjectionOutcome::Applied(transfer) = outcome else {
            panic!("expected applied transfer");
        };
        assert_eq!(transfer.id, format!("{:#x}-0x0", H256::from_low_u64_be(1)));
        assert_eq!(transfer.marketplace, Marketplace::Unknown);

        let minter = account(&store, A);
        assert_eq!(minter.mint_count, 1);
        assert_eq!(minter.receive_count, 1);
        assert_eq!(minter.send_count, 0);

        let zero = store.load_account(H160::zero()).unwrap().unwrap();
        assert_eq!(zero.send_count, 1);
        assert_eq!(zero.mint_count, 0);
        assert_eq!(zero.burn_count, 0);
    }

    #[test]
    fn test_burn_increments_sender_burn_count() {
        let (projector, store, _) = setup();
        projector.process(&event(addr(A), H160::zero(), 1, 0)).unwrap();

        let burner = account(&store, A);
        assert_eq!(burner.burn_count, 1);
        assert_eq!(burner.mint_count, 0);
        assert_eq!(burner.send_count, 1);
    }

    #[test]
    fn test_seaport_recipient_scenario() {
        let (projector, store, registry) = setup();
        let seaport = registry.resolve(Role::Marketplace(Marketplace::Seaport)).unwrap();

        let mut e = event(addr(A), addr(B), 2, 0);
        e.transaction_sender = Some(addr(B));
        e.transaction_recipient = Some(seaport);
        projector.process(&e).unwrap();

        let id = transfer_id(H256::from_low_u64_be(2), 0);
        let transfer = store.load_transfer(&id).unwrap().unwrap();
        assert_eq!(transfer.marketplace.as_str(), "SeaPort");
    }

    #[test]
    fn test_value_is_credited_to_each_receiver_of_a_transaction() {
        let (projector, store, _) = setup();

        let mut first = event(addr(A), addr(B), 3, 0);
        first.value = U256::from(100u64);
        let mut second = event(addr(A), addr(C), 3, 1);
        second.value = U256::from(100u64);

        projector.process(&first).unwrap();
        projector.process(&second).unwrap();

        assert_eq!(account(&store, B).total_spent, U256::from(100u64));
        assert_eq!(account(&store, C).total_spent, U256::from(100u64));
        assert_eq!(account(&store, A).total_spent, U256::zero());
    }

    #[test]
    fn test_repeated_marketplace_counts_once() {
        let (projector, store, registry) = setup();
        let blur = registry.resolve(Role::Marketplace(Marketplace::Blur)).unwrap();

        for (tx, to) in [(10, B), (11, C)] {
            let mut e = event(addr(A), addr(to), tx, 0);
            e.transaction_sender = Some(addr(to));
            e.transaction_recipient = Some(blur);
            projector.process(&e).unwrap();
        }

        assert_eq!(account(&store, A).unique_marketplace_count, 1);
        assert_eq!(store.interactions_for(addr(A)).unwrap().len(), 1);
        assert_eq!(account(&store, B).unique_marketplace_count, 1);
    }

    #[test]
    fn test_unknown_counts_as_a_marketplace() {
        let (projector, store, registry) = setup();
        projector.process(&event(addr(A), addr(B), 1, 0)).unwrap();

        let mut e = event(addr(B), addr(A), 2, 0);
        e.transaction_recipient = Some(registry.resolve(Role::Marketplace(Marketplace::Rarible)).unwrap());
        projector.process(&e).unwrap();

        let interactions = store.interactions_for(addr(A)).unwrap();
        let marketplaces: Vec<Marketplace> = interactions.iter().map(|i| i.marketplace).collect();
        assert_eq!(marketplaces, vec![Marketplace::Rarible, Marketplace::Unknown]);
        assert_eq!(account(&store, A).unique_marketplace_count, 2);
    }

    #[test]
    fn test_duplicate_delivery_is_a_no_op() {
        let (projector, store, _) = setup();
        let mut e = event(addr(A), addr(B), 5, 2);
        e.value = U256::from(7u64);

        projector.process(&e).unwrap();
        let before = (account(&store, A), account(&store, B));

        let outcome = projector.process(&e).unwrap();
        assert_eq!(
            outcome,
            ProjectionOutcome::Duplicate(transfer_id(H256::from_low_u64_be(5), 2))
        );
        assert_eq!((account(&store, A), account(&store, B)), before);
        assert_eq!(store.transfer_count().unwrap(), 1);
    }

    #[test]
    fn test_self_transfer_updates_one_account() {
        let (projector, store, _) = setup();
        let mut e = event(addr(A), addr(A), 1, 0);
        e.value = U256::from(3u64);
        projector.process(&e).unwrap();

        let same = account(&store, A);
        assert_eq!(same.send_count, 1);
        assert_eq!(same.receive_count, 1);
        assert_eq!(same.total_spent, U256::from(3u64));
        assert_eq!(same.unique_marketplace_count, 1);
        assert_eq!(store.account_count().unwrap(), 1);
    }

    #[test]
    fn test_send_and_receive_counts_are_conserved() {
        let (projector, store, _) = setup();
        let parties = [A, B, C, 0xddd];
        let mut n = 0u64;
        for (i, from) in parties.iter().enumerate() {
            for to in parties.iter().skip(i + 1) {
                n += 1;
                projector.process(&event(addr(*from), addr(*to), n, 0)).unwrap();
            }
        }

        let accounts: Vec<Account> = parties.iter().map(|p| account(&store, *p)).collect();
        let sent: u64 = accounts.iter().map(|a| a.send_count).sum();
        let received: u64 = accounts.iter().map(|a| a.receive_count).sum();
        assert_eq!(sent, n);
        assert_eq!(received, n);
    }

    #[test]
    fn test_malformed_event_commits_nothing() {
        let (projector, store, _) = setup();
        let mut e = event(addr(A), addr(B), 1, 0);
        e.transaction_hash = None;

        let result = projector.process(&e);
        assert!(matches!(
            result,
            Err(ProjectionError::Malformed(MalformedEvent { field: "transaction hash" }))
        ));
        assert_eq!(store.account_count().unwrap(), 0);
        assert_eq!(store.transfer_count().unwrap(), 0);

        let mut e = event(addr(A), addr(B), 2, 0);
        e.token_id = None;
        assert!(matches!(projector.process(&e), Err(ProjectionError::Malformed(_))));
        assert_eq!(store.account_count().unwrap(), 0);
    }

    struct FailingCommitStore(MemoryStore);

    impl EntityStore for FailingCommitStore {
        fn load_account(&self, id: H160) -> StoreResult<Option<Account>> {
            self.0.load_account(id)
        }
        fn load_transfer(&self, id: &str) -> StoreResult<Option<Transfer>> {
            self.0.load_transfer(id)
        }
        fn load_interaction(&self, id: &str) -> StoreResult<Option<MarketplaceInteraction>> {
            self.0.load_interaction(id)
        }
        fn commit(&self, _changes: &Changeset) -> StoreResult<()> {
            Err(StoreError::Poisoned)
        }
        fn account_count(&self) -> StoreResult<u64> {
            self.0.account_count()
        }
        fn transfer_count(&self) -> StoreResult<u64> {
            self.0.transfer_count()
        }
        fn interactions_for(&self, account: H160) -> StoreResult<Vec<MarketplaceInteraction>> {
            self.0.interactions_for(account)
        }
    }

    #[test]
    fn test_store_failure_is_propagated() {
        let registry = AddressRegistry::mainnet().unwrap();
        let store = Arc::new(FailingCommitStore(MemoryStore::new()));
        let projector = TransferProjector::new(store.clone(), &registry);

        let result = projector.process(&event(addr(A), addr(B), 1, 0));
        assert!(matches!(result, Err(ProjectionError::Store(StoreError::Poisoned))));
        assert_eq!(store.transfer_count().unwrap(), 0);
    }
}
