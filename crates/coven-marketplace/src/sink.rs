//! Marketplace sink: feeds decoded transfers to the projector.
//!
//! Each `NftTransfer` envelope is joined with its enclosing transaction
//! (sender, recipient, value) and block (timestamp) from the batch, then
//! projected in envelope order. Malformed events are counted and skipped; a
//! store failure fails the batch so it is delivered again, which is safe
//! because the projector skips transfers it already applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use coven::etl::envelope::TypeId;
use coven::etl::sink::SinkContext;
use coven::etl::{Envelope, ExtractionBatch, Sink};
use primitive_types::U256;

use crate::decoder::{NftTransfer, TRANSFER_TYPE};
use crate::error::ProjectionError;
use crate::model::TransferEvent;
use crate::projector::{ProjectionOutcome, TransferProjector};

/// Per-batch projection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub applied: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

pub struct MarketplaceSink {
    projector: Arc<TransferProjector>,
    total_applied: AtomicU64,
    total_duplicates: AtomicU64,
    total_rejected: AtomicU64,
}

impl MarketplaceSink {
    pub fn new(projector: Arc<TransferProjector>) -> Self {
        Self {
            projector,
            total_applied: AtomicU64::new(0),
            total_duplicates: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    pub fn projector(&self) -> &Arc<TransferProjector> {
        &self.projector
    }

    /// Totals since startup
    pub fn totals(&self) -> BatchStats {
        BatchStats {
            applied: self.total_applied.load(Ordering::Relaxed),
            duplicates: self.total_duplicates.load(Ordering::Relaxed),
            rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }

    /// Join a decoded transfer with its transaction and block context.
    pub fn build_event(transfer: &NftTransfer, batch: &ExtractionBatch) -> TransferEvent {
        let tx = transfer
            .transaction_hash
            .and_then(|hash| batch.transactions.get(&hash));
        let timestamp = transfer
            .block_number
            .and_then(|number| batch.blocks.get(&number))
            .map(|block| block.timestamp);

        TransferEvent {
            collection: transfer.collection,
            from: Some(transfer.from),
            to: Some(transfer.to),
            token_id: Some(transfer.token_id),
            transaction_hash: transfer.transaction_hash,
            log_index: transfer.log_index,
            value: tx.map_or_else(U256::zero, |tx| tx.value),
            transaction_sender: tx.and_then(|tx| tx.from),
            transaction_recipient: tx.and_then(|tx| tx.to),
            block_number: transfer.block_number,
            timestamp,
        }
    }

    fn project(&self, envelopes: &[Envelope], batch: &ExtractionBatch) -> Result<BatchStats> {
        let transfer_type = TypeId::new(TRANSFER_TYPE);
        let mut stats = BatchStats::default();

        for envelope in envelopes {
            if envelope.type_id != transfer_type {
                continue;
            }
            let Some(transfer) = envelope.downcast_ref::<NftTransfer>() else {
                continue;
            };

            let event = Self::build_event(transfer, batch);
            match self.projector.process(&event) {
                Ok(ProjectionOutcome::Applied(_)) => stats.applied += 1,
                Ok(ProjectionOutcome::Duplicate(_)) => stats.duplicates += 1,
                Err(ProjectionError::Malformed(e)) => {
                    stats.rejected += 1;
                    tracing::warn!(
                        target: "coven_marketplace::sink",
                        envelope_id = %envelope.id,
                        error = %e,
                        "Rejected transfer event"
                    );
                }
                Err(ProjectionError::Store(e)) => {
                    tracing::error!(
                        target: "coven_marketplace::sink",
                        envelope_id = %envelope.id,
                        applied = stats.applied,
                        error = %e,
                        "Failed to project transfer"
                    );
                    return Err(anyhow::Error::new(e).context(format!(
                        "projecting transfer {}",
                        envelope.id
                    )));
                }
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl Sink for MarketplaceSink {
    fn name(&self) -> &'static str {
        "marketplace"
    }

    fn interested_types(&self) -> Vec<TypeId> {
        vec![TypeId::new(TRANSFER_TYPE)]
    }

    async fn initialize(&mut self, context: &SinkContext) -> Result<()> {
        let store = self.projector.store();
        tracing::info!(
            target: "coven_marketplace::sink",
            database_root = %context.database_root.display(),
            accounts = store.account_count()?,
            transfers = store.transfer_count()?,
            "Marketplace sink initialized"
        );
        Ok(())
    }

    async fn process(&self, envelopes: &[Envelope], batch: &ExtractionBatch) -> Result<()> {
        let stats = self.project(envelopes, batch)?;

        self.total_applied.fetch_add(stats.applied, Ordering::Relaxed);
        self.total_duplicates.fetch_add(stats.duplicates, Ordering::Relaxed);
        self.total_rejected.fetch_add(stats.rejected, Ordering::Relaxed);

        if stats != BatchStats::default() {
            let totals = self.totals();
            tracing::info!(
                target: "coven_marketplace::sink",
                applied = stats.applied,
                duplicates = stats.duplicates,
                rejected = stats.rejected,
                total_applied = totals.applied,
                total_rejected = totals.rejected,
                "Projected transfer batch"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AddressRegistry, Marketplace, Role};
    use crate::storage::{EntityStore, MemoryStore};
    use coven::etl::{BlockContext, TransactionContext};
    use primitive_types::{H160, H256};
    use std::collections::HashMap;

    fn transfer(tx: u64, log_index: u64) -> NftTransfer {
        NftTransfer {
            from: H160::from_low_u64_be(0xa),
            to: H160::from_low_u64_be(0xb),
            token_id: U256::from(tx),
            collection: H160::from_low_u64_be(0xc0),
            block_number: Some(100),
            transaction_hash: Some(H256::from_low_u64_be(tx)),
            log_index: Some(log_index),
        }
    }

    fn envelope(transfer: NftTransfer) -> Envelope {
        Envelope::new("test".to_string(), Box::new(transfer), HashMap::new())
    }

    fn sink() -> (MarketplaceSink, Arc<MemoryStore>, AddressRegistry) {
        let registry = AddressRegistry::mainnet().unwrap();
        let store = Arc::new(MemoryStore::new());
        let projector = Arc::new(TransferProjector::new(store.clone(), &registry));
        (MarketplaceSink::new(projector), store, registry)
    }

    #[test]
    fn test_build_event_joins_transaction_and_block() {
        let registry = AddressRegistry::mainnet().unwrap();
        let looksrare = registry.resolve(Role::Marketplace(Marketplace::LooksRare)).unwrap();
        let hash = H256::from_low_u64_be(1);

        let mut batch = ExtractionBatch::empty();
        batch.transactions.insert(
            hash,
            TransactionContext {
                hash,
                block_number: 100,
                from: Some(H160::from_low_u64_be(0xb)),
                to: Some(looksrare),
                value: U256::from(5u64),
            },
        );
        batch.blocks.insert(
            100,
            BlockContext {
                number: 100,
                hash: None,
                timestamp: 1_700_000_000,
            },
        );

        let event = MarketplaceSink::build_event(&transfer(1, 0), &batch);
        assert_eq!(event.value, U256::from(5u64));
        assert_eq!(event.transaction_recipient, Some(looksrare));
        assert_eq!(event.timestamp, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn test_process_counts_applied_duplicate_and_rejected() {
        let (sink, store, _) = sink();
        let mut malformed = transfer(3, 0);
        malformed.transaction_hash = None;

        let envelopes = vec![
            envelope(transfer(1, 0)),
            envelope(transfer(1, 0)),
            envelope(malformed),
            envelope(transfer(2, 0)),
        ];
        sink.process(&envelopes, &ExtractionBatch::empty()).await.unwrap();

        assert_eq!(
            sink.totals(),
            BatchStats {
                applied: 2,
                duplicates: 1,
                rejected: 1,
            }
        );
        assert_eq!(store.transfer_count().unwrap(), 2);
        let sender = store.load_account(H160::from_low_u64_be(0xa)).unwrap().unwrap();
        assert_eq!(sender.send_count, 2);
    }

    #[tokio::test]
    async fn test_redelivered_batch_changes_nothing() {
        let (sink, store, _) = sink();
        let envelopes = vec![envelope(transfer(1, 0)), envelope(transfer(1, 1))];

        sink.process(&envelopes, &ExtractionBatch::empty()).await.unwrap();
        let receiver = store.load_account(H160::from_low_u64_be(0xb)).unwrap();
        sink.process(&envelopes, &ExtractionBatch::empty()).await.unwrap();

        assert_eq!(store.load_account(H160::from_low_u64_be(0xb)).unwrap(), receiver);
        assert_eq!(sink.totals().duplicates, 2);
    }
}
