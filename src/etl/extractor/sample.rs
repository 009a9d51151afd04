//! Extractor that cycles through predefined sample logs.
//!
//! Meant for demos and smoke tests: every emitted log gets a fresh
//! transaction hash and a block number that advances every three logs.

use anyhow::Result;
use async_trait::async_trait;
use primitive_types::{H160, H256, U256};
use std::collections::HashMap;

use crate::etl::engine_db::EngineDb;
use crate::etl::event::EvmLog;

use super::{BlockContext, ExtractionBatch, Extractor, TransactionContext};

/// Originator used for every generated transaction
const SAMPLE_SENDER: u64 = 0x5a5a;

pub struct SampleExtractor {
    events: Vec<EvmLog>,
    current_index: usize,
    batch_size: usize,
    current_block: u64,
    /// Monotonic counter used to derive unique transaction hashes
    sequence: u64,
}

impl SampleExtractor {
    pub fn new(events: Vec<EvmLog>, batch_size: usize) -> Self {
        Self {
            events,
            current_index: 0,
            batch_size,
            current_block: 1000,
            sequence: 0,
        }
    }

    fn next_batch(&mut self) -> Vec<EvmLog> {
        if self.events.is_empty() {
            return Vec::new();
        }

        let mut batch = Vec::with_capacity(self.batch_size);

        for _ in 0..self.batch_size {
            let mut event = self.events[self.current_index].clone();

            self.sequence += 1;
            event.block_number = Some(self.current_block);
            event.transaction_hash = Some(H256::from_low_u64_be(self.sequence));
            event.log_index = Some(0);

            batch.push(event);

            self.current_index = (self.current_index + 1) % self.events.len();
            if self.sequence % 3 == 0 {
                self.current_block += 1;
            }
        }

        batch
    }
}

#[async_trait]
impl Extractor for SampleExtractor {
    fn is_finished(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn extract(&mut self, _cursor: Option<String>, _engine_db: &EngineDb) -> Result<ExtractionBatch> {
        let events = self.next_batch();

        if events.is_empty() {
            return Ok(ExtractionBatch::empty());
        }

        let mut blocks = HashMap::new();
        let mut transactions = HashMap::new();

        for event in &events {
            let block_number = event.block_number.unwrap_or_default();
            blocks.entry(block_number).or_insert_with(|| BlockContext {
                number: block_number,
                hash: Some(H256::from_low_u64_be(block_number)),
                timestamp: 1_700_000_000 + block_number,
            });

            if let Some(hash) = event.transaction_hash {
                transactions.entry(hash).or_insert_with(|| TransactionContext {
                    hash,
                    block_number,
                    from: Some(H160::from_low_u64_be(SAMPLE_SENDER)),
                    to: Some(event.address),
                    value: U256::zero(),
                });
            }
        }

        tracing::debug!(
            target: "coven::etl::sample_extractor",
            "Generated {} sample logs across {} blocks ({} transactions)",
            events.len(),
            blocks.len(),
            transactions.len()
        );

        Ok(ExtractionBatch {
            events,
            blocks,
            transactions,
            cursor: None,
        })
    }
}
