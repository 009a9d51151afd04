//! Extractor trait for fetching logs from an event source

pub mod log_file;
pub mod sample;

use crate::etl::engine_db::EngineDb;
use crate::etl::event::EvmLog;
use anyhow::Result;
use async_trait::async_trait;
use primitive_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use log_file::LogFileExtractor;
pub use sample::SampleExtractor;

/// Block context information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockContext {
    pub number: u64,
    #[serde(default)]
    pub hash: Option<H256>,
    pub timestamp: u64,
}

/// Enclosing transaction of a log.
///
/// `from` is the originator, `to` the contract the transaction invoked (absent
/// for contract creations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub hash: H256,
    #[serde(default)]
    pub block_number: u64,
    #[serde(default)]
    pub from: Option<H160>,
    #[serde(default)]
    pub to: Option<H160>,
    #[serde(default)]
    pub value: U256,
}

/// Logs plus their deduplicated block and transaction context.
///
/// Several logs of one transaction share a single `TransactionContext`; sinks
/// look context up by key instead of scanning `events`.
#[derive(Debug, Clone, Default)]
pub struct ExtractionBatch {
    /// Logs in chain order
    pub events: Vec<EvmLog>,

    pub blocks: HashMap<u64, BlockContext>,

    pub transactions: HashMap<H256, TransactionContext>,

    /// Opaque cursor to commit once the batch has been fully processed
    pub cursor: Option<String>,
}

impl ExtractionBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Highest block number referenced by the batch
    pub fn latest_block(&self) -> Option<u64> {
        self.events
            .iter()
            .filter_map(|e| e.block_number)
            .chain(self.blocks.keys().copied())
            .max()
    }
}

/// Extractor trait for fetching enriched log batches
///
/// # Return Value Semantics
///
/// - Non-empty batch: process it, then call `extract()` again
/// - Empty batch + `is_finished() = false`: nothing new yet, sleep and retry
/// - Empty batch + `is_finished() = true`: the source is exhausted
///
/// Extractors must deliver logs in non-decreasing (block number, log index) order.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract the next batch. `cursor` is the value carried by the previous
    /// batch; `None` means resume from the extractor's persisted state.
    async fn extract(&mut self, cursor: Option<String>, engine_db: &EngineDb) -> Result<ExtractionBatch>;

    fn is_finished(&self) -> bool;

    /// Persist `cursor` after the batch that produced it has been processed.
    async fn commit_cursor(&mut self, _cursor: &str, _engine_db: &EngineDb) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any;
}
