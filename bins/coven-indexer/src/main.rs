//! Coven Indexer - NFT marketplace activity indexer
//!
//! Projects ERC721 Transfer logs of tracked collections (CryptoCoven and
//! CryptoKitties by default) into accounts, transfers and marketplace
//! interactions stored in SQLite.
//!
//! # Usage
//!
//! ```bash
//! # Replay a log file
//! coven-indexer --events ./transfers.jsonl --db-path ./data/coven.db
//!
//! # Only CryptoCoven, custom marketplace addresses
//! coven-indexer --events ./transfers.jsonl --collections CryptoCoven --registry ./registry.json
//!
//! # Cycle built-in sample transfers without touching disk
//! coven-indexer --dry-run
//! ```

mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use config::Config;
use coven::etl::decoder::DecoderId;
use coven::etl::{EvmLog, LogFileExtractor};
use coven_marketplace::{
    AddressRegistry, EntityStore, Erc721TransferDecoder, MarketplaceSink, MemoryStore, SqliteStore,
    TransferProjector, TRANSFER_TOPIC,
};
use primitive_types::{H160, H256};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .init();

    tracing::info!("Starting Coven Indexer");
    tracing::info!("Database: {}", config.db_path);
    tracing::info!("Engine database: {}", config.engine_db_path());

    let registry = config.build_registry()?;
    for (name, address) in registry.collections() {
        tracing::info!("Tracking {} at {:#x}", name, address);
    }

    let store: Arc<dyn EntityStore> = if config.dry_run {
        tracing::info!("Dry run: projected state is kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        std::fs::create_dir_all(config.database_root())?;
        Arc::new(SqliteStore::open(&config.db_path)?)
    };

    let projector = Arc::new(TransferProjector::new(store.clone(), &registry));
    let decoder = Arc::new(Erc721TransferDecoder::new(&registry));
    let sink = Box::new(MarketplaceSink::new(projector));

    let mut indexer_config = coven::IndexerConfig::builder()
        .database_root(config.database_root())
        .engine_database_url(config.engine_db_path())
        .add_decoder(decoder)
        .add_sink_boxed(sink)
        .events_per_cycle(config.batch_size)
        .cycle_interval(config.cycle_interval)
        .shutdown_timeout(config.shutdown_timeout)
        .skip_unmapped(true);

    // Only tracked collections reach the decoder.
    let erc721_decoder_id = DecoderId::new("erc721");
    for address in registry.collections().values() {
        indexer_config = indexer_config.map_contract(*address, vec![erc721_decoder_id]);
    }

    indexer_config = match &config.events {
        Some(path) => {
            tracing::info!("Replaying logs from {}", path.display());
            indexer_config.with_extractor(Box::new(LogFileExtractor::new(path, config.batch_size)))
        }
        None => {
            tracing::info!("No --events file, cycling sample transfers");
            indexer_config.with_sample_events(sample_events(&registry))
        }
    };

    coven::run(indexer_config.build()?)
        .await
        .map_err(|e| anyhow::anyhow!("Coven error: {e}"))?;

    tracing::info!("Final Statistics:");
    if let Ok(accounts) = store.account_count() {
        tracing::info!("  Accounts: {}", accounts);
    }
    if let Ok(transfers) = store.transfer_count() {
        tracing::info!("  Transfers: {}", transfers);
    }

    Ok(())
}

fn topic(address: H160) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_bytes());
    H256(bytes)
}

/// A mint followed by two resales on the first tracked collection.
fn sample_events(registry: &AddressRegistry) -> Vec<EvmLog> {
    let Some(collection) = registry.collections().values().next().copied() else {
        return Vec::new();
    };
    let parties = [
        H160::zero(),
        H160::from_low_u64_be(0xc0de),
        H160::from_low_u64_be(0xbeef),
        H160::from_low_u64_be(0xcafe),
    ];

    parties
        .windows(2)
        .enumerate()
        .map(|(i, pair)| EvmLog {
            address: collection,
            topics: vec![
                TRANSFER_TOPIC,
                topic(pair[0]),
                topic(pair[1]),
                H256::from_low_u64_be(i as u64 + 1),
            ],
            data: Vec::new(),
            block_number: None,
            transaction_hash: None,
            log_index: None,
        })
        .collect()
}
