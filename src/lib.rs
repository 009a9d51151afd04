//! Coven - log-driven NFT activity indexer.
//!
//! The ETL loop pulls ordered log batches from an [`Extractor`], turns them
//! into typed envelopes with the registered [`Decoder`]s and hands the
//! envelopes to every [`Sink`]. The extractor cursor is only committed after
//! all sinks succeeded, so a failed batch is delivered again.

pub mod etl;

pub use async_trait::async_trait;
pub use tokio;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use etl::decoder::{ContractFilter, DecoderId};
use etl::engine_db::{EngineDb, EngineDbConfig};
use etl::event::EvmLog;
use etl::extractor::Extractor;
use etl::sink::{Sink, SinkContext};
use etl::{Decoder, DecoderContext, MultiSink, SampleExtractor};
use primitive_types::H160;

/// Configuration for the indexer with pluggable extractor, decoders and sinks.
pub struct IndexerConfig {
    pub sinks: Vec<Box<dyn Sink>>,

    pub decoders: Vec<Arc<dyn Decoder>>,

    /// Seconds to wait before polling an idle or failing extractor again.
    pub cycle_interval: u64,

    /// Logs per batch for the fallback sample extractor.
    pub events_per_cycle: usize,

    /// Logs cycled by the sample extractor when no extractor is configured.
    pub sample_events: Vec<EvmLog>,

    pub extractor: Option<Box<dyn Extractor>>,

    /// Root directory for sink databases.
    pub database_root: PathBuf,

    /// Engine database location. Defaults to `<database_root>/engine.db`.
    pub engine_database_url: Option<String>,

    pub contract_filter: ContractFilter,

    /// Seconds to wait for the in-flight batch after a shutdown signal.
    pub shutdown_timeout: u64,
}

impl IndexerConfig {
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct IndexerConfigBuilder {
    sinks: Vec<Box<dyn Sink>>,
    decoders: Vec<Arc<dyn Decoder>>,
    cycle_interval: Option<u64>,
    events_per_cycle: Option<usize>,
    sample_events: Vec<EvmLog>,
    extractor: Option<Box<dyn Extractor>>,
    database_root: Option<PathBuf>,
    engine_database_url: Option<String>,
    contract_filter: Option<ContractFilter>,
    shutdown_timeout: Option<u64>,
}

impl IndexerConfigBuilder {
    /// Adds a sink. Sinks are initialized by `run` before the loop starts.
    pub fn add_sink_boxed(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    pub fn cycle_interval(mut self, seconds: u64) -> Self {
        self.cycle_interval = Some(seconds);
        self
    }

    pub fn events_per_cycle(mut self, count: usize) -> Self {
        self.events_per_cycle = Some(count);
        self
    }

    pub fn with_sample_events(mut self, events: Vec<EvmLog>) -> Self {
        self.sample_events.extend(events);
        self
    }

    /// Sets the log source. Without one, a `SampleExtractor` is used.
    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn database_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_root = Some(path.into());
        self
    }

    pub fn engine_database_url(mut self, url: impl Into<String>) -> Self {
        self.engine_database_url = Some(url.into());
        self
    }

    pub fn with_contract_filter(mut self, filter: ContractFilter) -> Self {
        self.contract_filter = Some(filter);
        self
    }

    /// Route logs emitted by `contract` only to the given decoders.
    pub fn map_contract(mut self, contract: H160, decoder_ids: Vec<DecoderId>) -> Self {
        self.contract_filter
            .get_or_insert_with(ContractFilter::new)
            .mappings
            .insert(contract, decoder_ids);
        self
    }

    /// Drop logs from contracts without an explicit mapping.
    pub fn skip_unmapped(mut self, skip: bool) -> Self {
        self.contract_filter.get_or_insert_with(ContractFilter::new).skip_unmapped = skip;
        self
    }

    pub fn shutdown_timeout(mut self, seconds: u64) -> Self {
        self.shutdown_timeout = Some(seconds);
        self
    }

    /// Builds the configuration, rejecting an inconsistent contract filter.
    pub fn build(self) -> Result<IndexerConfig> {
        let contract_filter = self.contract_filter.unwrap_or_default();
        contract_filter.validate()?;

        Ok(IndexerConfig {
            sinks: self.sinks,
            decoders: self.decoders,
            cycle_interval: self.cycle_interval.unwrap_or(3),
            events_per_cycle: self.events_per_cycle.unwrap_or(5),
            sample_events: self.sample_events,
            extractor: self.extractor,
            database_root: self.database_root.unwrap_or_else(|| PathBuf::from(".")),
            engine_database_url: self.engine_database_url,
            contract_filter,
            shutdown_timeout: self.shutdown_timeout.unwrap_or(30),
        })
    }
}

/// Runs the ETL loop until the extractor finishes or a shutdown signal arrives.
///
/// NOTE: The caller is responsible for initializing the tracing subscriber.
pub async fn run(config: IndexerConfig) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();

    let signals = tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(target: "coven::main", "Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!(target: "coven::main", "Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {
                tracing::info!(target: "coven::main", "Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            () = terminate => {
                tracing::info!(target: "coven::main", "Received SIGTERM, initiating graceful shutdown...");
            }
        }

        signal_token.cancel();
    });

    let result = run_with_shutdown(config, shutdown_token).await;
    signals.abort();
    result
}

/// Same as [`run`] but stopped through `shutdown_token` instead of OS signals.
pub async fn run_with_shutdown(config: IndexerConfig, shutdown_token: CancellationToken) -> Result<()> {
    tracing::info!(
        target: "coven::main",
        "Starting Coven with {} sink(s) and {} decoder(s)",
        config.sinks.len(),
        config.decoders.len()
    );

    let sink_context = SinkContext {
        database_root: config.database_root.clone(),
    };

    let mut initialized_sinks: Vec<Arc<dyn Sink>> = Vec::new();
    for mut sink in config.sinks {
        sink.initialize(&sink_context).await?;
        initialized_sinks.push(Arc::from(sink));
    }
    let multi_sink = MultiSink::new(initialized_sinks);

    let engine_db_path = config.engine_database_url.clone().unwrap_or_else(|| {
        config
            .database_root
            .join("engine.db")
            .to_string_lossy()
            .to_string()
    });
    let engine_db = EngineDb::new(EngineDbConfig {
        path: engine_db_path,
    })
    .await?;

    let mut extractor: Box<dyn Extractor> = if let Some(extractor) = config.extractor {
        tracing::info!(target: "coven::etl", "Using configured extractor");
        extractor
    } else {
        tracing::info!(target: "coven::etl", "No extractor configured, using SampleExtractor");
        if config.sample_events.is_empty() {
            tracing::warn!(target: "coven::etl", "No sample events provided, ETL loop will idle");
        }
        Box::new(SampleExtractor::new(config.sample_events, config.events_per_cycle))
    };

    let decoder_context = DecoderContext::new(config.decoders, config.contract_filter)?;
    let cycle_interval = Duration::from_secs(config.cycle_interval);

    let etl_token = shutdown_token.clone();
    let mut etl_handle = tokio::spawn(async move {
        tracing::info!(target: "coven::etl", "Starting ETL pipeline...");

        let mut cursor: Option<String> = None;

        loop {
            if etl_token.is_cancelled() {
                tracing::info!(target: "coven::etl", "Shutdown requested, stopping ETL loop");
                break;
            }

            let batch = match extractor.extract(cursor.clone(), &engine_db).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(target: "coven::etl", "Extract failed: {:#}", e);
                    if extractor.is_finished() {
                        tracing::error!(target: "coven::etl", "Extractor cannot continue, stopping ETL loop");
                        break;
                    }
                    tokio::select! {
                        () = etl_token.cancelled() => break,
                        () = tokio::time::sleep(cycle_interval) => continue,
                    }
                }
            };

            let new_cursor = batch.cursor.clone();

            if batch.is_empty() {
                if let Some(ref cursor_str) = new_cursor {
                    if let Err(e) = extractor.commit_cursor(cursor_str, &engine_db).await {
                        tracing::error!(target: "coven::etl", "Failed to commit cursor: {}", e);
                    }
                }
                cursor = new_cursor;

                if extractor.is_finished() {
                    tracing::info!(target: "coven::etl", "Extractor finished, stopping ETL loop");
                    break;
                }
                tokio::select! {
                    () = etl_token.cancelled() => break,
                    () = tokio::time::sleep(cycle_interval) => continue,
                }
            }

            tracing::info!(target: "coven::etl", "Extracted {} logs", batch.len());

            let envelopes = match decoder_context.decode(&batch.events).await {
                Ok(envelopes) => envelopes,
                Err(e) => {
                    // The extractor has already moved past this batch; stop before the cursor skips it.
                    tracing::error!(target: "coven::etl", "Decode failed, stopping ETL loop: {:#}", e);
                    break;
                }
            };

            // Retry the same batch until the sinks accept it; sinks skip what they already applied.
            let mut applied = false;
            loop {
                match multi_sink.process(&envelopes, &batch).await {
                    Ok(()) => {
                        applied = true;
                        break;
                    }
                    Err(e) => {
                        tracing::error!(target: "coven::etl", "Sink processing failed: {:#}", e);
                        tokio::select! {
                            () = etl_token.cancelled() => break,
                            () = tokio::time::sleep(cycle_interval) => {}
                        }
                    }
                }
            }
            if !applied {
                tracing::info!(target: "coven::etl", "Shutdown requested before batch was applied, cursor not committed");
                break;
            }

            // Commit only once every sink applied the batch.
            if let Some(ref cursor_str) = new_cursor {
                if let Err(e) = extractor.commit_cursor(cursor_str, &engine_db).await {
                    tracing::error!(target: "coven::etl", "Failed to commit cursor: {}", e);
                }
            }

            if let Some(latest_block) = batch.latest_block() {
                if let Err(e) = engine_db.update_head(latest_block, batch.len() as u64).await {
                    tracing::warn!(target: "coven::etl", "Failed to update engine DB: {}", e);
                }
            }

            cursor = new_cursor;

            tracing::info!(target: "coven::etl", "ETL cycle complete");
        }

        match engine_db.get_stats().await {
            Ok(stats) => tracing::info!(
                target: "coven::etl",
                current_block = stats.current_block,
                total_events = stats.total_events,
                "ETL loop completed"
            ),
            Err(e) => tracing::warn!(target: "coven::etl", "Failed to read engine stats: {}", e),
        }
    });

    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout);

    tokio::select! {
        joined = &mut etl_handle => {
            if let Err(e) = joined {
                anyhow::bail!("ETL loop panicked: {e}");
            }
        }
        () = shutdown_token.cancelled() => {
            tracing::info!(target: "coven::main", "Waiting for the in-flight batch to complete...");
            match tokio::time::timeout(shutdown_timeout, &mut etl_handle).await {
                Ok(Ok(())) => {
                    tracing::info!(target: "coven::main", "ETL loop completed successfully");
                }
                Ok(Err(e)) => {
                    anyhow::bail!("ETL loop panicked: {e}");
                }
                Err(_) => {
                    tracing::warn!(
                        target: "coven::main",
                        "ETL loop did not complete within {}s timeout, forcing shutdown",
                        config.shutdown_timeout
                    );
                    etl_handle.abort();
                }
            }
        }
    }

    tracing::info!(target: "coven::main", "Coven shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = IndexerConfig::builder().build().unwrap();
        assert_eq!(config.cycle_interval, 3);
        assert_eq!(config.events_per_cycle, 5);
        assert_eq!(config.shutdown_timeout, 30);
        assert_eq!(config.database_root, PathBuf::from("."));
        assert!(config.extractor.is_none());
    }

    #[test]
    fn test_builder_rejects_mapped_and_blacklisted_contract() {
        let contract = H160::from_low_u64_be(7);
        let filter = ContractFilter::new().blacklist_contract(contract);
        let result = IndexerConfig::builder()
            .with_contract_filter(filter)
            .map_contract(contract, vec![DecoderId::new("erc721")])
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexerConfig::builder()
            .database_root(dir.path())
            .cycle_interval(60)
            .shutdown_timeout(5)
            .build()
            .unwrap();

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_with_shutdown(config, token.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    struct FailingDecoder;

    #[async_trait]
    impl Decoder for FailingDecoder {
        fn decoder_name(&self) -> &str {
            "failing"
        }

        async fn decode_event(&self, _event: &EvmLog) -> Result<Vec<etl::Envelope>> {
            anyhow::bail!("undecodable")
        }
    }

    #[tokio::test]
    async fn test_failing_decoder_does_not_skip_the_batch() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&events).unwrap();
        for block in 1..=2u64 {
            writeln!(
                file,
                r#"{{"log": {{"address": "0x0000000000000000000000000000000000000007", "topics": [], "data": "0x", "blockNumber": {block}, "transactionHash": "0x{block:064x}", "logIndex": 0}}}}"#
            )
            .unwrap();
        }
        drop(file);

        let engine_path = dir.path().join("engine.db").to_string_lossy().to_string();
        let config = IndexerConfig::builder()
            .with_extractor(Box::new(etl::LogFileExtractor::new(&events, 10)))
            .add_decoder(Arc::new(FailingDecoder))
            .database_root(dir.path())
            .engine_database_url(engine_path.clone())
            .cycle_interval(0)
            .build()
            .unwrap();

        run_with_shutdown(config, CancellationToken::new()).await.unwrap();

        let engine_db = EngineDb::new(EngineDbConfig { path: engine_path }).await.unwrap();
        assert_eq!(
            engine_db.get_extractor_state("log_file", "cursor").await.unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(engine_db.get_head().await.unwrap(), (2, 2));
    }
}
