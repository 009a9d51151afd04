//! Configuration for the Coven indexer

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use coven_marketplace::{AddressRegistry, RegistryOverrides};

/// NFT marketplace activity indexer
///
/// Replays ERC721 Transfer logs and maintains per-account counters, transfer
/// records and marketplace interactions.
#[derive(Parser, Debug)]
#[command(name = "coven-indexer")]
#[command(about = "Index NFT transfers and marketplace activity", long_about = None)]
pub struct Config {
    /// JSON-lines log file to replay (one `{log, transaction, block}` record per line)
    ///
    /// Without it, a built-in sample of transfers is cycled.
    #[arg(long, env = "COVEN_EVENTS")]
    pub events: Option<PathBuf>,

    /// Database path for accounts, transfers and interactions
    #[arg(long, env = "COVEN_DB_PATH", default_value = "./coven-data.db")]
    pub db_path: String,

    /// Engine database path (cursor and head). Defaults to engine.db next to --db-path
    #[arg(long, env = "COVEN_ENGINE_DB")]
    pub engine_db: Option<String>,

    /// JSON file with marketplace, zero address and collection overrides
    #[arg(long, env = "COVEN_REGISTRY")]
    pub registry: Option<PathBuf>,

    /// Tracked collections by registry name (comma-separated)
    ///
    /// Example: --collections CryptoCoven
    #[arg(long, value_delimiter = ',')]
    pub collections: Vec<String>,

    /// Logs per batch
    #[arg(long, default_value = "100")]
    pub batch_size: usize,

    /// Seconds between polls when the source has nothing new
    #[arg(long, default_value = "3")]
    pub cycle_interval: u64,

    /// Seconds to wait for the in-flight batch on shutdown
    #[arg(long, default_value = "30")]
    pub shutdown_timeout: u64,

    /// Keep projected state in memory only
    #[arg(long)]
    pub dry_run: bool,
}

impl Config {
    /// Mainnet registry with the optional override file and collection selection applied.
    pub fn build_registry(&self) -> Result<AddressRegistry> {
        let mut builder = AddressRegistry::mainnet_builder();

        if let Some(path) = &self.registry {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read registry file {}", path.display()))?;
            let overrides: RegistryOverrides = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid registry file {}", path.display()))?;
            builder = builder.apply_overrides(overrides);
        }

        if !self.collections.is_empty() {
            builder = builder.retain_collections(&self.collections);
        }

        Ok(builder.build()?)
    }

    pub fn database_root(&self) -> PathBuf {
        Path::new(&self.db_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf()
    }

    pub fn engine_db_path(&self) -> String {
        self.engine_db.clone().unwrap_or_else(|| {
            self.database_root()
                .join("engine.db")
                .to_string_lossy()
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["coven-indexer"]);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.database_root(), PathBuf::from("."));
        assert_eq!(config.engine_db_path(), "./engine.db");
        assert_eq!(config.build_registry().unwrap().collections().len(), 2);
    }

    #[test]
    fn test_collections_and_registry_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"marketplaces": {{"X2Y2": "0x00000000000000000000000000000000000000ff"}}}}"#
        )
        .unwrap();

        let config = Config::parse_from([
            "coven-indexer",
            "--collections",
            "CryptoKitties",
            "--registry",
            file.path().to_str().unwrap(),
            "--db-path",
            "/tmp/coven/coven.db",
        ]);
        let registry = config.build_registry().unwrap();

        assert_eq!(registry.collections().len(), 1);
        assert!(registry.collections().contains_key("CryptoKitties"));
        assert_eq!(config.engine_db_path(), "/tmp/coven/engine.db");
    }

    #[test]
    fn test_unknown_collection_is_rejected() {
        let config = Config::parse_from(["coven-indexer", "--collections", "CryptoPunks"]);
        assert!(config.build_registry().is_err());
    }
}
