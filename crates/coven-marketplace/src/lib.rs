//! NFT Marketplace Activity Projection for Coven
//!
//! Turns ERC721 Transfer logs of tracked collections into per-account
//! counters, immutable transfer records and distinct marketplace interactions.
//!
//! # Components
//!
//! - [`AddressRegistry`]: marketplace, zero and collection addresses
//! - [`MarketplaceClassifier`]: attributes a transfer to a marketplace
//! - [`TransferProjector`]: applies one transfer event atomically and idempotently
//! - [`EntityStore`]: keyed store with [`MemoryStore`] and [`SqliteStore`] backends
//! - [`Erc721TransferDecoder`] / [`MarketplaceSink`]: ETL plumbing around the projector
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coven_marketplace::{AddressRegistry, Erc721TransferDecoder, MarketplaceSink, SqliteStore, TransferProjector};
//!
//! let registry = AddressRegistry::mainnet()?;
//! let store = Arc::new(SqliteStore::open("./coven.db")?);
//! let projector = Arc::new(TransferProjector::new(store, &registry));
//!
//! let config = coven::IndexerConfig::builder()
//!     .add_decoder(Arc::new(Erc721TransferDecoder::new(&registry)))
//!     .add_sink_boxed(Box::new(MarketplaceSink::new(projector)))
//!     .build()?;
//! coven::run(config).await?;
//! ```

pub mod accounts;
pub mod classifier;
pub mod decoder;
pub mod error;
pub mod interactions;
pub mod model;
pub mod projector;
pub mod registry;
pub mod sink;
pub mod storage;

pub use accounts::AccountStore;
pub use classifier::MarketplaceClassifier;
pub use decoder::{Erc721TransferDecoder, NftTransfer, TRANSFER_TOPIC};
pub use error::{MalformedEvent, ProjectionError, RegistryError, StoreError};
pub use interactions::InteractionIndex;
pub use model::{transfer_id, Account, MarketplaceInteraction, Transfer, TransferEvent};
pub use projector::{ProjectionOutcome, TransferProjector};
pub use registry::{AddressRegistry, Marketplace, RegistryOverrides, Role};
pub use sink::{BatchStats, MarketplaceSink};
pub use storage::{Changeset, EntityStore, MemoryStore, SqliteStore};
