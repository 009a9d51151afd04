pub mod context;

use async_trait::async_trait;
use primitive_types::H160;
use std::collections::{hash_map::DefaultHasher, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use super::envelope::Envelope;
use super::event::EvmLog;

pub use context::DecoderContext;

/// Decoder transforms raw logs into typed envelopes.
///
/// A decoder inspects each log, skips the ones it does not recognize and wraps
/// the ones it does in an `Envelope` with its own `TypeId`. Positional data a
/// sink may need (tx hash, block number, log index) goes in the body or in
/// the envelope metadata so sinks never have to scan `batch.events`.
///
/// Decoders must preserve log order: the envelopes for log `n` come before
/// the envelopes for log `n + 1`.
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Unique, stable, lowercase name (e.g. "erc721"). Hashed into a `DecoderId`.
    fn decoder_name(&self) -> &str;

    /// Decode a single log. Returns an empty Vec when the log is not of interest.
    async fn decode_event(&self, event: &EvmLog) -> anyhow::Result<Vec<Envelope>>;

    /// Decode a slice of logs, in order.
    async fn decode(&self, events: &[EvmLog]) -> anyhow::Result<Vec<Envelope>> {
        let mut all_envelopes = Vec::new();
        for event in events {
            let envelopes = self.decode_event(event).await?;
            all_envelopes.extend(envelopes);
        }
        Ok(all_envelopes)
    }
}

/// Decoder identifier based on the decoder name hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderId(u64);

impl DecoderId {
    pub fn new(name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        DecoderId(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Contract routing: explicit contract → decoders mappings plus a blacklist.
///
/// - Mapped contracts are only offered to their mapped decoders.
/// - Blacklisted contracts are dropped before any decoder runs.
/// - Unmapped contracts go to every decoder, unless `skip_unmapped` is set.
#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub mappings: HashMap<H160, Vec<DecoderId>>,
    pub blacklist: HashSet<H160>,
    pub skip_unmapped: bool,
}

impl ContractFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allows(&self, contract: H160) -> bool {
        !self.blacklist.contains(&contract)
    }

    /// `Some` when an explicit mapping exists, `None` otherwise.
    pub fn get_decoders(&self, contract: H160) -> Option<&Vec<DecoderId>> {
        self.mappings.get(&contract)
    }

    /// A contract may not be both mapped and blacklisted.
    pub fn validate(&self) -> anyhow::Result<()> {
        for addr in self.mappings.keys() {
            if self.blacklist.contains(addr) {
                anyhow::bail!("Contract {addr:#x} appears in both mapping and blacklist");
            }
        }
        Ok(())
    }

    pub fn map_contract(mut self, contract: H160, decoder_ids: Vec<DecoderId>) -> Self {
        self.mappings.insert(contract, decoder_ids);
        self
    }

    pub fn blacklist_contract(mut self, contract: H160) -> Self {
        self.blacklist.insert(contract);
        self
    }

    pub fn skip_unmapped(mut self, skip: bool) -> Self {
        self.skip_unmapped = skip;
        self
    }
}
