//! Raw EVM log as delivered by an event source.

use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single log emission, in the shape returned by `eth_getLogs`.
///
/// Positional fields are optional because pending or malformed payloads may
/// omit them; decoders and sinks decide what an absent field means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmLog {
    pub address: H160,
    #[serde(default)]
    pub topics: Vec<H256>,
    #[serde(default, with = "hex_data")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default)]
    pub log_index: Option<u64>,
}

impl EvmLog {
    /// Chain position used for ordering checks: (block, log index).
    pub fn position(&self) -> Option<(u64, u64)> {
        Some((self.block_number?, self.log_index?))
    }

    /// Identifier of this log, `<tx_hash>-<log_index>` in lowercase hex.
    pub fn id(&self) -> String {
        match (self.transaction_hash, self.log_index) {
            (Some(hash), Some(index)) => format!("{hash:#x}-{index:#x}"),
            (Some(hash), None) => format!("{hash:#x}"),
            _ => format!("{:#x}", self.address),
        }
    }

    /// Source fields as envelope metadata.
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("address".to_string(), format!("{:#x}", self.address));
        if let Some(hash) = self.transaction_hash {
            metadata.insert("tx_hash".to_string(), format!("{hash:#x}"));
        }
        if let Some(block_number) = self.block_number {
            metadata.insert("block_number".to_string(), block_number.to_string());
        }
        if let Some(log_index) = self.log_index {
            metadata.insert("log_index".to_string(), log_index.to_string());
        }
        metadata
    }
}

/// `0x`-prefixed hex (de)serialization for raw log data.
mod hex_data {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(data)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
