//! ERC721 Transfer log decoder

use std::any::Any;
use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use coven::etl::envelope::TypeId;
use coven::etl::{Decoder, Envelope, EvmLog, TypedBody};
use primitive_types::{H160, H256, U256};

use crate::registry::AddressRegistry;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: H256 = H256([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b,
    0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16,
    0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

pub const TRANSFER_TYPE: &str = "erc721.transfer";

/// Transfer event from a tracked ERC721 collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftTransfer {
    pub from: H160,
    pub to: H160,
    pub token_id: U256,
    /// Emitting contract
    pub collection: H160,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<H256>,
    pub log_index: Option<u64>,
}

impl TypedBody for NftTransfer {
    fn envelope_type_id(&self) -> TypeId {
        TypeId::new(TRANSFER_TYPE)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Decodes `Transfer(address,address,uint256)` logs of tracked collections.
///
/// Supports both layouts found on mainnet:
///
/// Standard ERC721:
/// - topics[0]: Transfer topic
/// - topics[1]: from
/// - topics[2]: to
/// - topics[3]: token id
/// - data: empty
///
/// Legacy (CryptoKitties, pre-ERC721 final):
/// - topics[0]: Transfer topic
/// - data: from, to, token id as three 32-byte words
///
/// ERC20 transfers share the topic but carry 3 topics and a 32-byte amount;
/// they do not match either layout and are skipped.
pub struct Erc721TransferDecoder {
    collections: HashSet<H160>,
}

impl Erc721TransferDecoder {
    pub fn new(registry: &AddressRegistry) -> Self {
        Self {
            collections: registry.collections().values().copied().collect(),
        }
    }

    fn word_to_address(word: &[u8]) -> H160 {
        H160::from_slice(&word[12..32])
    }

    fn decode_transfer(&self, log: &EvmLog) -> Option<NftTransfer> {
        let (from, to, token_id) = if log.topics.len() == 4 && log.data.is_empty() {
            (
                Self::word_to_address(log.topics[1].as_bytes()),
                Self::word_to_address(log.topics[2].as_bytes()),
                U256::from_big_endian(log.topics[3].as_bytes()),
            )
        } else if log.topics.len() == 1 && log.data.len() == 96 {
            (
                Self::word_to_address(&log.data[0..32]),
                Self::word_to_address(&log.data[32..64]),
                U256::from_big_endian(&log.data[64..96]),
            )
        } else {
            tracing::debug!(
                target: "coven_marketplace::decoder",
                contract = %format!("{:#x}", log.address),
                topics_len = log.topics.len(),
                data_len = log.data.len(),
                "Transfer log does not match an ERC721 layout"
            );
            return None;
        };

        Some(NftTransfer {
            from,
            to,
            token_id,
            collection: log.address,
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        })
    }
}

#[async_trait]
impl Decoder for Erc721TransferDecoder {
    fn decoder_name(&self) -> &'static str {
        "erc721"
    }

    async fn decode_event(&self, event: &EvmLog) -> Result<Vec<Envelope>> {
        if event.topics.first() != Some(&TRANSFER_TOPIC) || !self.collections.contains(&event.address) {
            return Ok(Vec::new());
        }

        let Some(transfer) = self.decode_transfer(event) else {
            return Ok(Vec::new());
        };

        if transfer.transaction_hash.is_none() {
            tracing::warn!(
                target: "coven_marketplace::decoder",
                contract = %format!("{:#x}", event.address),
                block_number = ?event.block_number,
                "ERC721 Transfer log without transaction hash"
            );
        }

        Ok(vec![Envelope::new(
            format!("erc721_transfer_{}", event.id()),
            Box::new(transfer),
            event.metadata(),
        )])
    }
}
