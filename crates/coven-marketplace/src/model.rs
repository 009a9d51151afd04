//! Projected entities and the transfer event they are derived from.

use coven_common::address_to_hex;
use primitive_types::{H160, H256, U256};

use crate::error::MalformedEvent;
use crate::registry::Marketplace;

/// Per-address aggregate counters.
///
/// Counters only ever grow. An account exists once its address appeared as
/// sender or receiver of a processed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: H160,
    pub send_count: u64,
    pub receive_count: u64,
    pub mint_count: u64,
    pub burn_count: u64,
    /// Sum of the transaction values credited to this account as receiver
    pub total_spent: U256,
    pub unique_marketplace_count: u64,
    pub last_tx_hash: Option<H256>,
}

impl Account {
    pub fn new(id: H160) -> Self {
        Self {
            id,
            send_count: 0,
            receive_count: 0,
            mint_count: 0,
            burn_count: 0,
            total_spent: U256::zero(),
            unique_marketplace_count: 0,
            last_tx_hash: None,
        }
    }

    /// Canonical id, lowercase hex
    pub fn key(&self) -> String {
        address_to_hex(self.id)
    }
}

/// Immutable record of one ERC721 Transfer log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// `<tx hash>-<log index>`, both as `0x` hex
    pub id: String,
    pub collection: H160,
    pub from: H160,
    pub to: H160,
    pub token_id: U256,
    /// Value of the enclosing transaction, not a sale price
    pub value: U256,
    pub marketplace: Marketplace,
    pub transaction_hash: H256,
    pub log_index: u64,
    pub block_number: Option<u64>,
    pub timestamp: Option<u64>,
}

pub fn transfer_id(transaction_hash: H256, log_index: u64) -> String {
    format!("{transaction_hash:#x}-{log_index:#x}")
}

/// First observed (account, marketplace) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceInteraction {
    /// `<account>-<marketplace>`
    pub id: String,
    pub account: H160,
    pub marketplace: Marketplace,
}

impl MarketplaceInteraction {
    pub fn new(account: H160, marketplace: Marketplace) -> Self {
        Self {
            id: Self::id_for(account, marketplace),
            account,
            marketplace,
        }
    }

    pub fn id_for(account: H160, marketplace: Marketplace) -> String {
        format!("{}-{}", address_to_hex(account), marketplace)
    }
}

/// A transfer log joined with its transaction context, as handed to the projector.
///
/// Fields coming from the log are optional so an incomplete event can be
/// represented and rejected. `transaction_recipient` is the contract the
/// transaction invoked; `transaction_sender` its originator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferEvent {
    pub collection: H160,
    pub from: Option<H160>,
    pub to: Option<H160>,
    pub token_id: Option<U256>,
    pub transaction_hash: Option<H256>,
    pub log_index: Option<u64>,
    pub value: U256,
    pub transaction_sender: Option<H160>,
    pub transaction_recipient: Option<H160>,
    pub block_number: Option<u64>,
    pub timestamp: Option<u64>,
}

/// Required fields of a [`TransferEvent`], present by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequiredFields {
    pub from: H160,
    pub to: H160,
    pub token_id: U256,
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl TransferEvent {
    pub(crate) fn required(&self) -> Result<RequiredFields, MalformedEvent> {
        Ok(RequiredFields {
            from: self.from.ok_or(MalformedEvent::missing("from"))?,
            to: self.to.ok_or(MalformedEvent::missing("to"))?,
            token_id: self.token_id.ok_or(MalformedEvent::missing("tokenId"))?,
            transaction_hash: self
                .transaction_hash
                .ok_or(MalformedEvent::missing("transaction hash"))?,
            log_index: self.log_index.ok_or(MalformedEvent::missing("logIndex"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_id_format() {
        assert_eq!(
            transfer_id(H256::from_low_u64_be(1), 0),
            format!("{:#x}-0x0", H256::from_low_u64_be(1))
        );
        assert!(transfer_id(H256::zero(), 26).ends_with("-0x1a"));
    }

    #[test]
    fn test_interaction_id_uses_identity_string() {
        let id = MarketplaceInteraction::id_for(H160::from_low_u64_be(0xaaa), Marketplace::Seaport);
        assert_eq!(id, "0x0000000000000000000000000000000000000aaa-SeaPort");
    }

    #[test]
    fn test_missing_fields_are_reported_in_order() {
        let event = TransferEvent {
            from: Some(H160::zero()),
            token_id: Some(U256::one()),
            ..Default::default()
        };
        assert_eq!(event.required(), Err(MalformedEvent::missing("to")));
    }
}
