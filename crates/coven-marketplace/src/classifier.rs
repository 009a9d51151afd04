//! Marketplace attribution from transaction-level addresses.
//!
//! A transfer is attributed to the first marketplace, in priority order, whose
//! address equals the transaction's recipient (the invoked contract) or its
//! sender. Router and aggregator transactions that never touch a registered
//! address come out as `Unknown`.

use primitive_types::H160;

use crate::registry::{AddressRegistry, Marketplace};

#[derive(Debug, Clone)]
pub struct MarketplaceClassifier {
    /// Highest priority first
    marketplaces: Vec<(Marketplace, H160)>,
}

impl MarketplaceClassifier {
    pub fn new(registry: &AddressRegistry) -> Self {
        Self {
            marketplaces: registry.marketplaces().collect(),
        }
    }

    /// An absent side never matches.
    pub fn classify(&self, sender: Option<H160>, recipient: Option<H160>) -> Marketplace {
        self.marketplaces
            .iter()
            .find(|(_, address)| recipient == Some(*address) || sender == Some(*address))
            .map_or(Marketplace::Unknown, |(marketplace, _)| *marketplace)
    }
}
