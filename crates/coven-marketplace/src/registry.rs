//! Known marketplace, burn and collection addresses.
//!
//! The registry is built once at startup and injected into the classifier and
//! the projector. Every marketplace of [`Marketplace::PRIORITY`] and the zero
//! address must be registered, so lookups after `build` cannot fail.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use coven_common::parse_address;
use primitive_types::H160;
use serde::Deserialize;

use crate::error::RegistryError;

/// Marketplace identity attached to every transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Marketplace {
    CryptoCoven,
    OpenSeaV1,
    OpenSeaV2,
    Seaport,
    LooksRare,
    ZeroExV1,
    ZeroExV2,
    Blur,
    Rarible,
    X2Y2,
    Nftx,
    GenieSwap,
    Unknown,
}

impl Marketplace {
    /// Classification order. Append only: reordering changes historical results.
    pub const PRIORITY: [Marketplace; 12] = [
        Marketplace::CryptoCoven,
        Marketplace::OpenSeaV1,
        Marketplace::OpenSeaV2,
        Marketplace::Seaport,
        Marketplace::LooksRare,
        Marketplace::ZeroExV1,
        Marketplace::ZeroExV2,
        Marketplace::Blur,
        Marketplace::Rarible,
        Marketplace::X2Y2,
        Marketplace::Nftx,
        Marketplace::GenieSwap,
    ];

    /// Stored identity string
    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::CryptoCoven => "CryptoCoven",
            Marketplace::OpenSeaV1 => "OpenSeaV1",
            Marketplace::OpenSeaV2 => "OpenSeaV2",
            Marketplace::Seaport => "SeaPort",
            Marketplace::LooksRare => "LooksRare",
            Marketplace::ZeroExV1 => "OxProtocol",
            Marketplace::ZeroExV2 => "OxProtocolV2",
            Marketplace::Blur => "Blur",
            Marketplace::Rarible => "Rarible",
            Marketplace::X2Y2 => "X2Y2",
            Marketplace::Nftx => "NFTX",
            Marketplace::GenieSwap => "GenieSwap",
            Marketplace::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Marketplace {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .iter()
            .chain(std::iter::once(&Marketplace::Unknown))
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| RegistryError::UnknownMarketplace(s.to_string()))
    }
}

/// Lookup key for [`AddressRegistry::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role<'a> {
    /// `Marketplace::Unknown` has no address
    Marketplace(Marketplace),
    /// Mint source and burn destination
    ZeroAddress,
    /// Tracked NFT contract, by registry name
    Collection(&'a str),
}

const MAINNET_MARKETPLACES: [(Marketplace, &str); 12] = [
    (Marketplace::CryptoCoven, "0x5180db8F5c931aaE63c74266b211F580155ecac8"),
    (Marketplace::OpenSeaV1, "0x7Be8076f4EA4A4AD08075C2508e481d6C946D12b"),
    (Marketplace::OpenSeaV2, "0x7f268357A8c2552623316e2562D90e642bB538E5"),
    (Marketplace::Seaport, "0x0000000000000068F116a894984e2DB1123eB395"),
    (Marketplace::LooksRare, "0x59728544B08AB483533076417FbBB2fD0B17CE3a"),
    (Marketplace::ZeroExV1, "0x44A6999Ec971cfCA458AFf25A808F272f6d492A2"),
    (Marketplace::ZeroExV2, "0x080bf510FCbF18b91105470639e9561022937712"),
    (Marketplace::Blur, "0x0bC2f8668E86187Bd9e8fe832f72683871Cb5f21"),
    (Marketplace::Rarible, "0x9757F2d2b135150BBeb65308D4a91804107cd8D6"),
    (Marketplace::X2Y2, "0x6D7812d41A08BC2a910B562d8B56411964A4eD88"),
    (Marketplace::Nftx, "0x0fc584529a2AEfA997697FAfAcbA5831faC0c22d"),
    (Marketplace::GenieSwap, "0x0a267cF51EF038fC00E71801F5a524aec06e4f07"),
];

const MAINNET_COLLECTIONS: [(&str, &str); 2] = [
    ("CryptoCoven", "0x5180db8F5c931aaE63c74266b211F580155ecac8"),
    ("CryptoKitties", "0x06012c8cf97BEaD5deAe237070F9587f8E7A266d"),
];

/// Immutable role -> address table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRegistry {
    /// In `Marketplace::PRIORITY` order
    marketplaces: Vec<(Marketplace, H160)>,
    zero_address: H160,
    collections: BTreeMap<String, H160>,
}

impl AddressRegistry {
    pub fn builder() -> AddressRegistryBuilder {
        AddressRegistryBuilder::default()
    }

    /// Ethereum mainnet addresses for every marketplace, tracking CryptoCoven
    /// and CryptoKitties.
    pub fn mainnet() -> Result<Self, RegistryError> {
        Self::mainnet_builder().build()
    }

    /// Builder preloaded with the mainnet table, for applying overrides.
    pub fn mainnet_builder() -> AddressRegistryBuilder {
        let mut builder = AddressRegistryBuilder::default().zero_address(H160::zero());
        for (marketplace, address) in MAINNET_MARKETPLACES {
            builder.marketplaces.insert(marketplace, address.to_string());
        }
        for (name, address) in MAINNET_COLLECTIONS {
            builder.collections.insert(name.to_string(), address.to_string());
        }
        builder
    }

    /// `None` only for `Marketplace::Unknown` and untracked collection names:
    /// `build` rejects a registry missing any fixed role.
    pub fn resolve(&self, role: Role<'_>) -> Option<H160> {
        match role {
            Role::ZeroAddress => Some(self.zero_address),
            Role::Marketplace(marketplace) => Marketplace::PRIORITY
                .iter()
                .position(|m| *m == marketplace)
                .and_then(|index| self.marketplaces.get(index))
                .map(|(_, address)| *address),
            Role::Collection(name) => self.collections.get(name).copied(),
        }
    }

    pub fn zero_address(&self) -> H160 {
        self.zero_address
    }

    /// Marketplaces with their addresses, highest priority first.
    pub fn marketplaces(&self) -> impl Iterator<Item = (Marketplace, H160)> + '_ {
        self.marketplaces.iter().copied()
    }

    pub fn collections(&self) -> &BTreeMap<String, H160> {
        &self.collections
    }

    pub fn is_tracked(&self, contract: H160) -> bool {
        self.collections.values().any(|c| *c == contract)
    }

    pub fn collection_name(&self, contract: H160) -> Option<&str> {
        self.collections
            .iter()
            .find(|(_, c)| **c == contract)
            .map(|(name, _)| name.as_str())
    }
}

/// JSON overrides applied on top of a builder.
///
/// ```json
/// {
///   "marketplaces": { "Blur": "0x..." },
///   "zeroAddress": "0x0000000000000000000000000000000000000000",
///   "collections": { "CryptoCoven": "0x..." }
/// }
/// ```
///
/// A non-empty `collections` map replaces the tracked set instead of extending it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegistryOverrides {
    #[serde(default)]
    pub marketplaces: BTreeMap<String, String>,
    #[serde(default)]
    pub zero_address: Option<String>,
    #[serde(default)]
    pub collections: BTreeMap<String, String>,
}

/// Collects raw addresses; parsing and completeness are checked in `build`.
#[derive(Debug, Clone, Default)]
pub struct AddressRegistryBuilder {
    marketplaces: BTreeMap<Marketplace, String>,
    zero_address: Option<String>,
    collections: BTreeMap<String, String>,
    errors: Vec<RegistryError>,
}

impl AddressRegistryBuilder {
    pub fn marketplace(mut self, marketplace: Marketplace, address: impl Into<String>) -> Self {
        self.marketplaces.insert(marketplace, address.into());
        self
    }

    pub fn zero_address(mut self, address: H160) -> Self {
        self.zero_address = Some(format!("{address:#x}"));
        self
    }

    pub fn collection(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.collections.insert(name.into(), address.into());
        self
    }

    /// Keep only the named collections. Unknown names are reported by `build`.
    pub fn retain_collections(mut self, names: &[String]) -> Self {
        for name in names {
            if !self.collections.contains_key(name) {
                self.errors.push(RegistryError::MissingRole(format!("collection {name}")));
            }
        }
        self.collections.retain(|name, _| names.contains(name));
        self
    }

    pub fn apply_overrides(mut self, overrides: RegistryOverrides) -> Self {
        for (name, address) in overrides.marketplaces {
            match name.parse::<Marketplace>() {
                Ok(Marketplace::Unknown) => self.errors.push(RegistryError::UnknownMarketplace(name)),
                Ok(marketplace) => {
                    self.marketplaces.insert(marketplace, address);
                }
                Err(e) => self.errors.push(e),
            }
        }
        if let Some(zero) = overrides.zero_address {
            self.zero_address = Some(zero);
        }
        if !overrides.collections.is_empty() {
            self.collections = overrides.collections;
        }
        self
    }

    pub fn build(self) -> Result<AddressRegistry, RegistryError> {
        if let Some(e) = self.errors.into_iter().next() {
            return Err(e);
        }

        let mut marketplaces = Vec::with_capacity(Marketplace::PRIORITY.len());
        for marketplace in Marketplace::PRIORITY {
            let raw = self
                .marketplaces
                .get(&marketplace)
                .ok_or_else(|| RegistryError::MissingRole(marketplace.to_string()))?;
            marketplaces.push((marketplace, parse(marketplace.as_str(), raw)?));
        }

        let zero_raw = self
            .zero_address
            .ok_or_else(|| RegistryError::MissingRole("zero address".to_string()))?;
        let zero_address = parse("zero address", &zero_raw)?;

        if self.collections.is_empty() {
            return Err(RegistryError::NoCollections);
        }
        let collections = self
            .collections
            .iter()
            .map(|(name, raw)| parse(name, raw).map(|address| (name.clone(), address)))
            .collect::<Result<BTreeMap<_, _>, RegistryError>>()?;

        Ok(AddressRegistry {
            marketplaces,
            zero_address,
            collections,
        })
    }
}

fn parse(role: &str, value: &str) -> Result<H160, RegistryError> {
    parse_address(value).ok_or_else(|| RegistryError::InvalidAddress {
        role: role.to_string(),
        value: value.to_string(),
    })
}
