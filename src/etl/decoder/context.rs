//! DecoderContext fans logs out to the registered decoders.
//!
//! - Decoders are keyed by the hash of `decoder_name()`.
//! - Explicitly mapped contracts only reach their mapped decoders.
//! - Unmapped contracts reach every decoder in sorted `DecoderId` order,
//!   unless the filter skips unmapped contracts.
//! - A failing decoder is logged and skipped; the other decoders still run.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ContractFilter, Decoder, DecoderId};
use crate::etl::envelope::Envelope;
use crate::etl::event::EvmLog;

pub struct DecoderContext {
    /// Sorted so unmapped logs hit decoders in a deterministic order
    decoders: BTreeMap<DecoderId, Arc<dyn Decoder>>,
    contract_filter: ContractFilter,
}

impl DecoderContext {
    pub fn new(decoders: Vec<Arc<dyn Decoder>>, contract_filter: ContractFilter) -> anyhow::Result<Self> {
        contract_filter.validate()?;

        let mut decoder_map = BTreeMap::new();
        for decoder in decoders {
            let name = decoder.decoder_name().to_string();
            let id = DecoderId::new(&name);
            if decoder_map.insert(id, decoder).is_some() {
                anyhow::bail!("Duplicate decoder name '{name}'. Decoder names must be unique");
            }
            tracing::debug!(
                target: "coven::etl::decoder_context",
                "Registered decoder '{}' with ID {:?}",
                name,
                id
            );
        }

        tracing::info!(
            target: "coven::etl::decoder_context",
            decoders = decoder_map.len(),
            mapped_contracts = contract_filter.mappings.len(),
            blacklisted_contracts = contract_filter.blacklist.len(),
            skip_unmapped = contract_filter.skip_unmapped,
            "Initialized DecoderContext"
        );

        Ok(Self {
            decoders: decoder_map,
            contract_filter,
        })
    }

    pub fn decoder_ids(&self) -> Vec<DecoderId> {
        self.decoders.keys().copied().collect()
    }

    async fn run_decoder(decoder: &Arc<dyn Decoder>, event: &EvmLog, out: &mut Vec<Envelope>) {
        match decoder.decode_event(event).await {
            Ok(envelopes) => {
                if !envelopes.is_empty() {
                    tracing::trace!(
                        target: "coven::etl::decoder_context",
                        "Decoder '{}' decoded log {} into {} envelope(s)",
                        decoder.decoder_name(),
                        event.id(),
                        envelopes.len()
                    );
                }
                out.extend(envelopes);
            }
            Err(e) => {
                tracing::warn!(
                    target: "coven::etl::decoder_context",
                    "Decoder '{}' failed on log {}: {}",
                    decoder.decoder_name(),
                    event.id(),
                    e
                );
            }
        }
    }
}

#[async_trait]
impl Decoder for DecoderContext {
    fn decoder_name(&self) -> &str {
        "context"
    }

    async fn decode_event(&self, event: &EvmLog) -> anyhow::Result<Vec<Envelope>> {
        if !self.contract_filter.allows(event.address) {
            return Ok(Vec::new());
        }

        let mut all_envelopes = Vec::new();

        if let Some(decoder_ids) = self.contract_filter.get_decoders(event.address) {
            for decoder_id in decoder_ids {
                if let Some(decoder) = self.decoders.get(decoder_id) {
                    Self::run_decoder(decoder, event, &mut all_envelopes).await;
                } else {
                    tracing::warn!(
                        target: "coven::etl::decoder_context",
                        "Mapped decoder ID {:?} not found for contract {:#x}",
                        decoder_id,
                        event.address
                    );
                }
            }
        } else if self.contract_filter.skip_unmapped {
            tracing::trace!(
                target: "coven::etl::decoder_context",
                contract = %format!("{:#x}", event.address),
                "Skipping unmapped contract"
            );
        } else {
            for decoder in self.decoders.values() {
                Self::run_decoder(decoder, event, &mut all_envelopes).await;
            }
        }

        Ok(all_envelopes)
    }

    async fn decode(&self, events: &[EvmLog]) -> anyhow::Result<Vec<Envelope>> {
        let mut all_envelopes = Vec::new();
        for event in events {
            all_envelopes.extend(self.decode_event(event).await?);
        }

        tracing::debug!(
            target: "coven::etl::decoder_context",
            "Decoded {} logs into {} envelopes across {} decoders",
            events.len(),
            all_envelopes.len(),
            self.decoders.len(),
        );

        Ok(all_envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::envelope::{TypeId, TypedBody};
    use primitive_types::H160;
    use std::any::Any;
    use std::collections::HashMap;

    struct Seen(H160);

    impl TypedBody for Seen {
        fn envelope_type_id(&self) -> TypeId {
            TypeId::new("test.seen")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct EchoDecoder(&'static str);

    #[async_trait]
    impl Decoder for EchoDecoder {
        fn decoder_name(&self) -> &str {
            self.0
        }

        async fn decode_event(&self, event: &EvmLog) -> anyhow::Result<Vec<Envelope>> {
            Ok(vec![Envelope::new(event.id(), Box::new(Seen(event.address)), HashMap::new())])
        }
    }

    fn log_from(address: u64) -> EvmLog {
        EvmLog {
            address: H160::from_low_u64_be(address),
            topics: Vec::new(),
            data: Vec::new(),
            block_number: Some(1),
            transaction_hash: None,
            log_index: Some(0),
        }
    }

    #[tokio::test]
    async fn test_duplicate_decoder_names_rejected() {
        let decoders: Vec<Arc<dyn Decoder>> = vec![Arc::new(EchoDecoder("echo")), Arc::new(EchoDecoder("echo"))];
        assert!(DecoderContext::new(decoders, ContractFilter::new()).is_err());
    }

    #[tokio::test]
    async fn test_blacklist_and_skip_unmapped() {
        let mapped = H160::from_low_u64_be(1);
        let filter = ContractFilter::new()
            .map_contract(mapped, vec![DecoderId::new("echo")])
            .blacklist_contract(H160::from_low_u64_be(2))
            .skip_unmapped(true);
        let context = DecoderContext::new(vec![Arc::new(EchoDecoder("echo"))], filter).unwrap();

        let envelopes = context
            .decode(&[log_from(1), log_from(2), log_from(3), log_from(1)])
            .await
            .unwrap();

        assert_eq!(envelopes.len(), 2);
        assert!(envelopes.iter().all(|e| e.downcast_ref::<Seen>().map(|s| s.0) == Some(mapped)));
    }

    #[tokio::test]
    async fn test_unmapped_contracts_reach_all_decoders() {
        let decoders: Vec<Arc<dyn Decoder>> = vec![Arc::new(EchoDecoder("a")), Arc::new(EchoDecoder("b"))];
        let context = DecoderContext::new(decoders, ContractFilter::new()).unwrap();
        let envelopes = context.decode(&[log_from(9)]).await.unwrap();
        assert_eq!(envelopes.len(), 2);
    }
}
