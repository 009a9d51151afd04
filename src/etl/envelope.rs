//! Envelopes carry decoded log bodies from decoders to sinks.

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Type identifier derived from a stable string name (e.g. "erc721.transfer").
///
/// Sinks compare envelope type ids against the ones they registered interest in
/// and downcast the body only on a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvelopeTypeId(u64);

impl EnvelopeTypeId {
    pub fn new(type_name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        type_name.hash(&mut hasher);
        EnvelopeTypeId(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

pub type TypeId = EnvelopeTypeId;

/// Trait for typed envelope bodies.
pub trait TypedBody: Send + Sync {
    fn envelope_type_id(&self) -> TypeId;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A decoded log travelling through the pipeline.
pub struct Envelope {
    /// Identifier of the source log, `<tx_hash>-<log_index>` when both are known
    pub id: String,

    pub type_id: TypeId,

    /// Decoded body, downcast by sinks
    pub body: Box<dyn TypedBody>,

    /// Source log fields (block number, tx hash, emitting contract) as strings
    pub metadata: HashMap<String, String>,

    /// Unix time at which the envelope was built
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(id: String, body: Box<dyn TypedBody>, metadata: HashMap<String, String>) -> Self {
        let type_id = body.envelope_type_id();
        Self {
            id,
            type_id,
            body,
            metadata,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.body.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.body.as_any_mut().downcast_mut::<T>()
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("type_id", &self.type_id)
            .field("metadata", &self.metadata)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
