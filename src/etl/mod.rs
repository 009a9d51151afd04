pub mod decoder;
pub mod engine_db;
pub mod envelope;
pub mod event;
pub mod extractor;
pub mod sink;

pub use decoder::{ContractFilter, Decoder, DecoderContext, DecoderId};
pub use engine_db::{EngineDb, EngineDbConfig, EngineStats};
pub use envelope::{Envelope, TypeId, TypedBody};
pub use event::EvmLog;
pub use extractor::{
    BlockContext, ExtractionBatch, Extractor, LogFileExtractor, SampleExtractor, TransactionContext,
};
pub use sink::{MultiSink, Sink, SinkContext};
