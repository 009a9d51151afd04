pub mod multi;

use async_trait::async_trait;
use std::path::PathBuf;

use super::envelope::{Envelope, TypeId};
use super::extractor::ExtractionBatch;

pub use multi::MultiSink;

/// Context handed to sinks at startup
#[derive(Debug, Clone)]
pub struct SinkContext {
    /// Root directory for sink databases
    pub database_root: PathBuf,
}

/// Sink trait - consumes decoded envelopes.
///
/// `process` receives every envelope of the batch in log order together with
/// the batch itself, so transaction and block context is an O(1) lookup:
///
/// ```rust,ignore
/// async fn process(&self, envelopes: &[Envelope], batch: &ExtractionBatch) -> Result<()> {
///     for envelope in envelopes {
///         let Some(transfer) = envelope.downcast_ref::<NftTransfer>() else { continue };
///         let tx = transfer.transaction_hash.and_then(|h| batch.transactions.get(&h));
///         let block = batch.blocks.get(&transfer.block_number);
///     }
///     Ok(())
/// }
/// ```
///
/// An `Err` means the batch was not (fully) applied: the loop does not
/// commit the extractor cursor and the batch will be delivered again, so a
/// sink must tolerate re-delivery of envelopes it already applied.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Type IDs this sink consumes
    fn interested_types(&self) -> Vec<TypeId>;

    async fn process(&self, envelopes: &[Envelope], batch: &ExtractionBatch) -> anyhow::Result<()>;

    /// Called once before the ETL loop starts.
    async fn initialize(&mut self, _context: &SinkContext) -> anyhow::Result<()> {
        Ok(())
    }
}
