//! MultiSink runs multiple sinks in sequence.
//!
//! Every sink sees the same envelopes and filters by `TypeId` itself. All
//! sinks run even when one fails; the first failure is returned so the batch
//! is retried.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Sink, SinkContext};
use crate::etl::envelope::{Envelope, TypeId};
use crate::etl::extractor::ExtractionBatch;

pub struct MultiSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn sinks(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }
}

#[async_trait]
impl Sink for MultiSink {
    fn name(&self) -> &'static str {
        "multi"
    }

    fn interested_types(&self) -> Vec<TypeId> {
        self.sinks.iter().flat_map(|s| s.interested_types()).collect()
    }

    async fn process(&self, envelopes: &[Envelope], batch: &ExtractionBatch) -> anyhow::Result<()> {
        let mut first_error = None;

        for sink in &self.sinks {
            if let Err(e) = sink.process(envelopes, batch).await {
                tracing::error!(
                    target: "coven::etl::multi_sink",
                    "Sink '{}' failed: {}",
                    sink.name(),
                    e
                );
                if first_error.is_none() {
                    first_error = Some(e.context(format!("sink '{}' failed", sink.name())));
                }
            }
        }

        tracing::debug!(
            target: "coven::etl::multi_sink",
            "Processed {} envelopes across {} sinks",
            envelopes.len(),
            self.sinks.len()
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn initialize(&mut self, _context: &SinkContext) -> anyhow::Result<()> {
        // Sinks are initialized individually before being shared
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Sink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        fn interested_types(&self) -> Vec<TypeId> {
            vec![TypeId::new("test.count")]
        }

        async fn process(&self, _envelopes: &[Envelope], _batch: &ExtractionBatch) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_is_reported_after_all_sinks_ran() {
        let failing = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let healthy = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let multi = MultiSink::new(vec![failing.clone(), healthy.clone()]);

        let result = multi.process(&[], &ExtractionBatch::empty()).await;

        assert!(result.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
        assert_eq!(multi.interested_types().len(), 2);
    }
}
