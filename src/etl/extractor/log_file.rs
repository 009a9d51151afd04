//! Extractor replaying logs from a JSON-lines file.
//!
//! Each non-empty line holds one log with its enclosing transaction and,
//! optionally, its block:
//!
//! ```json
//! {"log": {"address": "0x…", "topics": […], "data": "0x", "blockNumber": 1, "transactionHash": "0x…", "logIndex": 0},
//!  "transaction": {"hash": "0x…", "from": "0x…", "to": "0x…", "value": "0x0"},
//!  "block": {"number": 1, "timestamp": 1700000000}}
//! ```
//!
//! The cursor is the number of lines consumed. It is persisted in the engine
//! database on commit so a restart resumes after the last committed batch.
//!
//! A line that does not parse as a record is logged and skipped. A read
//! failure drops the open reader, so the next call reopens the file at the
//! cursor it is given and nothing read before the failure is lost.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::etl::engine_db::EngineDb;
use crate::etl::event::EvmLog;

use super::{BlockContext, ExtractionBatch, Extractor, TransactionContext};

const EXTRACTOR_TYPE: &str = "log_file";
const CURSOR_KEY: &str = "cursor";

#[derive(Debug, Deserialize)]
struct LogRecord {
    log: EvmLog,
    #[serde(default)]
    transaction: Option<TransactionContext>,
    #[serde(default)]
    block: Option<BlockContext>,
}

pub struct LogFileExtractor {
    path: PathBuf,
    batch_size: usize,
    reader: Option<Lines<BufReader<File>>>,
    /// Lines consumed so far (blank lines included)
    line: u64,
    /// Position of the last log handed out, for the ordering check
    last_position: Option<(u64, u64)>,
    exhausted: bool,
    /// Lines skipped because they did not parse
    malformed: u64,
    /// Set when the file violates chain ordering; the extractor stops for good
    halted: Option<String>,
}

impl LogFileExtractor {
    pub fn new(path: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            path: path.into(),
            batch_size: batch_size.max(1),
            reader: None,
            line: 0,
            last_position: None,
            exhausted: false,
            malformed: 0,
            halted: None,
        }
    }

    pub fn malformed_lines(&self) -> u64 {
        self.malformed
    }

    /// Open the file and skip the lines covered by `start`.
    async fn open(&mut self, start: u64) -> Result<()> {
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open log file {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let mut skipped = 0;
        while skipped < start {
            if lines.next_line().await?.is_none() {
                break;
            }
            skipped += 1;
        }

        tracing::info!(
            target: "coven::etl::log_file_extractor",
            path = %self.path.display(),
            resume_line = skipped,
            "Opened log file"
        );

        self.line = skipped;
        self.last_position = None;
        self.exhausted = false;
        self.reader = Some(lines);
        Ok(())
    }

    fn check_order(&mut self, log: &EvmLog) -> Result<()> {
        let Some(position) = log.position() else {
            return Ok(());
        };

        if let Some(last) = self.last_position {
            if position < last {
                let message = format!(
                    "Log {} at line {} is out of chain order: ({}, {}) follows ({}, {})",
                    log.id(),
                    self.line,
                    position.0,
                    position.1,
                    last.0,
                    last.1
                );
                self.halted = Some(message.clone());
                anyhow::bail!(message);
            }
        }

        self.last_position = Some(position);
        Ok(())
    }
}

#[async_trait]
impl Extractor for LogFileExtractor {
    fn is_finished(&self) -> bool {
        self.exhausted || self.halted.is_some()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn extract(&mut self, cursor: Option<String>, engine_db: &EngineDb) -> Result<ExtractionBatch> {
        if let Some(reason) = &self.halted {
            anyhow::bail!("Log file extractor halted: {reason}");
        }

        if self.reader.is_none() {
            let saved = match cursor {
                Some(c) => Some(c),
                None => engine_db.get_extractor_state(EXTRACTOR_TYPE, CURSOR_KEY).await?,
            };
            let start = saved
                .map(|c| c.parse::<u64>().context("Invalid log file cursor"))
                .transpose()?
                .unwrap_or(0);
            self.open(start).await?;
        }

        let mut batch = ExtractionBatch::empty();
        let mut blocks: HashMap<u64, BlockContext> = HashMap::new();

        while batch.events.len() < self.batch_size {
            let Some(reader) = self.reader.as_mut() else {
                break;
            };
            let next = match reader.next_line().await {
                Ok(next) => next,
                Err(e) => {
                    self.reader = None;
                    return Err(anyhow::Error::new(e).context(format!(
                        "Failed to read log file {} after line {}",
                        self.path.display(),
                        self.line
                    )));
                }
            };
            let Some(line) = next else {
                self.exhausted = true;
                break;
            };
            self.line += 1;

            if line.trim().is_empty() {
                continue;
            }

            let record: LogRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    self.malformed += 1;
                    tracing::warn!(
                        target: "coven::etl::log_file_extractor",
                        line = self.line,
                        error = %e,
                        "Skipping malformed log record"
                    );
                    continue;
                }
            };

            self.check_order(&record.log)?;

            if let Some(tx) = record.transaction {
                batch.transactions.entry(tx.hash).or_insert(tx);
            }
            if let Some(block) = record.block {
                blocks.entry(block.number).or_insert(block);
            }
            batch.events.push(record.log);
        }

        batch.blocks = blocks;
        batch.cursor = Some(self.line.to_string());

        if !batch.is_empty() {
            tracing::debug!(
                target: "coven::etl::log_file_extractor",
                "Read {} logs ({} transactions), cursor at line {}",
                batch.len(),
                batch.transactions.len(),
                self.line
            );
        }

        Ok(batch)
    }

    async fn commit_cursor(&mut self, cursor: &str, engine_db: &EngineDb) -> Result<()> {
        engine_db
            .set_extractor_state(EXTRACTOR_TYPE, CURSOR_KEY, cursor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::engine_db::EngineDbConfig;
    use std::io::Write;

    fn line(block: u64, log_index: u64, tx: u64) -> String {
        format!(
            r#"{{"log": {{"address": "0x5180db8f5c931aae63c74266b211f580155ecac8", "topics": [], "data": "0x", "blockNumber": {block}, "transactionHash": "0x{tx:064x}", "logIndex": {log_index}}}, "transaction": {{"hash": "0x{tx:064x}", "blockNumber": {block}, "from": "0x00000000000000000000000000000000000000aa", "to": null, "value": "0x0"}}, "block": {{"number": {block}, "timestamp": 1700000000}}}}"#
        )
    }

    fn write_file(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for l in lines {
            writeln!(file, "{l}").unwrap();
        }
        file
    }

    async fn memory_db() -> EngineDb {
        EngineDb::new(EngineDbConfig {
            path: ":memory:".to_string(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_reads_in_batches_and_finishes() {
        let file = write_file(&[line(1, 0, 1), line(1, 1, 1), String::new(), line(2, 0, 2)]);
        let db = memory_db().await;
        let mut extractor = LogFileExtractor::new(file.path(), 2);

        let first = extractor.extract(None, &db).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.transactions.len(), 1);
        assert_eq!(first.cursor.as_deref(), Some("2"));
        assert!(!extractor.is_finished());

        let second = extractor.extract(first.cursor.clone(), &db).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(extractor.is_finished());
        assert_eq!(second.cursor.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn test_resumes_from_committed_cursor() {
        let file = write_file(&[line(1, 0, 1), line(2, 0, 2), line(3, 0, 3)]);
        let db = memory_db().await;

        let mut extractor = LogFileExtractor::new(file.path(), 2);
        let batch = extractor.extract(None, &db).await.unwrap();
        extractor.commit_cursor(batch.cursor.as_deref().unwrap(), &db).await.unwrap();

        let mut restarted = LogFileExtractor::new(file.path(), 10);
        let batch = restarted.extract(None, &db).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.events[0].block_number, Some(3));
    }

    #[tokio::test]
    async fn test_out_of_order_log_halts() {
        let file = write_file(&[line(5, 1, 1), line(5, 0, 2)]);
        let db = memory_db().await;
        let mut extractor = LogFileExtractor::new(file.path(), 10);

        assert!(extractor.extract(None, &db).await.is_err());
        assert!(extractor.is_finished());
        assert!(extractor.extract(None, &db).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped_without_losing_neighbours() {
        let file = write_file(&[line(1, 0, 1), "{not json".to_string(), line(2, 0, 2)]);
        let db = memory_db().await;
        let mut extractor = LogFileExtractor::new(file.path(), 10);

        let batch = extractor.extract(None, &db).await.unwrap();
        let blocks: Vec<_> = batch.events.iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, vec![Some(1), Some(2)]);
        assert_eq!(batch.cursor.as_deref(), Some("3"));
        assert_eq!(extractor.malformed_lines(), 1);
        assert!(extractor.is_finished());
    }

    #[tokio::test]
    async fn test_read_failure_reopens_at_given_cursor() {
        let file = write_file(&[line(1, 0, 1), line(2, 0, 2), line(3, 0, 3)]);
        let db = memory_db().await;
        let mut extractor = LogFileExtractor::new(file.path(), 1);

        let first = extractor.extract(None, &db).await.unwrap();
        assert_eq!(first.events[0].block_number, Some(1));
        let _ = extractor.extract(first.cursor.clone(), &db).await.unwrap();

        // Dropping the reader (as a read failure does) replays from the cursor.
        extractor.reader = None;
        let replay = extractor.extract(first.cursor.clone(), &db).await.unwrap();
        assert_eq!(replay.events[0].block_number, Some(2));
        assert_eq!(replay.cursor.as_deref(), Some("2"));
    }
}
