//! Replay command - run a JSON-lines file through the pipeline offline
//!
//! Uses an in-memory log, offset store and sink, so thresholds and window
//! settings can be checked without a broker or Elasticsearch.

use anyhow::{bail, Context};
use clap::Args;
use colored::Colorize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use txn_processor::config::{PipelineConfig, StartingOffset};
use txn_processor::enrichment::StaticLocationLookup;
use txn_processor::pipeline::{BatchOutcome, PartitionPipeline, PartitionStats, PipelineResources};
use txn_processor::sink::{IndexKind, MemorySink, SinkDocument};
use txn_processor::source::MemoryLog;
use txn_processor::state::InMemoryOffsetStore;
use txn_stream_config::AppConfig;

const REPLAY_PARTITION: i32 = 0;

#[derive(Args, Debug, Clone)]
pub struct ReplayCommand {
    /// JSON-lines file, one transaction event per line
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Only print documents for this index
    #[arg(long, value_name = "INDEX", value_parser = parse_index)]
    pub index: Option<IndexKind>,

    /// Print the summary only
    #[arg(long)]
    pub summary_only: bool,
}

fn parse_index(value: &str) -> Result<IndexKind, String> {
    IndexKind::ALL
        .iter()
        .copied()
        .find(|kind| kind.as_str() == value)
        .ok_or_else(|| {
            let names: Vec<&str> = IndexKind::ALL.iter().map(|k| k.as_str()).collect();
            format!("unknown index '{}', expected one of: {}", value, names.join(", "))
        })
}

impl ReplayCommand {
    pub async fn execute(&self, config: AppConfig) -> anyhow::Result<()> {
        let mut pipeline_config = config.pipeline_config();
        pipeline_config.batch.poll_timeout_ms = 0;

        let (documents, stats) = replay_file(pipeline_config, &self.input).await?;

        if !self.summary_only {
            for doc in documents
                .iter()
                .filter(|doc| self.index.map_or(true, |index| doc.index == index))
            {
                println!(
                    "{}",
                    json!({ "index": doc.index, "id": doc.id, "document": doc.body })
                );
            }
        }

        eprintln!("{}", "Replay summary".bold().cyan());
        eprintln!("  Records:         {}", stats.records_polled);
        eprintln!("  Malformed:       {}", stats.records_malformed);
        eprintln!("  Filtered:        {}", stats.events_filtered);
        eprintln!("  Duplicates:      {}", stats.events_duplicate);
        eprintln!("  Late (windows):  {}", stats.events_late_dropped);
        eprintln!("  Alerts:          {}", stats.alerts_emitted.to_string().yellow());
        eprintln!("  Windows closed:  {}", stats.windows_closed);
        eprintln!("  Documents:       {}", documents.len());
        Ok(())
    }
}

/// Process every line of `path` and return the resulting sink contents
pub async fn replay_file(
    config: PipelineConfig,
    path: &Path,
) -> anyhow::Result<(Vec<SinkDocument>, PartitionStats)> {
    let log = Arc::new(MemoryLog::with_partitions(&[REPLAY_PARTITION]));
    log.load_jsonl(REPLAY_PARTITION, path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let sink = Arc::new(MemorySink::new());
    let resources = PipelineResources {
        log,
        store: Arc::new(InMemoryOffsetStore::new()),
        sink: sink.clone(),
        lookup: Arc::new(StaticLocationLookup::default()),
        metrics: None,
    };

    let mut pipeline =
        PartitionPipeline::open(REPLAY_PARTITION, config, StartingOffset::Earliest, resources)
            .await?;
    loop {
        match pipeline.step().await? {
            BatchOutcome::Committed(_) => {}
            BatchOutcome::Idle => break,
            BatchOutcome::RolledBack { error } => bail!("in-memory sink rejected batch: {}", error),
        }
    }

    Ok((sink.snapshot(), pipeline.stats().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("alerts").unwrap(), IndexKind::Alerts);
        assert_eq!(parse_index("user-totals").unwrap(), IndexKind::UserTotals);
        assert!(parse_index("bogus").is_err());
    }

    #[tokio::test]
    async fn test_replay_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"transactionId":"t1","userId":"u1","transactionAmount":1500,"ipAddress":"1.1.1.1","timestamp":"2024-01-01T00:00:00Z"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"transactionId":"t2","userId":"u1","transactionAmount":15000,"ipAddress":"1.1.1.1","timestamp":"2024-01-01T00:00:05Z"}}"#
        )
        .unwrap();
        writeln!(file, "garbage").unwrap();

        let mut config = PipelineConfig::default();
        config.batch.poll_timeout_ms = 0;
        let (documents, stats) = replay_file(config, file.path()).await.unwrap();

        assert_eq!(stats.records_polled, 3);
        assert_eq!(stats.records_malformed, 1);
        assert_eq!(stats.alerts_emitted, 1);
        // Two transactions, one alert, one user total
        assert_eq!(documents.len(), 4);
        assert!(documents
            .iter()
            .any(|doc| doc.index == IndexKind::Alerts && doc.id == "t2"));
    }
}
