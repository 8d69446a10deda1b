//! Multi-partition runtime
//!
//! Spawns one worker task per partition and coordinates shutdown.

use super::partition::{PartitionPipeline, PipelineResources};
use super::stats::PartitionStats;
use crate::config::{PipelineConfig, RunnerConfig};
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// How a partition worker ended
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionStatus {
    /// Stopped cleanly after shutdown was requested
    Stopped(PartitionStats),
    /// Stopped on a fatal error; the offset was not advanced past it
    Halted {
        reason: String,
        stats: PartitionStats,
    },
    /// Did not stop within the shutdown timeout, or panicked
    Aborted,
}

impl PartitionStatus {
    pub fn is_halted(&self) -> bool {
        matches!(self, PartitionStatus::Halted { .. })
    }

    pub fn stats(&self) -> Option<&PartitionStats> {
        match self {
            PartitionStatus::Stopped(stats) | PartitionStatus::Halted { stats, .. } => Some(stats),
            PartitionStatus::Aborted => None,
        }
    }
}

/// Runs one [`PartitionPipeline`] per configured partition
pub struct PipelineRunner {
    pipeline_config: PipelineConfig,
    runner_config: RunnerConfig,
    resources: PipelineResources,
    shutdown: CancellationToken,
    ready: Option<Arc<AtomicBool>>,
}

impl PipelineRunner {
    pub fn new(
        pipeline_config: PipelineConfig,
        runner_config: RunnerConfig,
        resources: PipelineResources,
    ) -> Self {
        Self {
            pipeline_config,
            runner_config,
            resources,
            shutdown: CancellationToken::new(),
            ready: None,
        }
    }

    /// Flag set while every worker is running
    pub fn with_ready_flag(mut self, ready: Arc<AtomicBool>) -> Self {
        self.ready = Some(ready);
        self
    }

    /// Token that stops all workers when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn set_ready(&self, ready: bool) {
        if let Some(flag) = &self.ready {
            flag.store(ready, Ordering::Release);
        }
    }

    /// Open every partition, run the workers and wait for them to finish.
    ///
    /// Workers stop when the shutdown token is cancelled; any still running
    /// after `shutdown_timeout_ms` are aborted. A failure to open a partition
    /// fails the whole run before any worker starts.
    pub async fn run(self) -> Result<BTreeMap<i32, PartitionStatus>> {
        self.runner_config.validate()?;
        self.pipeline_config.validate()?;

        let mut pipelines = Vec::with_capacity(self.runner_config.partitions.len());
        for &partition in &self.runner_config.partitions {
            let pipeline = PartitionPipeline::open(
                partition,
                self.pipeline_config.clone(),
                self.runner_config.starting_offset,
                self.resources.clone(),
            )
            .instrument(info_span!("partition", id = partition))
            .await?;
            pipelines.push(pipeline);
        }

        let mut workers = JoinSet::new();
        for mut pipeline in pipelines {
            let partition = pipeline.partition();
            let shutdown = self.shutdown.clone();
            workers.spawn(
                async move {
                    let status = match pipeline.run(shutdown).await {
                        Ok(stats) => PartitionStatus::Stopped(stats),
                        Err(e) => PartitionStatus::Halted {
                            reason: e.to_string(),
                            stats: pipeline.stats().clone(),
                        },
                    };
                    (partition, status)
                }
                .instrument(info_span!("partition", id = partition)),
            );
        }
        self.set_ready(true);
        info!(partitions = ?self.runner_config.partitions, "Pipeline workers started");

        let mut statuses = BTreeMap::new();
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(joined) => record(&mut statuses, joined),
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
            }
        }

        if !workers.is_empty() {
            let timeout = self.runner_config.shutdown_timeout();
            info!(
                remaining = workers.len(),
                ?timeout,
                "Shutdown requested, waiting for in-flight batches"
            );
            let deadline = Instant::now() + timeout;
            loop {
                match tokio::time::timeout_at(deadline, workers.join_next()).await {
                    Ok(Some(joined)) => record(&mut statuses, joined),
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            remaining = workers.len(),
                            "Shutdown timeout elapsed, aborting workers"
                        );
                        workers.abort_all();
                        while let Some(joined) = workers.join_next().await {
                            record(&mut statuses, joined);
                        }
                        break;
                    }
                }
            }
        }
        self.set_ready(false);

        for &partition in &self.runner_config.partitions {
            statuses.entry(partition).or_insert(PartitionStatus::Aborted);
        }

        let halted = statuses.values().filter(|s| s.is_halted()).count();
        info!(
            partitions = statuses.len(),
            halted, "Pipeline workers finished"
        );
        Ok(statuses)
    }
}

fn record(
    statuses: &mut BTreeMap<i32, PartitionStatus>,
    joined: std::result::Result<(i32, PartitionStatus), tokio::task::JoinError>,
) {
    match joined {
        Ok((partition, status)) => {
            statuses.insert(partition, status);
        }
        Err(e) if e.is_panic() => error!(error = %e, "Partition worker panicked"),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::StaticLocationLookup;
    use crate::sink::MemorySink;
    use crate::source::MemoryLog;
    use crate::state::InMemoryOffsetStore;
    use std::time::Duration;

    fn resources(log: Arc<MemoryLog>, store: Arc<InMemoryOffsetStore>) -> PipelineResources {
        PipelineResources {
            log,
            store,
            sink: Arc::new(MemorySink::new()),
            lookup: Arc::new(StaticLocationLookup::default()),
            metrics: None,
        }
    }

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.batch.poll_timeout_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_unknown_partition_fails_startup() {
        let log = Arc::new(MemoryLog::with_partitions(&[0]));
        let store = Arc::new(InMemoryOffsetStore::new());
        let runner = PipelineRunner::new(
            fast_config(),
            RunnerConfig::new(vec![0, 5]),
            resources(log, store),
        );

        assert!(runner.run().await.is_err());
    }

    #[tokio::test]
    async fn test_runner_stops_all_partitions() {
        let log = Arc::new(MemoryLog::with_partitions(&[0, 1]));
        let store = Arc::new(InMemoryOffsetStore::new());
        let ready = Arc::new(AtomicBool::new(false));

        let runner = PipelineRunner::new(
            fast_config(),
            RunnerConfig::new(vec![0, 1]),
            resources(log, store),
        )
        .with_ready_flag(ready.clone());
        let shutdown = runner.shutdown_token();
        let handle = tokio::spawn(runner.run());

        for _ in 0..100 {
            if ready.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(ready.load(Ordering::Acquire));
        shutdown.cancel();

        let statuses = handle.await.unwrap().unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .values()
            .all(|status| matches!(status, PartitionStatus::Stopped(_))));
        assert!(!ready.load(Ordering::Acquire));
    }
}
