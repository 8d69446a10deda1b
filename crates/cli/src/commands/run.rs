//! Run command - consume from Kafka and upsert into Elasticsearch

use anyhow::{bail, Context};
use clap::Args;
use colored::Colorize;
use std::collections::BTreeMap;
use txn_processor::pipeline::PartitionStatus;
use txn_stream_config::AppConfig;

#[derive(Args, Debug, Clone)]
pub struct RunCommand {
    /// Override the configured partitions (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    pub partitions: Option<Vec<i32>>,
}

impl RunCommand {
    pub async fn execute(&self, mut config: AppConfig) -> anyhow::Result<()> {
        if let Some(partitions) = &self.partitions {
            config.source.partitions = partitions.clone();
        }
        config.validate()?;

        let statuses = run_pipeline(config).await?;
        print_statuses(&statuses);

        let halted: Vec<i32> = statuses
            .iter()
            .filter(|(_, status)| status.is_halted())
            .map(|(partition, _)| *partition)
            .collect();
        if !halted.is_empty() {
            bail!("partitions halted: {:?}", halted);
        }
        Ok(())
    }
}

#[cfg(not(feature = "kafka"))]
async fn run_pipeline(_config: AppConfig) -> anyhow::Result<BTreeMap<i32, PartitionStatus>> {
    bail!("built without Kafka support; rebuild with --features kafka")
}

#[cfg(feature = "kafka")]
async fn run_pipeline(config: AppConfig) -> anyhow::Result<BTreeMap<i32, PartitionStatus>> {
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tracing::{error, info};
    use txn_processor::enrichment::StaticLocationLookup;
    use txn_processor::metrics::{MetricsRegistry, MetricsServer, PipelineMetrics};
    use txn_processor::pipeline::{PipelineResources, PipelineRunner};
    use txn_processor::sink::ElasticsearchSink;
    use txn_processor::source::{KafkaPartitionLog, KafkaSourceConfig};
    use txn_processor::state::FileOffsetStore;

    let source = &config.source;
    let log = KafkaPartitionLog::new(
        KafkaSourceConfig {
            brokers: source.brokers.clone(),
            topic: source.topic.clone(),
            group_id: source.group_id.clone(),
            metadata_timeout_ms: 5000,
            extra_config: Default::default(),
        },
        &source.partitions,
    )
    .context("creating Kafka consumer")?;
    let store = FileOffsetStore::open(&config.checkpoint.dir)
        .await
        .with_context(|| format!("opening checkpoint directory {}", config.checkpoint.dir.display()))?;
    let sink = ElasticsearchSink::new(config.sink.clone()).context("creating Elasticsearch client")?;

    let registry = MetricsRegistry::new();
    let resources = PipelineResources {
        log: Arc::new(log),
        store: Arc::new(store),
        sink: Arc::new(sink),
        lookup: Arc::new(StaticLocationLookup::default()),
        metrics: Some(PipelineMetrics::new(&registry)),
    };

    let mut runner = PipelineRunner::new(config.pipeline_config(), config.runner_config(), resources);

    let server_token = CancellationToken::new();
    let server_handle = match &config.observability.metrics {
        Some(metrics_config) => {
            let server = MetricsServer::new(metrics_config.clone(), registry.clone());
            runner = runner.with_ready_flag(server.ready_flag());
            info!(address = %metrics_config.address(), "starting metrics server");
            let token = server_token.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = server.serve(token).await {
                    error!(error = %e, "metrics server failed");
                }
            }))
        }
        None => None,
    };

    let shutdown = runner.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested, draining partitions");
        shutdown.cancel();
    });

    info!(
        topic = %config.source.topic,
        partitions = ?config.source.partitions,
        "starting pipeline"
    );
    let result = runner.run().await;

    server_token.cancel();
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    Ok(result?)
}

#[cfg(feature = "kafka")]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_statuses(statuses: &BTreeMap<i32, PartitionStatus>) {
    eprintln!("{}", "Partition status".bold().cyan());
    for (partition, status) in statuses {
        match status {
            PartitionStatus::Stopped(stats) => eprintln!(
                "  {:>3}  {}  committed={:?} accepted={} alerts={}",
                partition,
                "stopped".green(),
                stats.committed_offset,
                stats.events_accepted(),
                stats.alerts_emitted,
            ),
            PartitionStatus::Halted { reason, stats } => eprintln!(
                "  {:>3}  {}  committed={:?} reason={}",
                partition,
                "halted".red().bold(),
                stats.committed_offset,
                reason,
            ),
            PartitionStatus::Aborted => {
                eprintln!("  {:>3}  {}", partition, "aborted".yellow())
            }
        }
    }
}
