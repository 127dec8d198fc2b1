use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use questline::config::AppConfig;
use questline::llm::{ModelRegistry, ModelRunner, ModelSource, build_adapters};
use questline::pipeline::{
    DECOMPOSE_QUEUE, DecomposeProcessor, INVESTIGATE_QUEUE, InvestigateProcessor, Job,
};
use questline::queue::{JobQueues, spawn_consumer};
use questline::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let _log_guard = init_tracing(&config);

    eprintln!("🧭 Questline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .context("opening database")?,
    );

    let registry = Arc::new(
        ModelRegistry::load(&ModelSource {
            inline: config.models_json.clone(),
            file: config.models_file.clone(),
        })
        .context("loading model registry")?,
    );
    eprintln!(
        "   Models: {} enabled, default {}",
        registry.enabled().count(),
        registry.default_model().id
    );

    let adapters = build_adapters(&config).context("building provider adapters")?;
    let runner = Arc::new(ModelRunner::new(registry, adapters));

    let decompose = Arc::new(DecomposeProcessor::new(Arc::clone(&runner), Arc::clone(&db)));
    let investigate = Arc::new(InvestigateProcessor::new(runner, Arc::clone(&db)));

    let (queues, receivers) = JobQueues::new(config.queue_capacity);
    let consumers = [
        spawn_consumer(
            DECOMPOSE_QUEUE,
            receivers.decompose,
            decompose,
            config.decompose_concurrency,
        ),
        spawn_consumer(
            INVESTIGATE_QUEUE,
            receivers.investigate,
            investigate,
            config.investigate_concurrency,
        ),
    ];

    eprintln!("   Reading jobs from stdin (one JSON object per line). Ctrl-C to stop.\n");

    tokio::select! {
        result = read_jobs(&queues) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping");
            return Ok(());
        }
    }

    // Closing the queues lets consumers finish in-flight work and exit.
    drop(queues);
    tokio::select! {
        _ = join_consumers(consumers) => tracing::info!("All queues drained"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted while draining"),
    }
    Ok(())
}

/// Local producer: newline-delimited `Job` JSON until EOF.
async fn read_jobs(queues: &JobQueues) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0usize;

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Job>(line) {
            Ok(job) => {
                queues.enqueue(&job).await?;
                accepted += 1;
            }
            Err(e) => tracing::warn!(error = %e, "Skipping malformed job line"),
        }
    }

    tracing::info!(accepted, "Input closed");
    Ok(())
}

async fn join_consumers(handles: [tokio::task::JoinHandle<()>; 2]) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Queue consumer task failed");
        }
    }
}

/// Stderr logging, plus a daily rolling file when a log directory is set.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "questline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}
