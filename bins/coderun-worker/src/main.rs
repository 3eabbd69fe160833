mod executor;
mod runtime;

use anyhow::Context;
use coderun_common::broker;
use coderun_common::config::{Config, LogFormat};
use coderun_common::types::{Job, JobState};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use crate::runtime::{ContainerRuntime, DockerRuntime};

/// BLPOP wait; bounds how long a loop goes without checking for shutdown
const POLL_TIMEOUT_SECS: f64 = 5.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    init_tracing(config.log_format);
    config.validate()?;

    info!("coderun worker booting...");

    let runtime = DockerRuntime::connect(&config.docker_socket, config.docker_api_version()?)?;
    runtime.ping().await?;
    info!(
        socket = %config.docker_socket,
        api_version = config.docker_api_version.as_deref().unwrap_or("default"),
        "Connected to Docker"
    );
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);

    let client = redis::Client::open(config.redis_url.as_str())
        .with_context(|| format!("invalid REDIS_URL {}", config.redis_url))?;

    let mut loops = tokio::task::JoinSet::new();
    for worker_id in 0..config.worker_concurrency {
        // each loop gets its own connection: BLPOP holds it for the whole wait
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("failed to connect to Redis")?;
        loops.spawn(worker_loop(worker_id, conn, Arc::clone(&runtime)));
    }

    info!(
        concurrency = config.worker_concurrency,
        "Listening for jobs on queue: {}",
        broker::QUEUE_KEY
    );

    tokio::select! {
        _ = loops.join_next() => {
            warn!("A worker loop exited unexpectedly");
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for CTRL+C: {}", e);
            }
            info!("Received shutdown signal, stopping workers...");
        }
    }

    loops.shutdown().await;
    info!("Worker shutdown complete");
    Ok(())
}

async fn worker_loop(worker_id: usize, mut conn: ConnectionManager, runtime: Arc<dyn ContainerRuntime>) {
    loop {
        match broker::pop_job(&mut conn, POLL_TIMEOUT_SECS).await {
            Ok(Some(job)) => {
                info!(
                    worker_id,
                    job_id = %job.id,
                    tasks = job.tasks.len(),
                    "Received job"
                );
                process_job(&mut conn, job, runtime.as_ref()).await;
            }
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, "Broker error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}

async fn process_job(conn: &mut ConnectionManager, mut job: Job, runtime: &dyn ContainerRuntime) {
    for state in [JobState::Scheduled, JobState::Running] {
        job.state = state;
        publish(conn, &job).await;
    }

    let job = executor::execute_job(job, runtime).await;
    publish(conn, &job).await;
}

/// Publish a state change; a lost event only means the API waits out its timeout
async fn publish(conn: &mut ConnectionManager, job: &Job) {
    if let Err(e) = broker::publish_event(conn, job).await {
        error!(job_id = %job.id, state = %job.state, "Failed to publish job event: {}", e);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
