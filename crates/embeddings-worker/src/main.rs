mod chunker;
mod handler;
mod job_processor;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pipeline_core::backoff::ExponentialBackoff;
use pipeline_core::blob_store::LocalBlobStore;
use pipeline_core::config::PipelineConfig;
use pipeline_core::external::OpenAiClient;
use pipeline_core::job_claimer::JobClaimer;
use pipeline_core::queue::PgQueue;
use pipeline_core::vector_index::PgVectorIndex;
use pipeline_core::worker::WorkerRuntime;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use handler::EmbeddingsHandler;
use job_processor::JobProcessor;

const QUEUE_NAME: &str = "embeddings";
const VECTOR_TABLE: &str = "grievance_embeddings";
const JOB_TABLE: &str = "embedding_jobs";
const GRIEVANCE_TABLE: &str = "grievances";

/// No subcommands; reads configuration from the environment (§6 "CLI surface").
#[derive(Parser, Debug)]
#[command(name = "embeddings-worker")]
struct Args {
    /// Drain the queue's current backlog once and exit, instead of polling forever.
    #[arg(long, env = "EMBEDDINGS_WORKER_ONCE")]
    once: bool,

    /// Restrict processing to a single job id; other messages are left for their lease to expire.
    #[arg(long, env = "EMBEDDINGS_WORKER_TARGET_ID")]
    target_id: Option<Uuid>,
}

async fn connect_with_retry(database_url: &str) -> sqlx::PgPool {
    let mut backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(30), 10);
    loop {
        match PgPoolOptions::new().max_connections(10).connect(database_url).await {
            Ok(pool) => return pool,
            Err(err) => match backoff.next_delay() {
                Some(delay) => {
                    error!(%err, "database connection failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => panic!("could not connect to database after retrying: {err}"),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = PipelineConfig::from_env()?;
    let pool = connect_with_retry(&config.database_url).await;
    let queue = Arc::new(PgQueue::new(pool.clone()));
    let blob_store = Arc::new(LocalBlobStore::new(&config.blob_base_dir));
    let vector_index = Arc::new(PgVectorIndex::new(pool.clone(), VECTOR_TABLE));

    let embedder: Arc<dyn pipeline_core::external::Embedder> = match OpenAiClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(%err, "no embedding credentials configured");
            return Err(err.into());
        }
    };

    let handler = Arc::new(EmbeddingsHandler {
        embedder: embedder.clone(),
        vector_index,
        blob_store,
        chunk_size: config.chunk_size,
        chunk_overlap: config.chunk_overlap,
    });

    let job_processor = JobProcessor {
        claimer: JobClaimer::new(pool.clone(), JOB_TABLE),
        pool,
        embedder,
        grievance_table: GRIEVANCE_TABLE.to_string(),
        batch_size: config.batch_size as i64,
        requeue_stuck_after_sec: config.requeue_stuck_after_sec,
        requeue_failed_after_sec: config.requeue_failed_after_sec,
    };

    let runtime = WorkerRuntime::new(queue, QUEUE_NAME, config.visibility_timeout(), config.poll_interval());

    if args.once {
        info!(queue = QUEUE_NAME, "embeddings-worker running a single pass");
        job_processor.run_once().await;
        runtime.run_once(handler, args.target_id).await?;
        return Ok(());
    }

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    info!(queue = QUEUE_NAME, "embeddings-worker starting");
    tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { job_processor.run(config.poll_interval(), shutdown_rx).await }
    });
    runtime.run(handler, shutdown_rx).await?;
    Ok(())
}
