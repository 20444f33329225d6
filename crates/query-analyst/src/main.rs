mod department;
mod handler;
mod types;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pipeline_core::backoff::ExponentialBackoff;
use pipeline_core::blob_store::LocalBlobStore;
use pipeline_core::config::PipelineConfig;
use pipeline_core::external::{MarkdownReportRenderer, NullVisionService, NullWebSearchService, OpenAiClient};
use pipeline_core::queue::PgQueue;
use pipeline_core::worker::WorkerRuntime;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use handler::QueryAnalystHandler;

const QUEUE_NAME: &str = "grievances";
const GRIEVANCE_TABLE: &str = "grievances";

/// No subcommands; reads configuration from the environment (§6 "CLI surface").
#[derive(Parser, Debug)]
#[command(name = "query-analyst")]
struct Args {
    /// Drain the queue's current backlog once and exit, instead of polling forever.
    #[arg(long, env = "QUERY_ANALYST_ONCE")]
    once: bool,

    /// Restrict processing to a single job id; other messages are left for their lease to expire.
    #[arg(long, env = "QUERY_ANALYST_TARGET_ID")]
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

    let text_analyzer = match OpenAiClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(%err, "no LLM credentials configured, classifiers will be skipped");
            return Err(err.into());
        }
    };

    let handler = Arc::new(QueryAnalystHandler {
        pool: pool.clone(),
        grievance_table: GRIEVANCE_TABLE.to_string(),
        vision: Arc::new(NullVisionService),
        embedder: text_analyzer.clone(),
        text_analyzer: text_analyzer.clone(),
        web_search: Arc::new(NullWebSearchService),
        report_renderer: Arc::new(MarkdownReportRenderer),
        blob_store,
    });

    let runtime = WorkerRuntime::new(queue, QUEUE_NAME, config.visibility_timeout(), config.poll_interval());

    if args.once {
        info!(queue = QUEUE_NAME, "query-analyst running a single pass");
        runtime.run_once(handler, args.target_id).await?;
        return Ok(());
    }

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    info!(queue = QUEUE_NAME, "query-analyst starting");
    runtime.run(handler, shutdown_rx).await?;
    Ok(())
}
