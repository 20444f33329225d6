mod cleaner;
mod handler;
mod http_crawler;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pipeline_core::backoff::ExponentialBackoff;
use pipeline_core::blob_store::LocalBlobStore;
use pipeline_core::config::PipelineConfig;
use pipeline_core::external::NullPdfExtractor;
use pipeline_core::queue::PgQueue;
use pipeline_core::worker::WorkerRuntime;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use handler::CrawlerHandler;
use http_crawler::HttpCrawler;

const QUEUE_NAME: &str = "webcrawler";

/// No subcommands; reads configuration from the environment (§6 "CLI surface").
#[derive(Parser, Debug)]
#[command(name = "web-crawler")]
struct Args {
    /// Drain the queue's current backlog once and exit, instead of polling forever.
    #[arg(long, env = "WEB_CRAWLER_ONCE")]
    once: bool,

    /// Restrict processing to a single job id; other messages are left for their lease to expire.
    #[arg(long, env = "WEB_CRAWLER_TARGET_ID")]
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
    let queue = Arc::new(PgQueue::new(pool));
    let blob_store = Arc::new(LocalBlobStore::new(&config.blob_base_dir));

    let handler = Arc::new(CrawlerHandler {
        crawler: Arc::new(HttpCrawler::new(Duration::from_secs(10), Duration::from_secs(30))),
        pdf_extractor: Arc::new(NullPdfExtractor),
        pdf_fetcher: reqwest::Client::new(),
        blob_store,
        max_pages_per_job: config.max_pages_per_job,
        batch_size: config.batch_size,
        job_timeout: config.page_timeout(),
    });

    let runtime = WorkerRuntime::new(queue, QUEUE_NAME, config.visibility_timeout(), config.poll_interval());

    if args.once {
        info!(queue = QUEUE_NAME, "web-crawler running a single pass");
        runtime.run_once(handler, args.target_id).await?;
        return Ok(());
    }

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    info!(queue = QUEUE_NAME, "web-crawler starting");
    runtime.run(handler, shutdown_rx).await?;
    Ok(())
}
