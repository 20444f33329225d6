mod analysis;
mod escalation;
mod handler;
mod report;
mod repository;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pipeline_core::backoff::ExponentialBackoff;
use pipeline_core::blob_store::LocalBlobStore;
use pipeline_core::config::PipelineConfig;
use pipeline_core::external::{MarkdownReportRenderer, OpenAiClient};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use uuid::Uuid;

use escalation::EscalationLevelCasing;
use handler::ProgressHandler;
use repository::DepartmentRepository;

const GRIEVANCE_TABLE: &str = "grievances";
const DEFAULT_INTERVAL_SEC: u64 = 3600;

/// No subcommands; every worker binary reads its configuration from the environment and
/// exits non-zero on config error (§6 "CLI surface").
#[derive(Parser, Debug)]
#[command(name = "progress-worker")]
struct Args {
    /// Process one pass over departments and exit, instead of running on the wall-clock schedule.
    #[arg(long, env = "PROGRESS_ONCE")]
    once: bool,

    /// Restrict the run to a single department instead of all active ones.
    #[arg(long, env = "PROGRESS_TARGET_ID")]
    target_id: Option<Uuid>,

    /// Seconds between scheduled runs when not running with `--once`.
    #[arg(long, env = "PROGRESS_INTERVAL_SEC", default_value_t = DEFAULT_INTERVAL_SEC)]
    interval_sec: u64,
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
    let blob_store = Arc::new(LocalBlobStore::new(&config.blob_base_dir));

    let text_analyzer = match OpenAiClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(%err, "no LLM credentials configured, progress narratives will fail");
            return Err(err.into());
        }
    };

    let escalation_casing = EscalationLevelCasing::probe(&pool).await?;

    let handler = ProgressHandler {
        repository: DepartmentRepository::new(pool, GRIEVANCE_TABLE),
        text_analyzer,
        report_renderer: Arc::new(MarkdownReportRenderer),
        blob_store,
        escalation_casing,
    };

    if args.once {
        info!("progress-worker running one-shot");
        handler.run(args.target_id).await?;
        return Ok(());
    }

    info!(interval_sec = args.interval_sec, "progress-worker starting on a wall-clock schedule");
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_sec));
    loop {
        ticker.tick().await;
        if let Err(err) = handler.run(args.target_id).await {
            error!(%err, "scheduled progress run failed");
        }
    }
}
