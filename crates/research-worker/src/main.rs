mod handler;
mod pattern_store;
mod research;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pipeline_core::backoff::ExponentialBackoff;
use pipeline_core::config::PipelineConfig;
use pipeline_core::external::{NullWebSearchService, OpenAiClient};
use pipeline_core::queue::PgQueue;
use sqlx::postgres::{PgListener, PgPoolOptions};
use tracing::{error, info, warn};
use uuid::Uuid;

use handler::{ResearchHandler, ResearchNotification};
use pattern_store::PatternStore;

const NOTIFY_CHANNEL: &str = "new_grievance_research";
const GRIEVANCE_TABLE: &str = "grievances";

/// No subcommands; reads configuration from the environment (§6 "CLI surface").
#[derive(Parser, Debug)]
#[command(name = "research-worker")]
struct Args {
    /// Handle a single notification and exit, instead of listening forever.
    #[arg(long, env = "RESEARCH_WORKER_ONCE")]
    once: bool,

    /// Wait for a notification naming this grievance id specifically; others are ignored.
    #[arg(long, env = "RESEARCH_WORKER_TARGET_ID")]
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

    let text_analyzer = match OpenAiClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(%err, "no LLM credentials configured, research summaries will fail");
            return Err(err.into());
        }
    };

    let handler = Arc::new(ResearchHandler {
        pattern_store: PatternStore::new(pool.clone(), GRIEVANCE_TABLE),
        web_search: Arc::new(NullWebSearchService),
        text_analyzer,
        queue,
        similarity_threshold: config.pattern_similarity_threshold,
    });

    let mut listener = PgListener::connect_with(&pool).await?;
    listener.listen(NOTIFY_CHANNEL).await?;
    info!(channel = NOTIFY_CHANNEL, "research-worker listening for notifications");

    loop {
        let notification = listener.recv().await?;
        let payload: ResearchNotification = match serde_json::from_str(notification.payload()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, payload = notification.payload(), "dropping malformed research notification");
                continue;
            }
        };

        if let Some(target) = args.target_id {
            if payload.grievance_id != target {
                continue;
            }
        }

        if args.once {
            info!(grievance_id = %payload.grievance_id, "research-worker handling a single notification");
            handler.handle(payload).await?;
            return Ok(());
        }

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(err) = handler.handle(payload).await {
                error!(%err, "research notification handling failed");
            }
        });
    }
}
