//! Orchestrates the reuse-or-research decision (§4.6) for one `new_grievance_research`
//! notification.

use std::sync::Arc;

use pipeline_core::external::{TextAnalyzer, WebSearchService};
use pipeline_core::message::{QueueMessage, StageTag};
use pipeline_core::queue::Queue;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pattern_store::PatternStore;
use crate::research::run_full_research;

const CRAWLER_QUEUE: &str = "webcrawler";

#[derive(Debug, Deserialize)]
pub struct ResearchNotification {
    pub grievance_id: Uuid,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

pub struct ResearchHandler<Q: Queue> {
    pub pattern_store: PatternStore,
    pub web_search: Arc<dyn WebSearchService>,
    pub text_analyzer: Arc<dyn TextAnalyzer>,
    pub queue: Arc<Q>,
    pub similarity_threshold: f64,
}

impl<Q: Queue> ResearchHandler<Q> {
    pub async fn handle(&self, notification: ResearchNotification) -> anyhow::Result<()> {
        let category = notification.category.unwrap_or_else(|| "General".to_string());
        let location = notification.location.unwrap_or_else(|| "the area".to_string());

        let Some(embedding) = self.pattern_store.fetch_grievance_embedding(notification.grievance_id).await? else {
            warn!(grievance_id = %notification.grievance_id, "embedding not yet populated, skipping notification");
            return Ok(());
        };

        if let Some(candidate) = self.pattern_store.nearest_pattern(&embedding).await? {
            if candidate.similarity >= self.similarity_threshold {
                info!(grievance_id = %notification.grievance_id, pattern_id = %candidate.pattern_id, similarity = candidate.similarity, "pattern cache hit, reusing research");
                self.pattern_store.link_grievance_to_pattern(notification.grievance_id, candidate.pattern_id, candidate.similarity).await?;
                self.pattern_store
                    .write_cached_research_to_metadata(notification.grievance_id, &candidate.research_report, &candidate.research_sources)
                    .await?;
                return Ok(());
            }
        }

        info!(grievance_id = %notification.grievance_id, "pattern cache miss, running full research");
        let report = run_full_research(&category, &location, self.web_search.as_ref(), self.text_analyzer.as_ref()).await?;

        let pattern = self.pattern_store.create_or_fetch_pattern(&embedding, &category, &location, &report).await?;
        self.pattern_store.link_grievance_to_pattern(notification.grievance_id, pattern.pattern_id, 1.0).await?;
        self.pattern_store
            .write_cached_research_to_metadata(notification.grievance_id, &pattern.research_report, &pattern.research_sources)
            .await?;

        for url in &report.sources {
            let message = QueueMessage::new(Uuid::new_v4(), StageTag::WEB_CRAWLING)
                .with_grievance_id(notification.grievance_id.to_string())
                .with_url(url.clone());
            if let Err(err) = self.queue.send(CRAWLER_QUEUE, &message).await {
                warn!(%url, %err, "failed to emit validated source to crawler queue");
            }
        }

        Ok(())
    }
}
