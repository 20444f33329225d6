//! The Crawler stage handler (§4.4): one URL in, crawled-content blobs + one embeddings
//! message out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use pipeline_core::blob_store::{BlobPath, BlobStore};
use pipeline_core::external::{Crawler, PdfExtractor};
use pipeline_core::message::{QueueMessage, StageTag};
use pipeline_core::worker::{HandlerOutcome, StageHandler};
use tracing::warn;
use url::Url;

use crate::cleaner::clean_page_text;
use crate::http_crawler::is_pdf;

const EMBEDDINGS_QUEUE: &str = "embeddings";

pub struct CrawlerHandler {
    pub crawler: Arc<dyn Crawler>,
    pub pdf_extractor: Arc<dyn PdfExtractor>,
    pub pdf_fetcher: reqwest::Client,
    pub blob_store: Arc<dyn BlobStore>,
    pub max_pages_per_job: usize,
    pub batch_size: usize,
    pub job_timeout: Duration,
}

fn sanitize_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let sanitized: String = trimmed.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
    if sanitized.is_empty() {
        "index".to_string()
    } else {
        sanitized
    }
}

#[async_trait]
impl StageHandler for CrawlerHandler {
    fn stage_tag(&self) -> &str {
        StageTag::WEB_CRAWLING
    }

    async fn handle(&self, message: QueueMessage) -> HandlerOutcome {
        let Some(url) = message.url.clone() else {
            return HandlerOutcome::BusinessFailure("webcrawler message missing url".to_string());
        };

        let domain = match Url::parse(&url).ok().and_then(|u| u.host_str().map(str::to_string)) {
            Some(domain) => domain,
            None => return HandlerOutcome::BusinessFailure(format!("malformed url: {url}")),
        };

        if is_pdf(&url, None) {
            return self.handle_pdf(&message.job_id.to_string(), &url, &domain).await;
        }

        self.handle_html(&message.job_id.to_string(), &url, &domain).await
    }
}

impl CrawlerHandler {
    async fn handle_pdf(&self, job_id: &str, url: &str, domain: &str) -> HandlerOutcome {
        let bytes = match self.pdf_fetcher.get(url).send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => return HandlerOutcome::Transient(err.into()),
            },
            Err(err) => return HandlerOutcome::Transient(err.into()),
        };

        let text = match self.pdf_extractor.extract_text(&bytes).await {
            Ok(text) => text,
            Err(err) => return HandlerOutcome::Transient(anyhow::anyhow!(err)),
        };

        let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default();
        let file_stem = sanitize_path(&path.trim_end_matches(".pdf").trim_end_matches(".PDF").to_string());
        let key = BlobPath::crawled_page(domain, &file_stem);
        if let Err(err) = self.blob_store.store(&key, text.as_bytes(), "text/plain").await {
            return HandlerOutcome::Transient(err.into());
        }

        self.emit_embeddings_message(job_id, url, domain)
    }

    async fn handle_html(&self, job_id: &str, start_url: &str, domain: &str) -> HandlerOutcome {
        let deadline = Instant::now() + self.job_timeout;
        let mut visited: HashSet<String> = HashSet::new();
        let mut worklist: Vec<String> = vec![start_url.to_string()];
        let mut pages_crawled = 0usize;
        let mut any_uploaded = false;

        while !worklist.is_empty() && pages_crawled < self.max_pages_per_job {
            if Instant::now() >= deadline {
                warn!(job_id, "crawl job timed out, emitting partial results");
                break;
            }

            let batch: Vec<String> = worklist
                .drain(..worklist.len().min(self.batch_size))
                .filter(|u| same_origin(u, domain) && visited.insert(u.clone()))
                .collect();

            if batch.is_empty() {
                continue;
            }

            let fetches = batch.iter().map(|u| self.crawler.fetch_page(u));
            let results = join_all(fetches).await;

            for (url, result) in batch.iter().zip(results) {
                match result {
                    Ok(page) => {
                        let cleaned = clean_page_text(&page.content);
                        if !cleaned.trim().is_empty() {
                            let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default();
                            let key = BlobPath::crawled_page(domain, &sanitize_path(&path));
                            if self.blob_store.store(&key, cleaned.as_bytes(), "text/plain").await.is_ok() {
                                any_uploaded = true;
                            }
                        }
                        for link in page.links {
                            if !visited.contains(&link) {
                                worklist.push(link);
                            }
                        }
                        pages_crawled += 1;
                    }
                    Err(err) => warn!(%url, %err, "failed to fetch page, continuing crawl"),
                }
            }
        }

        if !any_uploaded {
            return HandlerOutcome::BusinessFailure(format!("no pages successfully crawled for {start_url}"));
        }

        self.emit_embeddings_message(job_id, start_url, domain)
    }

    fn emit_embeddings_message(&self, job_id: &str, url: &str, domain: &str) -> HandlerOutcome {
        let job_uuid = job_id.parse().unwrap_or_else(|_| uuid::Uuid::new_v4());
        let message = QueueMessage::new(job_uuid, StageTag::SCRAPED).with_url(url).with_blob_folder(domain);
        HandlerOutcome::success_with(vec![(EMBEDDINGS_QUEUE.to_string(), message)])
    }
}

fn same_origin(url: &str, domain: &str) -> bool {
    Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)).as_deref() == Some(domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_path_replaces_separators() {
        assert_eq!(sanitize_path("/notices/foo.pdf"), "notices_foo_pdf");
        assert_eq!(sanitize_path(""), "index");
    }

    #[test]
    fn same_origin_checks_host_only() {
        assert!(same_origin("https://example.gov/a", "example.gov"));
        assert!(!same_origin("https://other.gov/a", "example.gov"));
    }
}
