//! Opaque external-service traits.
//!
//! The original system imported an LLM SDK, a vision SDK, and a crawl library directly into
//! business logic, each instantiated as a process-wide singleton. Here every external
//! dependency is a trait injected at startup, so a stage's handler can be unit-tested
//! against a fake and the concrete HTTP client lives in exactly one place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ExternalServiceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("service returned an error: {0}")]
    Service(String),

    #[error("response could not be parsed: {0}")]
    Parse(String),
}

/// Natural-language classification/extraction over free text (department routing keywords,
/// grievance category, sentiment). Mirrors the `call_api`/`call_api_with_tool` shape used by
/// the original system's chat-completion clients.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn analyze(&self, prompt: &str, text: &str) -> Result<String, ExternalServiceError>;
}

/// Turns text into a fixed-dimension embedding for pgvector storage and similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalServiceError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalServiceError>;
}

/// Extracts a description from an image (grievance photo evidence).
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn describe_image(&self, image_bytes: &[u8], prompt: &str) -> Result<String, ExternalServiceError>;
}

#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub content: String,
    pub links: Vec<String>,
}

/// Fetches a single page and the outbound links found on it; the stage handler owns the
/// breadth-first traversal policy (depth, page budget), not the crawler itself.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<CrawledPage, ExternalServiceError>;
}

/// Extracts plain text from a PDF blob.
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    async fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, ExternalServiceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web search used by the Research stage when the pattern cache misses.
#[async_trait]
pub trait WebSearchService: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<WebSearchResult>, ExternalServiceError>;
}

/// Renders a structured progress report into the final artifact blob (markdown today, a
/// distinct renderer could produce PDF without touching the Progress stage's logic).
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, title: &str, sections: &[(String, String)]) -> Result<String, ExternalServiceError>;
}

/// Degrades-to-neutral stand-in for a vision service that isn't wired up yet. §4.3 step 1/3
/// require the pipeline to continue with a neutral/empty verdict when the vision service is
/// unavailable, so this is a legitimate default, not a test-only fake.
pub struct NullVisionService;

#[async_trait]
impl VisionService for NullVisionService {
    async fn describe_image(&self, _image_bytes: &[u8], _prompt: &str) -> Result<String, ExternalServiceError> {
        Ok(String::new())
    }
}

/// Degrades to an explicit error rather than silently returning empty text -- unlike vision
/// or search, a missing PDF extractor means the crawler has nothing to upload for that URL,
/// which the crawler stage must treat as a per-page failure, not silent success.
pub struct NullPdfExtractor;

#[async_trait]
impl PdfExtractor for NullPdfExtractor {
    async fn extract_text(&self, _pdf_bytes: &[u8]) -> Result<String, ExternalServiceError> {
        Err(ExternalServiceError::Service("no PDF extractor configured".to_string()))
    }
}

/// Returns no results. Used where a web-search backend hasn't been provisioned; §4.6's
/// full-research path simply finds nothing to validate, which is a legitimate (if
/// low-quality) outcome, not an error.
pub struct NullWebSearchService;

#[async_trait]
impl WebSearchService for NullWebSearchService {
    async fn search(&self, _query: &str, _max_results: u32) -> Result<Vec<WebSearchResult>, ExternalServiceError> {
        Ok(Vec::new())
    }
}

/// A small markdown renderer good enough for the default deployment; swapped out by
/// injecting a different [`ReportRenderer`] at startup.
pub struct MarkdownReportRenderer;

#[async_trait]
impl ReportRenderer for MarkdownReportRenderer {
    async fn render(&self, title: &str, sections: &[(String, String)]) -> Result<String, ExternalServiceError> {
        let mut out = format!("# {title}\n\n");
        for (heading, body) in sections {
            out.push_str(&format!("## {heading}\n\n{body}\n\n"));
        }
        Ok(out)
    }
}

/// OpenAI-compatible chat-completion + embedding client. Concrete default for
/// [`TextAnalyzer`]/[`Embedder`] so binaries have something to wire at startup without
/// reaching into a provider SDK; any OpenAI-compatible endpoint (including self-hosted
/// gateways) works by overriding `base_url`.
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: crate::config::ServiceApiKey,
    client: reqwest::Client,
    model: String,
    embedding_model: String,
    base_url: String,
}

impl OpenAiClient {
    const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn new(api_key: crate::config::ServiceApiKey, model: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: model.into(),
            embedding_model: embedding_model.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, crate::error::PipelineError> {
        let api_key = crate::config::ServiceApiKey::from_env("OPENAI_API_KEY")?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());
        let embedding_model = std::env::var("OPENAI_EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string());
        Ok(Self::new(api_key, model, embedding_model))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TextAnalyzer for OpenAiClient {
    async fn analyze(&self, prompt: &str, text: &str) -> Result<String, ExternalServiceError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": prompt},
                {"role": "user", "content": text},
            ],
            "temperature": 0.1,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalServiceError::Service(format!("chat completion {status}: {body}")));
        }

        #[derive(Deserialize)]
        struct Message {
            content: String,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ExternalServiceError::Parse(e.to_string()))?;
        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ExternalServiceError::Service("no choices returned".to_string()))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn dimensions(&self) -> usize {
        384
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalServiceError> {
        Ok(self.embed_batch(std::slice::from_ref(&text.to_string())).await?.into_iter().next().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalServiceError> {
        let body = serde_json::json!({
            "model": &self.embedding_model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalServiceError::Service(format!("embeddings {status}: {body}")));
        }

        #[derive(Deserialize)]
        struct EmbeddingDatum {
            embedding: Vec<f32>,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            data: Vec<EmbeddingDatum>,
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ExternalServiceError::Parse(e.to_string()))?;
        Ok(api_response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn markdown_renderer_includes_all_sections() {
        let renderer = MarkdownReportRenderer;
        let rendered = renderer
            .render("Grievance G-1 Progress", &[("Status".to_string(), "In progress".to_string()), ("Escalation".to_string(), "urgent".to_string())])
            .await
            .unwrap();
        assert!(rendered.contains("# Grievance G-1 Progress"));
        assert!(rendered.contains("## Status"));
        assert!(rendered.contains("In progress"));
        assert!(rendered.contains("## Escalation"));
    }
}
