//! The Embeddings stage handler (§4.5): one blob-folder reference in, vectors upserted
//! into the vector index, nothing forwarded downstream.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::blob_store::BlobStore;
use pipeline_core::external::Embedder;
use pipeline_core::message::{QueueMessage, StageTag};
use pipeline_core::vector_index::{sanitize_vector_id, VectorIndex, VectorRecord};
use pipeline_core::worker::{HandlerOutcome, StageHandler};
use tracing::info;

use crate::chunker::chunk_text;

const TEXT_PREFIX_LEN: usize = 200;

pub struct EmbeddingsHandler {
    pub embedder: Arc<dyn Embedder>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub blob_store: Arc<dyn BlobStore>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// `list_prefix` under both the current convention (`crawled-content/<folder>/`) and the
/// legacy one (`<folder>/`, no prefix) so older blob folders written before the prefix was
/// introduced still get embedded.
fn candidate_prefixes(blob_folder: &str) -> [String; 2] {
    [format!("crawled-content/{blob_folder}/"), format!("{blob_folder}/")]
}

#[async_trait]
impl StageHandler for EmbeddingsHandler {
    fn stage_tag(&self) -> &str {
        StageTag::SCRAPED
    }

    async fn handle(&self, message: QueueMessage) -> HandlerOutcome {
        let Some(blob_folder) = message.blob_folder.clone() else {
            return HandlerOutcome::BusinessFailure("embeddings message missing blob_folder".to_string());
        };
        let url = message.url.clone().unwrap_or_default();

        let mut blob_refs: Vec<String> = Vec::new();
        for prefix in candidate_prefixes(&blob_folder) {
            match self.blob_store.list_prefix(&prefix).await {
                Ok(refs) => blob_refs.extend(refs),
                Err(err) => return HandlerOutcome::Transient(err.into()),
            }
        }
        blob_refs.sort();
        blob_refs.dedup();

        if blob_refs.is_empty() {
            info!(job_id = %message.job_id, %blob_folder, "embeddings folder empty, acking with no upserts");
            return HandlerOutcome::success();
        }

        let mut records = Vec::new();
        for blob_ref in &blob_refs {
            let content = match self.blob_store.fetch(blob_ref).await {
                Ok(bytes) => bytes,
                Err(err) => return HandlerOutcome::Transient(err.into()),
            };
            let text = String::from_utf8_lossy(&content).into_owned();
            let file_name = file_name_from_ref(blob_ref);
            let chunks = chunk_text(&text, self.chunk_size, self.chunk_overlap);
            let total_chunks = chunks.len();

            for (chunk_index, chunk) in chunks.into_iter().enumerate() {
                let embedding = match self.embedder.embed(&chunk).await {
                    Ok(embedding) => embedding,
                    Err(err) => return HandlerOutcome::Transient(anyhow::anyhow!(err)),
                };
                let id = sanitize_vector_id(message.job_id, &file_name, chunk_index);
                let text_prefix: String = chunk.chars().take(TEXT_PREFIX_LEN).collect();
                records.push(VectorRecord {
                    id,
                    embedding,
                    content: chunk,
                    metadata: serde_json::json!({
                        "job_id": message.job_id,
                        "url": url,
                        "blob_folder": blob_folder,
                        "file_name": file_name,
                        "chunk_index": chunk_index,
                        "total_chunks": total_chunks,
                        "text_prefix": text_prefix,
                    }),
                });
            }
        }

        if let Err(err) = self.vector_index.upsert(records).await {
            return HandlerOutcome::Transient(err.into());
        }

        HandlerOutcome::success()
    }
}

fn file_name_from_ref(blob_ref: &str) -> String {
    blob_ref.rsplit('/').next().unwrap_or(blob_ref).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::blob_store::InMemoryBlobStore;
    use pipeline_core::external::ExternalServiceError;
    use pipeline_core::vector_index::InMemoryVectorIndex;
    use uuid::Uuid;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ExternalServiceError> {
            Ok(vec![0.1, 0.2, 0.3])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalServiceError> {
            let mut out = Vec::new();
            for _ in texts {
                out.push(vec![0.1, 0.2, 0.3]);
            }
            Ok(out)
        }
    }

    #[tokio::test]
    async fn empty_folder_acks_with_no_upserts() {
        let blob_store = Arc::new(InMemoryBlobStore::new());
        let vector_index = Arc::new(InMemoryVectorIndex::new());
        let handler = EmbeddingsHandler {
            embedder: Arc::new(FixedEmbedder),
            vector_index: vector_index.clone(),
            blob_store,
            chunk_size: 1000,
            chunk_overlap: 200,
        };

        let message = QueueMessage::new(Uuid::new_v4(), StageTag::SCRAPED).with_blob_folder("example.gov");
        let outcome = handler.handle(message).await;
        assert!(matches!(outcome, HandlerOutcome::Success { ref forward } if forward.is_empty()));

        let matches = vector_index.nearest(&[0.1, 0.2, 0.3], 10).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn chunks_and_upserts_every_blob_under_folder() {
        let blob_store = Arc::new(InMemoryBlobStore::new());
        blob_store.store("crawled-content/example.gov/page1.txt", "a meaningful page of civic content".as_bytes(), "text/plain").await.unwrap();
        let vector_index = Arc::new(InMemoryVectorIndex::new());
        let handler = EmbeddingsHandler {
            embedder: Arc::new(FixedEmbedder),
            vector_index: vector_index.clone(),
            blob_store,
            chunk_size: 1000,
            chunk_overlap: 200,
        };

        let message = QueueMessage::new(Uuid::new_v4(), StageTag::SCRAPED).with_blob_folder("example.gov").with_url("https://example.gov/");
        let outcome = handler.handle(message).await;
        assert!(matches!(outcome, HandlerOutcome::Success { .. }));

        let matches = vector_index.nearest(&[0.1, 0.2, 0.3], 10).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].metadata["file_name"], "page1.txt");
    }
}
