pub mod embeddings;
pub mod reranker;
pub mod vector_store;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value as JsonValue;

use crate::config::{RerankProviderKind, Settings};
use crate::models::{RetrievedDocument, UNKNOWN};
use self::embeddings::{Embedder, EmbeddingGenerator};
use self::reranker::{JinaReranker, Reranker, VoyageReranker};
use self::vector_store::{ScoredPoint, VectorSearch, VectorStore};

/// Embed → nearest-neighbour search → rerank.
#[derive(Clone)]
pub struct Retriever {
    embeddings: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorSearch>,
    reranker: Arc<dyn Reranker>,
}

impl Retriever {
    pub fn new(
        embeddings: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorSearch>,
        reranker: Arc<dyn Reranker>,
    ) -> Self {
        Self {
            embeddings,
            vector_store,
            reranker,
        }
    }

    /// Connects the hosted embedding, Qdrant and rerank clients.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = settings.http_timeout();
        let embeddings = EmbeddingGenerator::new(
            &settings.embedding_base_url,
            settings.dashscope_api_key.clone(),
            &settings.embedding_model,
            settings.embedding_dimensions,
            timeout,
        )?;
        let vector_store = VectorStore::new(&settings.qdrant_url, settings.qdrant_api_key.clone())?;
        let reranker: Arc<dyn Reranker> = match settings.rerank_provider {
            RerankProviderKind::Voyage => Arc::new(VoyageReranker::new(
                &settings.voyage_base_url,
                settings.voyage_api_key.clone(),
                &settings.voyage_rerank_model,
                timeout,
            )?),
            RerankProviderKind::Jina => Arc::new(JinaReranker::new(
                &settings.jina_base_url,
                settings.jina_api_key.clone(),
                &settings.jina_rerank_model,
                timeout,
            )?),
        };
        tracing::info!("Using {} reranker", reranker.name());

        Ok(Self::new(
            Arc::new(embeddings),
            Arc::new(vector_store),
            reranker,
        ))
    }

    pub async fn search(
        &self,
        query: &str,
        collection: &str,
        metadata: &[String],
        top_k: u64,
        rerank_top_k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let query_embedding = self.embeddings.embed(query).await?;
        let hits = self
            .vector_store
            .search(collection, query_embedding, metadata, top_k)
            .await?;

        let documents: Vec<RetrievedDocument> =
            hits.into_iter().filter_map(document_from_point).collect();

        tracing::debug!(
            "Collection {} returned {} usable documents",
            collection,
            documents.len()
        );

        let limit = rerank_top_k.min(documents.len());
        if limit == 0 {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let ranked = self.reranker.rerank(query, &contents, limit).await?;

        Ok(ranked
            .into_iter()
            .filter_map(|hit| documents.get(hit.index).cloned())
            .take(limit)
            .collect())
    }

    pub async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.vector_store.list_collections().await?)
    }
}

/// Hits with missing, empty or non-string `content` are dropped.
fn document_from_point(point: ScoredPoint) -> Option<RetrievedDocument> {
    let ScoredPoint { mut payload, .. } = point;
    let content = match payload.remove("content") {
        Some(JsonValue::String(s)) if !s.is_empty() => s,
        _ => return None,
    };
    Some(RetrievedDocument {
        content,
        title: string_or_unknown(&mut payload, "title"),
        author: string_or_unknown(&mut payload, "author"),
    })
}

fn string_or_unknown(payload: &mut HashMap<String, JsonValue>, key: &str) -> String {
    match payload.remove(key) {
        Some(JsonValue::String(s)) if !s.is_empty() => s,
        _ => UNKNOWN.to_string(),
    }
}
