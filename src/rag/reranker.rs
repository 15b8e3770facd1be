use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Position of a reranked document in the list handed to the reranker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    pub index: usize,
    pub score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns at most `top_k` hits, most relevant first.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankHit>, ProviderError>;
}

#[derive(Clone)]
pub struct VoyageReranker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl VoyageReranker {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Reranker for VoyageReranker {
    fn name(&self) -> &'static str {
        "voyage"
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankHit>, ProviderError> {
        let payload = VoyageRerankRequest {
            query,
            documents,
            model: &self.model,
            top_k,
        };
        let url = format!("{}/rerank", self.base_url.trim_end_matches('/'));
        let parsed: VoyageRerankResponse =
            post_json(&self.client, &url, self.api_key.as_deref(), &payload).await?;

        Ok(parsed
            .data
            .into_iter()
            .map(|it| RerankHit {
                index: it.index,
                score: it.score,
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct JinaReranker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl JinaReranker {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.as_deref().and_then(bare_key),
            model: model.into(),
        })
    }
}

/// Jina keys are often copied with their `Bearer ` prefix; keep only the token.
fn bare_key(key: &str) -> Option<String> {
    let key = key.trim();
    let key = key.strip_prefix("Bearer ").unwrap_or(key).trim();
    (!key.is_empty()).then(|| key.to_string())
}

#[async_trait]
impl Reranker for JinaReranker {
    fn name(&self) -> &'static str {
        "jina"
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankHit>, ProviderError> {
        let payload = JinaRerankRequest {
            model: &self.model,
            query,
            top_n: top_k,
            documents,
            return_documents: false,
        };
        let url = format!("{}/rerank", self.base_url.trim_end_matches('/'));
        let parsed: JinaRerankResponse =
            post_json(&self.client, &url, self.api_key.as_deref(), &payload).await?;

        Ok(parsed
            .results
            .into_iter()
            .map(|it| RerankHit {
                index: it.index,
                score: it.score,
            })
            .collect())
    }
}

async fn post_json<P, R>(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    payload: &P,
) -> Result<R, ProviderError>
where
    P: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let mut req = client.post(url).json(payload);
    if let Some(key) = api_key {
        req = req.bearer_auth(key);
    }
    let res = req.send().await?;

    if !res.status().is_success() {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        return Err(ProviderError::Api { status, body });
    }

    Ok(res.json().await?)
}

#[derive(Debug, Serialize)]
struct VoyageRerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct VoyageRerankResponse {
    data: Vec<RerankItem>,
}

#[derive(Debug, Serialize)]
struct JinaRerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    top_n: usize,
    documents: &'a [String],
    return_documents: bool,
}

#[derive(Debug, Deserialize)]
struct JinaRerankResponse {
    results: Vec<RerankItem>,
}

#[derive(Debug, Deserialize)]
struct RerankItem {
    index: usize,
    #[serde(alias = "relevance_score", alias = "score")]
    score: f32,
}
