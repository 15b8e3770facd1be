use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, Filter, QueryPointsBuilder, SearchParamsBuilder, Value as QdrantValue,
};
use qdrant_client::Qdrant;
use serde_json::Value as JsonValue;

use crate::error::ProviderError;

/// HNSW beam width used for every nearest-neighbour query.
const HNSW_EF: u64 = 128;

/// A nearest-neighbour hit with its payload decoded to JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: HashMap<String, JsonValue>,
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Approximate top-`limit` search. Every `metadata` value must match the
    /// point's `metadata` payload key.
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        metadata: &[String],
        limit: u64,
    ) -> Result<Vec<ScoredPoint>, ProviderError>;

    async fn list_collections(&self) -> Result<Vec<String>, ProviderError>;
}

pub struct VectorStore {
    client: Qdrant,
}

impl VectorStore {
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, ProviderError> {
        tracing::info!("Building Qdrant client for URL: {}", url);
        let client = Qdrant::from_url(url).api_key(api_key).build().map_err(|e| {
            tracing::error!("Qdrant client build failed: {:?}", e);
            e
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl VectorSearch for VectorStore {
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        metadata: &[String],
        limit: u64,
    ) -> Result<Vec<ScoredPoint>, ProviderError> {
        let mut builder = QueryPointsBuilder::new(collection)
            .query(vector)
            .limit(limit)
            .with_payload(true)
            .params(SearchParamsBuilder::default().hnsw_ef(HNSW_EF).exact(false));

        if let Some(filter) = metadata_filter(metadata) {
            builder = builder.filter(filter);
        }

        let response = self.client.query(builder).await?;

        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredPoint {
                score: point.score,
                payload: payload_to_json(point.payload),
            })
            .collect())
    }

    async fn list_collections(&self) -> Result<Vec<String>, ProviderError> {
        let response = self.client.list_collections().await?;
        Ok(response
            .collections
            .into_iter()
            .map(|collection| collection.name)
            .collect())
    }
}

fn metadata_filter(metadata: &[String]) -> Option<Filter> {
    if metadata.is_empty() {
        return None;
    }
    Some(Filter::must(
        metadata
            .iter()
            .map(|value| Condition::matches("metadata", value.clone())),
    ))
}

fn payload_to_json(payload: HashMap<String, QdrantValue>) -> HashMap<String, JsonValue> {
    payload
        .into_iter()
        .map(|(key, value)| (key, value.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::value::Kind;
    use qdrant_client::qdrant::{ListValue, Struct};

    fn kind(kind: Kind) -> QdrantValue {
        QdrantValue { kind: Some(kind) }
    }

    #[test]
    fn payload_converts_to_json() {
        let mut fields = HashMap::new();
        fields.insert("page".to_string(), kind(Kind::IntegerValue(7)));
        let mut payload = HashMap::new();
        payload.insert("content".to_string(), kind(Kind::StringValue("耕田队".into())));
        payload.insert("title".to_string(), kind(Kind::NullValue(0)));
        payload.insert(
            "metadata".to_string(),
            kind(Kind::ListValue(ListValue {
                values: vec![
                    kind(Kind::StringValue("x".into())),
                    kind(Kind::StructValue(Struct { fields })),
                ],
            })),
        );

        let json = payload_to_json(payload);
        assert_eq!(json["content"], JsonValue::from("耕田队"));
        assert_eq!(json["title"], JsonValue::Null);
        assert_eq!(json["metadata"], serde_json::json!(["x", {"page": 7}]));
    }

    #[test]
    fn filter_only_when_metadata_given() {
        assert!(metadata_filter(&[]).is_none());
        let filter = metadata_filter(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(filter.must.len(), 2);
        assert!(filter.should.is_empty());
    }
}
