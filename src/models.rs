use serde::{Deserialize, Serialize};

/// Title/author placeholder for hits whose payload lacks them.
pub const UNKNOWN: &str = "unknown";

pub const NOT_FOUND_ANSWER: &str =
    "抱歉，没有找到相关文档。请尝试其他查询或检查集合是否包含相关内容。";
pub const NOT_FOUND_STREAM: &str = "没有找到相关文档";

/// One chunk pulled out of the vector store, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub title: String,
    pub author: String,
}

/// Query string accepted by `/query` and `/stream_query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryParams {
    pub query: String,
    pub collection_name: String,
    #[serde(default = "default_top_k")]
    pub top_k: u64,
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub enhance: bool,
}

impl QueryParams {
    pub fn metadata_filter(&self) -> Vec<String> {
        self.metadata
            .iter()
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .collect()
    }
}

fn default_top_k() -> u64 {
    10
}

fn default_rerank_top_k() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionsResponse {
    pub collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of a single `data:` line on `/stream_query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Tagged(TaggedEvent),
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TaggedEvent {
    Documents(Vec<RetrievedDocument>),
    Text(String),
    End,
}

impl StreamEvent {
    pub fn documents(documents: Vec<RetrievedDocument>) -> Self {
        Self::Tagged(TaggedEvent::Documents(documents))
    }

    pub fn text(fragment: impl Into<String>) -> Self {
        Self::Tagged(TaggedEvent::Text(fragment.into()))
    }

    pub fn end() -> Self {
        Self::Tagged(TaggedEvent::End)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

// OpenAI-compatible chat types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamChoice {
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_events_serialize_to_wire_shape() {
        let docs = StreamEvent::documents(vec![RetrievedDocument {
            content: "c".into(),
            title: "t".into(),
            author: "a".into(),
        }]);
        assert_eq!(
            serde_json::to_string(&docs).unwrap(),
            r#"{"type":"documents","data":[{"content":"c","title":"t","author":"a"}]}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::text("hi")).unwrap(),
            r#"{"type":"text","data":"hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::end()).unwrap(),
            r#"{"type":"end"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::error("boom")).unwrap(),
            r#"{"error":"boom"}"#
        );
    }

    #[test]
    fn stream_events_parse_back() {
        let end: StreamEvent = serde_json::from_str(r#"{"type":"end"}"#).unwrap();
        assert_eq!(end, StreamEvent::end());
        let err: StreamEvent = serde_json::from_str(r#"{"error":"x"}"#).unwrap();
        assert_eq!(err, StreamEvent::error("x"));
    }

    #[test]
    fn blank_metadata_is_not_a_filter() {
        let params: QueryParams =
            serde_json::from_str(r#"{"query":"q","collection_name":"c","metadata":"  "}"#).unwrap();
        assert!(params.metadata_filter().is_empty());
        assert_eq!(params.top_k, 10);
        assert_eq!(params.rerank_top_k, 5);
        assert!(!params.enhance);
    }
}
