use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk};

pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError>;

    /// Yields each non-empty `delta.content` in arrival order.
    async fn stream(&self, request: ChatRequest) -> Result<FragmentStream, ProviderError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatCompletions {
    client: Client,
    streaming_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ChatCompletions {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        // Streams may legitimately outlive the request timeout.
        let streaming_client = Client::builder().connect_timeout(timeout).build()?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            streaming_client,
            base_url: base_url.into(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(
        &self,
        client: &Client,
        request: &ChatRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut req = client.post(self.endpoint()).json(request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatClient for ChatCompletions {
    async fn complete(&self, mut request: ChatRequest) -> Result<String, ProviderError> {
        request.stream = Some(false);
        let response = self.send(&self.client, &request).await?;
        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices returned".to_string()))
    }

    async fn stream(&self, mut request: ChatRequest) -> Result<FragmentStream, ProviderError> {
        request.stream = Some(true);
        let response = self.send(&self.streaming_client, &request).await?;

        let bytes = Box::pin(response.bytes_stream());
        let fragments = stream::unfold(
            (bytes, SseDecoder::default(), false),
            |(mut bytes, mut decoder, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(item) = decoder.next_fragment() {
                        return Some((item, (bytes, decoder, false)));
                    }
                    if decoder.finished() {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => decoder.push(&chunk),
                        Some(Err(e)) => return Some((Err(e.into()), (bytes, decoder, true))),
                        None => {
                            decoder.push(b"\n");
                            return decoder
                                .next_fragment()
                                .map(|item| (item, (bytes, decoder, true)));
                        }
                    }
                }
            },
        );

        Ok(fragments.boxed())
    }
}

/// Incremental parser for the `data:` lines of a chat-completion stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// True once `data: [DONE]` has been consumed.
    pub fn finished(&self) -> bool {
        self.done
    }

    /// Next content fragment from the complete lines buffered so far.
    pub fn next_fragment(&mut self) -> Option<Result<String, ProviderError>> {
        while !self.done {
            let line_end = self.buffer.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                self.done = true;
                break;
            }

            match serde_json::from_str::<StreamChunk>(data) {
                Ok(chunk) => {
                    let content = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|content| !content.is_empty());
                    if let Some(content) = content {
                        return Some(Ok(content));
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }
}
