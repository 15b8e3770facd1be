use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::Settings;
use crate::error::ProviderError;
use crate::llm::{ChatClient, ChatCompletions};
use crate::models::{ChatRequest, Message, RetrievedDocument};

const ANSWER_SYSTEM_PROMPT: &str = "你是一个会根据已知文本进行总结的专家，给出简洁的回答。";

const ENHANCE_SYSTEM_PROMPT: &str = "你是一个专业的RAG信息检索专家，请根据用户的问题进行完善，\
我会把你的回答向量化，在文本数据库中进行相似度识别。\
当用户的问题很模糊的时候，希望你可以给出更加准确和全面的检索词。";

/// Fragments buffered between the upstream reader and the HTTP writer.
const FRAGMENT_BUFFER: usize = 32;

pub type AnswerStream = ReceiverStream<Result<String, ProviderError>>;

/// Turns a question plus retrieved context into a streamed answer.
#[derive(Clone)]
pub struct AnswerGenerator {
    chat: Arc<dyn ChatClient>,
    model: String,
    enhance_model: String,
    temperature: f32,
}

impl AnswerGenerator {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        model: impl Into<String>,
        enhance_model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            chat,
            model: model.into(),
            enhance_model: enhance_model.into(),
            temperature,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let chat = ChatCompletions::new(
            &settings.openai_base_url,
            settings.openai_api_key.clone(),
            settings.http_timeout(),
        )?;
        Ok(Self::new(
            Arc::new(chat),
            &settings.chat_model,
            &settings.enhance_model,
            settings.chat_temperature,
        ))
    }

    /// Streams answer fragments. The upstream reader runs in its own task and
    /// stops as soon as the returned stream is dropped, even while upstream is
    /// silent. An upstream failure, or a panic in the reader, is delivered once
    /// as an `Err` item, after which the stream ends.
    pub fn generate(&self, query: &str, context: &str) -> AnswerStream {
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let chat = Arc::clone(&self.chat);
        let request = self.answer_request(query, context);

        tokio::spawn(async move {
            let result = AssertUnwindSafe(forward_fragments(chat, request, &tx))
                .catch_unwind()
                .await;

            if let Err(panic_info) = result {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("answer generation panicked: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("answer generation panicked: {}", s)
                } else {
                    "answer generation panicked".to_string()
                };
                tracing::error!("{}", panic_msg);
                let _ = tx.send(Err(ProviderError::Internal(panic_msg))).await;
            }
        });

        ReceiverStream::new(rx)
    }

    /// Blocks until the whole answer has been generated.
    pub async fn answer(&self, query: &str, context: &str) -> Result<String> {
        let mut stream = self.generate(query, context);
        let mut answer = String::new();
        while let Some(fragment) = stream.next().await {
            answer.push_str(&fragment?);
        }
        Ok(answer)
    }

    /// Rewrites a vague question into sharper search terms.
    pub async fn enhance_query(&self, query: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.enhance_model.clone(),
            messages: vec![Message::system(ENHANCE_SYSTEM_PROMPT), Message::user(query)],
            temperature: None,
            stream: None,
        };
        let enhanced = self.chat.complete(request).await?;
        tracing::info!("Enhanced query: {}", enhanced);
        Ok(enhanced)
    }

    fn answer_request(&self, query: &str, context: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(ANSWER_SYSTEM_PROMPT),
                Message::user(build_prompt(query, context)),
            ],
            temperature: Some(self.temperature),
            stream: Some(true),
        }
    }
}

async fn forward_fragments(
    chat: Arc<dyn ChatClient>,
    request: ChatRequest,
    tx: &mpsc::Sender<Result<String, ProviderError>>,
) {
    let opened = tokio::select! {
        _ = tx.closed() => {
            tracing::debug!("Answer consumer went away before upstream answered");
            return;
        }
        opened = chat.stream(request) => opened,
    };
    let mut fragments = match opened {
        Ok(fragments) => fragments,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    };

    loop {
        let item = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!("Answer consumer went away, stopping generation");
                return;
            }
            item = fragments.next() => item,
        };
        let Some(item) = item else {
            return;
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            return;
        }
    }
}

pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "以下是与查询相关的内容：\n\n{}\n\n请根据以上信息回答下面的问题：\n{}\n回答：",
        context, query
    )
}

/// Contents only, blank-line separated.
pub fn join_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|doc| doc.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FragmentStream;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::task::Poll;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedChat {
        fragments: Vec<Result<String, String>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
            self.requests.lock().unwrap().push(request);
            Ok("耕田队 定义 苏区".to_string())
        }

        async fn stream(&self, request: ChatRequest) -> Result<FragmentStream, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let items: Vec<Result<String, ProviderError>> = self
                .fragments
                .iter()
                .map(|f| f.clone().map_err(ProviderError::InvalidResponse))
                .collect();
            Ok(stream::iter(items).boxed())
        }
    }

    /// Sets its flag when the upstream stream holding it is dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// One fragment, then silence until dropped.
    struct StallingChat {
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ChatClient for StallingChat {
        async fn complete(&self, _request: ChatRequest) -> Result<String, ProviderError> {
            Ok(String::new())
        }

        async fn stream(&self, _request: ChatRequest) -> Result<FragmentStream, ProviderError> {
            let flag = DropFlag(Arc::clone(&self.dropped));
            Ok(stream::iter(vec![Ok("a".to_string())])
                .chain(stream::pending())
                .map(move |item| {
                    let _ = &flag;
                    item
                })
                .boxed())
        }
    }

    /// One fragment, then the reader panics.
    struct PanickingChat;

    #[async_trait]
    impl ChatClient for PanickingChat {
        async fn complete(&self, _request: ChatRequest) -> Result<String, ProviderError> {
            Ok(String::new())
        }

        async fn stream(&self, _request: ChatRequest) -> Result<FragmentStream, ProviderError> {
            Ok(stream::iter(vec![Ok("a".to_string())])
                .chain(stream::poll_fn(
                    |_cx| -> Poll<Option<Result<String, ProviderError>>> {
                        panic!("decoder state corrupted")
                    },
                ))
                .boxed())
        }
    }

    fn generator(chat: Arc<dyn ChatClient>) -> AnswerGenerator {
        AnswerGenerator::new(chat, "gpt-4o", "gpt-4o-mini", 0.1)
    }

    #[test]
    fn prompt_embeds_context_then_question() {
        let prompt = build_prompt("什么是耕田队", "甲\n\n乙");
        assert_eq!(
            prompt,
            "以下是与查询相关的内容：\n\n甲\n\n乙\n\n请根据以上信息回答下面的问题：\n什么是耕田队\n回答："
        );
    }

    #[test]
    fn context_joins_contents_only() {
        let docs = vec![
            RetrievedDocument {
                content: "a".into(),
                title: "t".into(),
                author: "x".into(),
            },
            RetrievedDocument {
                content: "b".into(),
                title: "t".into(),
                author: "x".into(),
            },
        ];
        assert_eq!(join_context(&docs), "a\n\nb");
    }

    #[tokio::test]
    async fn answer_concatenates_fragments() {
        let chat = Arc::new(ScriptedChat {
            fragments: vec![Ok("耕田".into()), Ok("队".into())],
            ..Default::default()
        });
        let answer = generator(chat.clone()).answer("q", "ctx").await.unwrap();
        assert_eq!(answer, "耕田队");

        let requests = chat.requests.lock().unwrap();
        assert_eq!(requests[0].model, "gpt-4o");
        assert_eq!(requests[0].stream, Some(true));
        assert_eq!(requests[0].temperature, Some(0.1));
        assert_eq!(requests[0].messages[0].role, "system");
        assert!(requests[0].messages[1].content.contains("ctx"));
    }

    #[tokio::test]
    async fn stream_ends_after_first_error() {
        let chat = Arc::new(ScriptedChat {
            fragments: vec![Ok("a".into()), Err("boom".into()), Ok("never".into())],
            ..Default::default()
        });
        let items: Vec<_> = generator(chat).generate("q", "ctx").collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn answer_surfaces_mid_stream_failure() {
        let chat = Arc::new(ScriptedChat {
            fragments: vec![Ok("a".into()), Err("boom".into())],
            ..Default::default()
        });
        let err = generator(chat).answer("q", "ctx").await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn enhance_uses_enhance_model_without_streaming() {
        let chat = Arc::new(ScriptedChat::default());
        let enhanced = generator(chat.clone()).enhance_query("耕田队").await.unwrap();
        assert_eq!(enhanced, "耕田队 定义 苏区");

        let requests = chat.requests.lock().unwrap();
        assert_eq!(requests[0].model, "gpt-4o-mini");
        assert_eq!(requests[0].messages[1].content, "耕田队");
        assert!(requests[0].stream.is_none());
    }

    #[tokio::test]
    async fn dropping_answer_stops_silent_upstream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let chat = Arc::new(StallingChat {
            dropped: Arc::clone(&dropped),
        });
        let mut answer = generator(chat).generate("q", "ctx");
        assert_eq!(answer.next().await.unwrap().unwrap(), "a");
        assert!(!dropped.load(Ordering::SeqCst));

        drop(answer);
        tokio::time::timeout(Duration::from_secs(2), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("upstream stream should be released after the consumer leaves");
    }

    #[tokio::test]
    async fn reader_panic_becomes_error_item() {
        let items: Vec<_> = generator(Arc::new(PanickingChat))
            .generate("q", "ctx")
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        match &items[1] {
            Err(ProviderError::Internal(msg)) => assert!(msg.contains("decoder state corrupted")),
            other => panic!("expected internal error, got {:?}", other),
        }

        let err = generator(Arc::new(PanickingChat))
            .answer("q", "ctx")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }
}
