use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, Sse},
        Html, IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use minijinja::Environment;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::answer::{join_context, AnswerGenerator, AnswerStream};
use crate::error::ApiError;
use crate::models::{
    CollectionsResponse, QueryParams, StreamEvent, NOT_FOUND_ANSWER, NOT_FOUND_STREAM,
};
use crate::rag::Retriever;
use crate::templates::{self, IndexPage};

pub struct AppState {
    pub retriever: Retriever,
    pub answers: AnswerGenerator,
    pub templates: Environment<'static>,
}

impl AppState {
    pub fn new(retriever: Retriever, answers: AnswerGenerator) -> anyhow::Result<Self> {
        Ok(Self {
            retriever,
            answers,
            templates: templates::environment()?,
        })
    }

    /// Collection names, or an empty list when the store is unreachable.
    async fn collection_names(&self) -> Vec<String> {
        match self.retriever.list_collections().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Failed to get collection names: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Query used for retrieval, optionally rewritten first.
    async fn search_query(&self, params: &QueryParams) -> anyhow::Result<String> {
        if params.enhance {
            self.answers.enhance_query(&params.query).await
        } else {
            Ok(params.query.clone())
        }
    }
}

pub fn router(state: Arc<AppState>, static_dir: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(home_handler))
        .route("/query", get(query_handler))
        .route("/stream_query", get(stream_query_handler))
        .route("/get_collections", get(get_collections_handler))
        .route("/health", get(health_check))
        .route_service(
            "/favicon.ico",
            ServeFile::new(format!("{}/favicon.ico", static_dir)),
        )
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn home_handler(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let page = IndexPage::empty(state.collection_names().await);
    render(&state, &page)
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Html<String>, ApiError> {
    let documents = async {
        let search_query = state.search_query(&params).await?;
        state
            .retriever
            .search(
                &search_query,
                &params.collection_name,
                &params.metadata_filter(),
                params.top_k,
                params.rerank_top_k,
            )
            .await
    }
    .await
    .map_err(|e| {
        tracing::error!("Query failed: {:#}", e);
        ApiError::query_failed(&e)
    })?;

    let query_answer = if documents.is_empty() {
        NOT_FOUND_ANSWER.to_string()
    } else {
        state
            .answers
            .answer(&params.query, &join_context(&documents))
            .await
            .map_err(|e| {
                tracing::error!("Answer generation failed: {:#}", e);
                ApiError::query_failed(&e)
            })?
    };

    let page = IndexPage {
        collection_names: state.collection_names().await,
        collection_name: Some(params.collection_name),
        query: Some(params.query),
        query_answer: Some(query_answer),
        documents,
        top_k: params.top_k,
        rerank_top_k: params.rerank_top_k,
    };
    render(&state, &page)
}

async fn stream_query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Response {
    let request_id = Uuid::new_v4();
    tracing::info!(
        %request_id,
        "Stream query: {}, collection: {}",
        params.query,
        params.collection_name
    );

    let retrieved = async {
        let search_query = state.search_query(&params).await?;
        state
            .retriever
            .search(
                &search_query,
                &params.collection_name,
                &params.metadata_filter(),
                params.top_k,
                params.rerank_top_k,
            )
            .await
    }
    .await;

    let documents = match retrieved {
        Ok(documents) => documents,
        Err(e) => {
            tracing::error!(%request_id, "Stream query failed: {:#}", e);
            return single_event(StreamEvent::error(format!("查询失败: {:#}", e)));
        }
    };

    if documents.is_empty() {
        tracing::info!(%request_id, "No documents found");
        return single_event(StreamEvent::error(NOT_FOUND_STREAM));
    }

    tracing::info!(%request_id, "Found {} documents", documents.len());
    let fragments = state
        .answers
        .generate(&params.query, &join_context(&documents));
    let events = stream::once(async move { StreamEvent::documents(documents) })
        .chain(answer_events(fragments))
        .map(|event| to_sse(&event));

    Sse::new(events).into_response()
}

async fn get_collections_handler(State(state): State<Arc<AppState>>) -> Json<CollectionsResponse> {
    match state.retriever.list_collections().await {
        Ok(collections) => Json(CollectionsResponse {
            collections,
            error: None,
        }),
        Err(e) => {
            tracing::warn!("Failed to get collection names: {:#}", e);
            Json(CollectionsResponse {
                collections: Vec::new(),
                error: Some(e.to_string()),
            })
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// One `text` event per fragment, then `end`; an upstream error replaces
/// `end` with a single error event.
fn answer_events(fragments: AnswerStream) -> impl Stream<Item = StreamEvent> {
    stream::unfold(Some(fragments), |state| async move {
        let mut fragments = state?;
        match fragments.next().await {
            Some(Ok(text)) => Some((StreamEvent::text(text), Some(fragments))),
            Some(Err(e)) => {
                tracing::error!("Answer stream failed: {}", e);
                Some((StreamEvent::error(format!("生成失败: {}", e)), None))
            }
            None => Some((StreamEvent::end(), None)),
        }
    })
}

fn to_sse(event: &StreamEvent) -> Result<Event, Infallible> {
    Ok(Event::default().data(serde_json::to_string(event).unwrap_or_default()))
}

fn single_event(event: StreamEvent) -> Response {
    Sse::new(stream::once(async move { to_sse(&event) })).into_response()
}

fn render(state: &AppState, page: &IndexPage) -> Result<Html<String>, ApiError> {
    templates::render_index(&state.templates, page)
        .map(Html)
        .map_err(|e| {
            tracing::error!("Template error: {:#}", e);
            ApiError::internal(format!("模板渲染失败: {}", e))
        })
}
