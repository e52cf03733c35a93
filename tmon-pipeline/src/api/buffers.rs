//! Accumulator ingress and manual flush
//!
//! POST /articles/:issue/:requester?end_of_stream=bool takes a line-delimited
//! JSON body of articles. Every line must parse into a complete article for
//! the path's key, or nothing from the request is accepted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use tmon_common::wire::from_ndjson;
use tmon_common::{Article, QueryKey};

use crate::accumulator::FlushOutcome;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct IngestParams {
    #[serde(default)]
    pub end_of_stream: bool,
}

/// Outcome of an accept or flush, as reported to the caller
#[derive(Debug, Serialize)]
pub struct FlushResponse {
    /// "buffered", "flushed" or "retained"
    pub outcome: String,
    /// Articles left in the buffer
    pub buffered: usize,
    /// Articles handed to compute by this request
    pub flushed: usize,
    pub results: usize,
    /// Results still waiting on the requester
    pub undelivered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<FlushOutcome> for FlushResponse {
    fn from(outcome: FlushOutcome) -> Self {
        match outcome {
            FlushOutcome::Buffered { size } => Self {
                outcome: "buffered".to_string(),
                buffered: size,
                flushed: 0,
                results: 0,
                undelivered: 0,
                error: None,
            },
            FlushOutcome::Flushed {
                articles,
                results,
                undelivered,
            } => Self {
                outcome: "flushed".to_string(),
                buffered: 0,
                flushed: articles,
                results,
                undelivered,
                error: None,
            },
            FlushOutcome::Retained { size, error } => Self {
                outcome: "retained".to_string(),
                buffered: size,
                flushed: 0,
                results: 0,
                undelivered: 0,
                error: Some(error.to_string()),
            },
        }
    }
}

fn path_key(issue: String, requester: String) -> ApiResult<QueryKey> {
    QueryKey::new(issue, requester).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// POST /articles/:issue/:requester
///
/// Returns 202 Accepted; a compute failure still accepts the articles,
/// which stay buffered (outcome "retained").
pub async fn ingest_articles(
    State(state): State<AppState>,
    Path((issue, requester)): Path<(String, String)>,
    Query(params): Query<IngestParams>,
    body: String,
) -> ApiResult<(StatusCode, Json<FlushResponse>)> {
    let key = path_key(issue, requester)?;

    let articles: Vec<Article> = from_ndjson(&body)?;
    for article in &articles {
        article.validate()?;
        if article.query_key() != key {
            return Err(ApiError::BadRequest(format!(
                "article {} belongs to {}, not {}",
                article.id,
                article.query_key(),
                key
            )));
        }
    }

    tracing::debug!(
        key = %key,
        articles = articles.len(),
        end_of_stream = params.end_of_stream,
        "Articles received"
    );

    let outcome = state
        .accumulator
        .accept(&key, articles, params.end_of_stream)
        .await;
    Ok((StatusCode::ACCEPTED, Json(outcome.into())))
}

/// POST /buffers/:issue/:requester/flush
pub async fn flush_buffer(
    State(state): State<AppState>,
    Path((issue, requester)): Path<(String, String)>,
) -> ApiResult<Json<FlushResponse>> {
    let key = path_key(issue, requester)?;
    let outcome = state.accumulator.retry_flush(&key).await?;
    Ok(Json(outcome.into()))
}

pub fn buffer_routes() -> Router<AppState> {
    Router::new()
        .route("/articles/:issue/:requester", post(ingest_articles))
        .route("/buffers/:issue/:requester/flush", post(flush_buffer))
}
