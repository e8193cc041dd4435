use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::detail;
use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct QuestionQs {
    question: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionBody {
    question: String,
}

/// POST /test-query: ask the generator directly, bypassing WhatsApp.
///
/// The question comes from `?question=` or a JSON body `{"question": ...}`.
/// Queries are stateless: no session history is read or written.
pub async fn test_query_handler(
    State(state): State<Arc<AppState>>,
    Query(qs): Query<QuestionQs>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let question = match qs.question {
        Some(q) => q,
        None if body.is_empty() => {
            return Err(detail(StatusCode::UNPROCESSABLE_ENTITY, "question is required"));
        }
        None => {
            serde_json::from_slice::<QuestionBody>(&body)
                .map_err(|e| detail(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?
                .question
        }
    };
    if question.trim().is_empty() {
        return Err(detail(StatusCode::UNPROCESSABLE_ENTITY, "question is required"));
    }

    let deadline = Duration::from_secs(state.config.agent.generation_timeout_secs.max(1));
    match tokio::time::timeout(deadline, state.generator.query(&question, None)).await {
        Ok(Ok(answer)) => Ok(Json(json!({"question": question, "answer": answer}))),
        Ok(Err(e)) => {
            warn!(error = %e, "test query failed");
            Err(detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
        Err(_) => Err(detail(
            StatusCode::GATEWAY_TIMEOUT,
            "answer generation timed out",
        )),
    }
}
