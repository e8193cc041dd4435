use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use super::detail;
use crate::app::AppState;

/// POST /load-knowledge: re-read the source document and rebuild the index.
pub async fn load_knowledge_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.generator.load_knowledge().await {
        Ok(report) => {
            info!(
                collection = %report.collection,
                source = %report.source,
                chunks = report.chunks,
                "knowledge base loaded"
            );
            Ok(Json(json!({
                "status": "success",
                "message": "Knowledge base loaded",
                "collection": report.collection,
                "chunks": report.chunks,
            })))
        }
        Err(e) => {
            error!(error = %e, "knowledge base load failed");
            Err(detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
