//! Expediente collection endpoints.

use axum::{
    body::Bytes,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::models::Expediente;
use crate::sync::Origin;
use crate::AppState;

/// Result of a replace-all write.
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    pub count: usize,
}

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /api/expedientes - Full current collection.
pub async fn list_expedientes(State(state): State<AppState>) -> ApiResult<Vec<Expediente>> {
    tracing::debug!("GET /api/expedientes requested");
    let records = state.store.get_all().await;
    success(records.as_ref().clone())
}

/// POST /api/expedientes - Replace the whole collection.
///
/// The body is read as JSON whatever its `Content-Type`; anything that is
/// not a JSON array is a 400.
pub async fn replace_expedientes(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<WriteResponse> {
    let payload: serde_json::Value = serde_json::from_slice(&body)?;
    let records = state.sync.accept(payload)?;
    let snapshot = state.sync.commit(Origin::Fallback, records).await;

    success(WriteResponse {
        success: true,
        count: snapshot.records.len(),
    })
}

/// GET /api/expedientes/search - Records whose numero or asunto contain `q`.
pub async fn search_expedientes(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Vec<Expediente>> {
    let records = state.store.get_all().await;
    let matches = records
        .iter()
        .filter(|record| record.matches(&params.q))
        .cloned()
        .collect();
    success(matches)
}
