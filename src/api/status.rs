//! Server status and daily report endpoints.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::DailyReport;
use crate::status::{parse_date, today};
use crate::AppState;

/// Server health and load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub clients: usize,
    pub data_count: usize,
    pub revision: u64,
}

/// Report query parameters.
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// Reference day as YYYY-MM-DD (default: today, local time).
    #[serde(default)]
    pub date: Option<String>,
}

/// GET /api/status - Connected clients and collection size.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let snapshot = state.store.snapshot().await;
    success(StatusResponse {
        status: "ok".to_string(),
        clients: state.sync.client_count().await,
        data_count: snapshot.records.len(),
        revision: snapshot.revision,
    })
}

/// GET /api/report - Daily status counts.
pub async fn get_report(
    State(state): State<AppState>,
    Query(params): Query<ReportQuery>,
) -> ApiResult<DailyReport> {
    let reference = match params.date.as_deref() {
        Some(raw) => parse_date(raw)
            .ok_or_else(|| AppError::Validation(format!("Invalid date: {}", raw)))?,
        None => today(),
    };

    let records = state.store.get_all().await;
    success(DailyReport::compute(&records, reference))
}
