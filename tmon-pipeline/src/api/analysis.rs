//! On-demand analysis handler

use axum::{extract::State, routing::post, Json, Router};

use crate::analysis::{AnalysisReport, AnalysisRequest};
use crate::error::ApiResult;
use crate::AppState;

/// POST /analysis
///
/// Runs search, lookup, compute and result delivery inline and reports the
/// counts. Results that could not be delivered are retained for the key.
pub async fn run_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<Json<AnalysisReport>> {
    let report = state.analysis.run(request).await?;
    Ok(Json(report))
}

pub fn analysis_routes() -> Router<AppState> {
    Router::new().route("/analysis", post(run_analysis))
}
