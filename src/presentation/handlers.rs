// HTTP request handlers
use crate::domain::sample::Sample;
use crate::presentation::app_state::AppState;
use crate::presentation::responses::{
    ErrorResponse, FlagsResponse, ReadingRequest, ReadingResponse, StateResponse,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Alkalinity status and oscillation statistics
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    let snapshot = state.monitor.current_state();
    Json(StateResponse::from(snapshot.as_ref()))
}

/// High / low pH flags
pub async fn get_flags(State(state): State<Arc<AppState>>) -> Json<FlagsResponse> {
    let snapshot = state.monitor.current_state();
    Json(FlagsResponse::from(snapshot.as_ref()))
}

/// Push a reading from an external sensor
pub async fn post_reading(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReadingRequest>,
) -> impl IntoResponse {
    let sample = Sample::new(request.timestamp.unwrap_or_else(Utc::now), request.value);

    match state.monitor.ingest(sample).await {
        Ok(outcome) => (StatusCode::OK, Json(ReadingResponse::from(outcome))).into_response(),
        Err(e) => {
            tracing::warn!("Rejected pushed reading: {}", e);
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
