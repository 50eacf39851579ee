use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use common::{MergeOutcome, MergerMessage};

use crate::assembly::AssemblyView;
use crate::merger::Merger;

pub fn build_router(merger: Arc<Merger>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/messages", post(post_message))
        .route("/api/v1/results/:job_id", get(get_result))
        .layer(TraceLayer::new_for_http())
        .with_state(merger)
}

async fn health() -> &'static str {
    "ok"
}

// Un mensaje del coordinador -> el estado resultante del job
async fn post_message(
    State(merger): State<Arc<Merger>>,
    Json(msg): Json<MergerMessage>,
) -> Json<MergeOutcome> {
    Json(merger.handle(msg))
}

async fn get_result(
    State(merger): State<Arc<Merger>>,
    Path(job_id): Path<String>,
) -> Result<Json<AssemblyView>, StatusCode> {
    merger.view(&job_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}
