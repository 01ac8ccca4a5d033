use axum::{routing::get, Router};
use capsule_engine::ContainerRuntime;
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes<R: ContainerRuntime>() -> Router<Arc<AppState<R>>> {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/session", get(handlers::open_session::<R>))
}
