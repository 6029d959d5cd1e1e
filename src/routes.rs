// routes.rs
use std::sync::Arc;

use axum::{routing::get, Extension, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    handler::{referral::referral_handler, users::users_handler},
    AppState,
};

// Health check handler
async fn health_check(Extension(app_state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let policy = &app_state.env.commission;

    Json(json!({
        "status": "ok",
        "message": "Server is running",
        "store": app_state.store.backend(),
        "commissionPolicy": {
            "levelOneRate": policy.level_one_rate(),
            "decayDivisor": policy.decay_divisor,
            "minRate": policy.min_rate(),
            "paidLevels": policy.rates().count(),
        },
        "distribution": app_state.referral_service.engine().stats(),
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_route = Router::new()
        .nest("/referral", referral_handler())
        .nest("/users", users_handler())
        .layer(TraceLayer::new_for_http());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
        .layer(Extension(app_state))
}
