pub mod projects;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects/{slug}", get(projects::get_project))
        .route("/projects/{slug}/upgrade", post(projects::start_upgrade))
        .route("/projects/{slug}/upgrade/cancel", post(projects::cancel_upgrade))
        .route("/payments/reconcile", post(projects::reconcile_payments))
        .merge(webhooks::router())
}
