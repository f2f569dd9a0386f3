pub mod logs;
pub mod stripe;

pub use logs::list_webhook_logs;
pub use stripe::{handle_stripe_webhook, stripe_webhook_status};

use axum::{Router, routing::get};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/webhook/stripe",
            get(stripe_webhook_status).post(handle_stripe_webhook),
        )
        .route("/webhooks/logs", get(list_webhook_logs))
}
