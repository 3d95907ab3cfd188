mod health;
mod metrics;
mod predict_image;

pub use health::healthcheck;
pub use metrics::metrics_handler;
pub use predict_image::predict_image;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(healthcheck).post(predict_image))
        .route("/health", get(healthcheck))
        .route("/predict", post(predict_image))
        .route("/metrics", get(metrics_handler))
}
