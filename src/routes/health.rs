use axum::{response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    message: String,
}

pub async fn healthcheck() -> impl IntoResponse {
    Json(Status {
        status: "ok".into(),
        message: "API is running.".into(),
    })
}
