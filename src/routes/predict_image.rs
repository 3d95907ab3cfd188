use crate::{
    prediction::{PredictionError, PredictionResult},
    server::SharedState,
};
use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum PredictImageError {
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),
}

impl PredictImageError {
    fn outcome(&self) -> &'static str {
        match self {
            PredictImageError::Prediction(err) => err.kind(),
            PredictImageError::Multipart(_) => "malformed_upload",
        }
    }
}

impl IntoResponse for PredictImageError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PredictImageError::Prediction(err) if err.is_client_error() => {
                tracing::debug!("Rejected upload: {}", err);
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            PredictImageError::Prediction(PredictionError::ModelUnavailable) => {
                tracing::error!("Prediction requested while the model is unavailable");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    PredictionError::ModelUnavailable.to_string(),
                )
            }
            PredictImageError::Prediction(err) => {
                tracing::error!("Prediction error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to process image".to_string(),
                )
            }
            PredictImageError::Multipart(err) => {
                tracing::debug!("Rejected multipart body: {}", err);
                (err.status(), err.body_text())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict_image(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, PredictImageError> {
    let started = Instant::now();
    let result = run_prediction(&state, multipart).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let outcome = match &result {
        Ok(_) => "success",
        Err(err) => err.outcome(),
    };
    state.metrics.record_prediction(outcome);
    state.metrics.record_prediction_duration(elapsed_ms, outcome);

    result.map(Json)
}

async fn run_prediction(
    state: &SharedState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<PredictionResult, PredictImageError> {
    if !state.prediction_service.is_ready() {
        return Err(PredictionError::ModelUnavailable.into());
    }

    // A body that is not multipart/form-data carries no file field.
    let multipart = multipart.map_err(|_| PredictionError::NoFile)?;
    let image_data = read_file_field(multipart).await?;

    let result = state.prediction_service.predict(image_data).await?;
    tracing::info!(
        "Predicted {} with confidence {:.3}",
        result.label,
        result.confidence
    );

    Ok(result)
}

async fn read_file_field(mut multipart: Multipart) -> Result<Vec<u8>, PredictImageError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        // A part without a filename is a plain form value, not a file.
        match field.file_name() {
            None => return Err(PredictionError::NoFile.into()),
            Some("") => return Err(PredictionError::NoFileSelected.into()),
            Some(_) => {}
        }
        let data = field.bytes().await?;
        return Ok(data.to_vec());
    }

    Err(PredictionError::NoFile.into())
}
