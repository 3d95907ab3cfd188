use crate::{
    config::Config,
    normalizer::ImageNormalizer,
    prediction::PredictionService,
    server::{HttpServer, SharedState},
    state::load_model_state,
    telemetry::Metrics,
};
use std::sync::Arc;
use tokio::signal;

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let model_config = config.model.clone();
    // Session creation and the warm-up pass are blocking work.
    let model_state = tokio::task::spawn_blocking(move || load_model_state(&model_config)).await?;

    let normalizer = ImageNormalizer::new(config.model.input_size, config.model.pixel_scaling);
    tracing::info!(
        "Serving {}x{} inputs with {:?} pixel scaling",
        normalizer.size(),
        normalizer.size(),
        normalizer.scaling()
    );
    let prediction_service = Arc::new(PredictionService::new(model_state, normalizer));
    if let Some(reason) = prediction_service.unavailable_reason() {
        tracing::warn!("Predictions disabled until restart: {}", reason);
    }

    let metrics = Arc::new(Metrics::new()?);
    metrics.install_global();

    let state = SharedState {
        prediction_service,
        metrics,
    };
    let server = HttpServer::new(state, &config.server).await?;

    server
        .run(async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown");
        })
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
