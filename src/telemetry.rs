use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};

/// Bucket bounds for decode plus CPU inference of a single 224x224 image.
const PREDICTION_LATENCY_BUCKETS_MS: [f64; 12] = [
    5.0, 10.0, 20.0, 35.0, 50.0, 75.0, 100.0, 150.0, 250.0, 500.0, 1000.0, 2000.0,
];

pub struct Metrics {
    prediction_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    provider: SdkMeterProvider,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("leaf_classifier");

        let prediction_counter = meter
            .u64_counter("predictions_total")
            .with_description("Total number of prediction requests by outcome")
            .build();

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(PREDICTION_LATENCY_BUCKETS_MS.to_vec())
            .with_description("Duration of decode and inference in milliseconds")
            .build();

        Ok(Metrics {
            prediction_counter,
            prediction_duration,
            provider,
            registry,
        })
    }

    /// Makes this provider the global one so the HTTP metrics layer reports
    /// into the same registry.
    pub fn install_global(&self) {
        global::set_meter_provider(self.provider.clone());
    }

    pub fn record_prediction(&self, outcome: &str) {
        let attributes = vec![KeyValue::new("outcome", outcome.to_string())];
        self.prediction_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, outcome: &str) {
        let attributes = vec![KeyValue::new("outcome", outcome.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
