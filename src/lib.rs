mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod normalizer;
pub mod ort_classifier;
pub mod prediction;
pub mod state;

pub use app::start_app;
