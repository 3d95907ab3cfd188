use crate::normalizer::ImageTensor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("failed to build tensor: {0}")]
    Input(String),
    #[error("inference failed: {0}")]
    Run(String),
    #[error("failed to extract tensor: {0}")]
    Output(String),
}

/// A loaded image classifier. Implementations must be safe to call from any
/// number of threads at once.
pub trait Classifier: Send + Sync + 'static {
    /// Runs one forward pass and returns the probability vector of the single
    /// batch entry.
    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>, ClassifierError>;
}
