use crate::{
    catalog::{load_class_catalog, CatalogError, ClassCatalog},
    classifier::{Classifier, ClassifierError},
    config::{ModelConfig, Validatable},
    normalizer::ImageTensor,
    ort_classifier::OrtClassifier,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Invalid model configuration: {0}")]
    Config(String),
    #[error("Failed to load labels: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Failed to load model: {0}")]
    Model(#[from] ort::Error),
    #[error("Warm-up inference failed: {0}")]
    WarmUp(#[from] ClassifierError),
    #[error("Model produces {actual} outputs but the catalog has {expected} labels")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// A classifier and the catalog naming its outputs, always held together.
#[derive(Clone)]
pub struct LoadedModel {
    classifier: Arc<dyn Classifier>,
    catalog: Arc<ClassCatalog>,
}

impl LoadedModel {
    pub fn new(classifier: Arc<dyn Classifier>, catalog: ClassCatalog) -> Self {
        Self {
            classifier,
            catalog: Arc::new(catalog),
        }
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }
}

/// Process-wide model state, decided once at startup.
#[derive(Clone)]
pub enum ModelState {
    Ready(LoadedModel),
    Unavailable { reason: String },
}

impl ModelState {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ModelState::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Ready(_))
    }
}

/// Loads the classifier and its catalog. Failures are logged and produce
/// [`ModelState::Unavailable`] so the process can keep serving health checks.
pub fn load_model_state(model_config: &ModelConfig) -> ModelState {
    match try_load_model(model_config) {
        Ok(model) => {
            tracing::info!(
                "Model and class names loaded successfully ({} classes)",
                model.catalog().len()
            );
            ModelState::Ready(model)
        }
        Err(e) => {
            tracing::error!("Error loading model or class names: {}", e);
            ModelState::unavailable(e.to_string())
        }
    }
}

fn try_load_model(model_config: &ModelConfig) -> Result<LoadedModel, LoadError> {
    model_config.validate().map_err(LoadError::Config)?;
    let catalog = load_class_catalog(&model_config.get_labels_path())?;
    let classifier = OrtClassifier::new(model_config)?;

    verify_pairing(&classifier, &catalog, model_config.input_size)?;

    Ok(LoadedModel::new(Arc::new(classifier), catalog))
}

/// Runs a zero tensor through the classifier to check the output width
/// against the catalog before any request is served.
pub fn verify_pairing(
    classifier: &dyn Classifier,
    catalog: &ClassCatalog,
    input_size: u32,
) -> Result<(), LoadError> {
    let probabilities = classifier.infer(&ImageTensor::zeros(input_size))?;
    if probabilities.len() != catalog.len() {
        return Err(LoadError::ShapeMismatch {
            expected: catalog.len(),
            actual: probabilities.len(),
        });
    }
    Ok(())
}
