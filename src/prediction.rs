use crate::{
    normalizer::{ImageNormalizer, NormalizeError},
    state::{LoadedModel, ModelState},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Model is not loaded")]
    ModelUnavailable,
    #[error("No file uploaded")]
    NoFile,
    #[error("No file selected")]
    NoFileSelected,
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("Uploaded file is not a decodable image: {0}")]
    Decode(String),
    #[error("Model returned {actual} scores for {expected} classes")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("Failed to process image: {0}")]
    InferenceFailure(String),
}

impl PredictionError {
    /// Errors caused by the request rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PredictionError::NoFile
                | PredictionError::NoFileSelected
                | PredictionError::EmptyFile
                | PredictionError::Decode(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PredictionError::ModelUnavailable => "model_unavailable",
            PredictionError::NoFile | PredictionError::NoFileSelected => "no_file",
            PredictionError::EmptyFile => "empty_file",
            PredictionError::Decode(_) => "decode_error",
            PredictionError::ShapeMismatch { .. } => "shape_mismatch",
            PredictionError::InferenceFailure(_) => "inference_failure",
        }
    }
}

impl From<NormalizeError> for PredictionError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Decode(msg) => PredictionError::Decode(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: String,
    pub confidence: f32,
}

/// Index and value of the largest score. Ties go to the lowest index and NaN
/// never wins.
pub fn arg_max(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, value)| !value.is_nan())
        .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
}

pub struct PredictionService {
    model: Arc<ModelState>,
    normalizer: ImageNormalizer,
}

impl PredictionService {
    pub fn new(model: ModelState, normalizer: ImageNormalizer) -> Self {
        Self {
            model: Arc::new(model),
            normalizer,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_ready()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self.model.as_ref() {
            ModelState::Ready(_) => None,
            ModelState::Unavailable { reason } => Some(reason),
        }
    }

    /// Classifies one uploaded image. Decoding and inference run on the
    /// blocking pool; a panic there is reported as an inference failure.
    #[instrument(skip(self, image_data), fields(bytes = image_data.len()))]
    pub async fn predict(&self, image_data: Vec<u8>) -> Result<PredictionResult, PredictionError> {
        let model = match self.model.as_ref() {
            ModelState::Ready(model) => model.clone(),
            ModelState::Unavailable { .. } => return Err(PredictionError::ModelUnavailable),
        };

        if image_data.is_empty() {
            return Err(PredictionError::EmptyFile);
        }

        let normalizer = self.normalizer;
        tokio::task::spawn_blocking(move || classify(&model, &normalizer, &image_data))
            .await
            .map_err(|e| PredictionError::InferenceFailure(e.to_string()))?
    }
}

fn classify(
    model: &LoadedModel,
    normalizer: &ImageNormalizer,
    image_data: &[u8],
) -> Result<PredictionResult, PredictionError> {
    let input = normalizer.normalize(image_data)?;

    let scores = model
        .classifier()
        .infer(&input)
        .map_err(|e| PredictionError::InferenceFailure(e.to_string()))?;

    let catalog = model.catalog();
    if scores.len() != catalog.len() {
        return Err(PredictionError::ShapeMismatch {
            expected: catalog.len(),
            actual: scores.len(),
        });
    }

    let (index, confidence) = arg_max(&scores).ok_or_else(|| {
        PredictionError::InferenceFailure("model returned no usable scores".to_string())
    })?;
    // Scores must be probabilities; logits or overflow mean a misconfigured artifact.
    if !(0.0..=1.0).contains(&confidence) {
        return Err(PredictionError::InferenceFailure(format!(
            "score {} at index {} is not a probability",
            confidence, index
        )));
    }
    let label = catalog
        .get(index)
        .ok_or_else(|| PredictionError::InferenceFailure(format!("no label at index {}", index)))?;

    tracing::debug!("Predicted {} ({:.3})", label, confidence);

    Ok(PredictionResult {
        label: label.to_string(),
        confidence,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        catalog::ClassCatalog,
        classifier::{Classifier, ClassifierError},
        config::PixelScaling,
        normalizer::{tests::solid_png, ImageTensor},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const PLANT_VILLAGE_LABELS: [&str; 38] = [
        "Apple___Apple_scab",
        "Apple___Black_rot",
        "Apple___Cedar_apple_rust",
        "Apple___healthy",
        "Blueberry___healthy",
        "Cherry_(including_sour)___Powdery_mildew",
        "Cherry_(including_sour)___healthy",
        "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
        "Corn_(maize)___Common_rust_",
        "Corn_(maize)___Northern_Leaf_Blight",
        "Corn_(maize)___healthy",
        "Grape___Black_rot",
        "Grape___Esca_(Black_Measles)",
        "Grape___Leaf_blight_(Isariopsis_Leaf_Spot)",
        "Grape___healthy",
        "Orange___Haunglongbing_(Citrus_greening)",
        "Peach___Bacterial_spot",
        "Peach___healthy",
        "Pepper,_bell___Bacterial_spot",
        "Pepper,_bell___healthy",
        "Potato___Early_blight",
        "Potato___Late_blight",
        "Potato___healthy",
        "Raspberry___healthy",
        "Soybean___healthy",
        "Squash___Powdery_mildew",
        "Strawberry___Leaf_scorch",
        "Strawberry___healthy",
        "Tomato___Bacterial_spot",
        "Tomato___Early_blight",
        "Tomato___Late_blight",
        "Tomato___Leaf_Mold",
        "Tomato___Septoria_leaf_spot",
        "Tomato___Spider_mites Two-spotted_spider_mite",
        "Tomato___Target_Spot",
        "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
        "Tomato___Tomato_mosaic_virus",
        "Tomato___healthy",
    ];

    pub(crate) fn plant_village_catalog() -> ClassCatalog {
        ClassCatalog::new(PLANT_VILLAGE_LABELS.iter().map(|l| l.to_string()).collect()).unwrap()
    }

    /// Returns a fixed score vector and counts calls.
    pub(crate) struct StubClassifier {
        scores: Vec<f32>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl StubClassifier {
        pub(crate) fn new(scores: Vec<f32>) -> Self {
            Self {
                scores,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn peaked_at(label: &str, probability: f32) -> Self {
            let index = PLANT_VILLAGE_LABELS
                .iter()
                .position(|l| *l == label)
                .unwrap();
            let rest = (1.0 - probability) / (PLANT_VILLAGE_LABELS.len() - 1) as f32;
            let mut scores = vec![rest; PLANT_VILLAGE_LABELS.len()];
            scores[index] = probability;
            Self::new(scores)
        }
    }

    impl Classifier for StubClassifier {
        fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>, ClassifierError> {
            assert_eq!(input.shape(), &[1, 224, 224, 3]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn infer(&self, _input: &ImageTensor) -> Result<Vec<f32>, ClassifierError> {
            Err(ClassifierError::Run("out of memory".to_string()))
        }
    }

    struct PanickingClassifier;

    impl Classifier for PanickingClassifier {
        fn infer(&self, _input: &ImageTensor) -> Result<Vec<f32>, ClassifierError> {
            panic!("native runtime crashed");
        }
    }

    pub(crate) fn service_with(classifier: impl Classifier) -> PredictionService {
        let model = LoadedModel::new(Arc::new(classifier), plant_village_catalog());
        PredictionService::new(
            ModelState::Ready(model),
            ImageNormalizer::new(224, PixelScaling::Raw),
        )
    }

    fn leaf_png() -> Vec<u8> {
        solid_png(320, 240, [76, 120, 40])
    }

    #[test]
    fn test_arg_max_unique_maximum() {
        assert_eq!(arg_max(&[0.1, 0.7, 0.2]), Some((1, 0.7)));
    }

    #[test]
    fn test_arg_max_ties_pick_lowest_index() {
        assert_eq!(arg_max(&[0.1, 0.4, 0.1, 0.4]), Some((1, 0.4)));
        assert_eq!(arg_max(&[0.25; 4]), Some((0, 0.25)));
    }

    #[test]
    fn test_arg_max_skips_nan() {
        assert_eq!(arg_max(&[f32::NAN, 0.2, 0.1]), Some((1, 0.2)));
        assert_eq!(arg_max(&[f32::NAN]), None);
        assert_eq!(arg_max(&[]), None);
    }

    #[tokio::test]
    async fn test_predict_late_blight() {
        let service = service_with(StubClassifier::peaked_at("Tomato___Late_blight", 0.93));

        let result = service.predict(leaf_png()).await.unwrap();

        assert_eq!(
            result,
            PredictionResult {
                label: "Tomato___Late_blight".to_string(),
                confidence: 0.93,
            }
        );
    }

    #[tokio::test]
    async fn test_predict_every_index_resolves_to_its_label() {
        for (index, label) in PLANT_VILLAGE_LABELS.iter().enumerate() {
            let mut scores = vec![0.01; PLANT_VILLAGE_LABELS.len()];
            scores[index] = 0.6;
            let service = service_with(StubClassifier::new(scores));

            let result = service.predict(leaf_png()).await.unwrap();
            assert_eq!(result.label, *label);
            assert_eq!(result.confidence, 0.6);
        }
    }

    #[tokio::test]
    async fn test_predict_tie_returns_first_label() {
        let mut scores = vec![0.0; PLANT_VILLAGE_LABELS.len()];
        scores[3] = 0.5;
        scores[20] = 0.5;
        let service = service_with(StubClassifier::new(scores));

        let result = service.predict(leaf_png()).await.unwrap();
        assert_eq!(result.label, "Apple___healthy");
        assert_eq!(result.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_empty_upload_skips_classifier() {
        let stub = StubClassifier::peaked_at("Apple___healthy", 0.9);
        let calls = stub.calls.clone();
        let service = service_with(stub);

        let result = service.predict(Vec::new()).await;

        assert!(matches!(result, Err(PredictionError::EmptyFile)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undecodable_upload() {
        let stub = StubClassifier::peaked_at("Apple___healthy", 0.9);
        let calls = stub.calls.clone();
        let service = service_with(stub);

        let result = service.predict(b"GIF89a but not really".to_vec()).await;

        let err = result.unwrap_err();
        assert!(matches!(err, PredictionError::Decode(_)));
        assert!(err.is_client_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unavailable_model() {
        let service = PredictionService::new(
            ModelState::unavailable("Model file not found"),
            ImageNormalizer::new(224, PixelScaling::Raw),
        );

        assert!(!service.is_ready());
        assert_eq!(service.unavailable_reason(), Some("Model file not found"));
        let err = service.predict(leaf_png()).await.unwrap_err();
        assert!(matches!(err, PredictionError::ModelUnavailable));
        assert!(!err.is_client_error());

        // Availability is checked before the upload itself.
        let err = service.predict(Vec::new()).await.unwrap_err();
        assert!(matches!(err, PredictionError::ModelUnavailable));
    }

    #[tokio::test]
    async fn test_scores_outside_unit_range_are_rejected() {
        for peak in [f32::INFINITY, 7.5] {
            let mut scores = vec![0.0; PLANT_VILLAGE_LABELS.len()];
            scores[30] = peak;
            let service = service_with(StubClassifier::new(scores));

            let err = service.predict(leaf_png()).await.unwrap_err();
            assert!(matches!(err, PredictionError::InferenceFailure(_)));
            assert!(!err.is_client_error());
        }

        let service = service_with(StubClassifier::new(vec![-1.0; PLANT_VILLAGE_LABELS.len()]));
        let err = service.predict(leaf_png()).await.unwrap_err();
        assert!(matches!(err, PredictionError::InferenceFailure(_)));
    }

    #[tokio::test]
    async fn test_certain_prediction_is_accepted() {
        let mut scores = vec![0.0; PLANT_VILLAGE_LABELS.len()];
        scores[30] = 1.0;
        let service = service_with(StubClassifier::new(scores));

        let result = service.predict(leaf_png()).await.unwrap();
        assert_eq!(result.label, "Tomato___Late_blight");
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_output_width_mismatch() {
        let service = service_with(StubClassifier::new(vec![0.5, 0.5]));

        let err = service.predict(leaf_png()).await.unwrap_err();
        assert!(matches!(
            err,
            PredictionError::ShapeMismatch {
                expected: 38,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_runtime_error_is_inference_failure() {
        let service = service_with(FailingClassifier);

        let err = service.predict(leaf_png()).await.unwrap_err();
        assert!(matches!(err, PredictionError::InferenceFailure(_)));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let service = service_with(PanickingClassifier);

        let err = service.predict(leaf_png()).await.unwrap_err();
        assert!(matches!(err, PredictionError::InferenceFailure(_)));

        // The service keeps answering afterwards.
        let err = service.predict(Vec::new()).await.unwrap_err();
        assert!(matches!(err, PredictionError::EmptyFile));
    }
}
