use crate::{
    classifier::{Classifier, ClassifierError},
    config::{ModelConfig, Validatable},
    normalizer::ImageTensor,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// ONNX Runtime backed classifier holding a round-robin pool of sessions.
#[derive(Clone)]
pub struct OrtClassifier {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
}

impl OrtClassifier {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ort::Error> {
        ort::init().with_name("leaf_classifier").commit()?;

        let num_instances = model_config.num_instances.max(1);
        let intra_threads = (default_threads() / num_instances).max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .with_intra_threads(intra_threads)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        // All sessions share the graph, so the first one is representative.
        let output_name = {
            let session = sessions[0]
                .lock()
                .map_err(|e| ort::Error::new(format!("session mutex poisoned: {}", e)))?;
            session
                .outputs
                .first()
                .map(|output| output.name.clone())
                .ok_or_else(|| ort::Error::new("model declares no outputs"))?
        };

        tracing::info!(
            "Created {} ONNX sessions, reading output `{}`",
            num_instances,
            output_name
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
        })
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Classifier for OrtClassifier {
    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>, ClassifierError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ClassifierError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassifierError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ClassifierError::Run(e.to_string()))?;

        let (_shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Output(e.to_string()))?;

        Ok(data.to_vec())
    }
}
