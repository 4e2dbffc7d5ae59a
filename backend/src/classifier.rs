use std::path::Path;
use std::sync::{Arc, Mutex};

use tch::nn::{self, ModuleT};
use tch::{Device, Kind};

use shared::model::{self, ModelMetadata};

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("failed to read model metadata: {0}")]
    Metadata(#[from] std::io::Error),
    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("model produced an empty output")]
    EmptyOutput,
    #[error("predicted class index {0} has no label")]
    UnknownClass(usize),
}

/// The trained CNN plus the class labels it was trained with, loaded once
/// at startup and shared across requests.
#[derive(Clone)]
pub struct Classifier {
    net: Arc<Mutex<nn::SequentialT>>,
    metadata: ModelMetadata,
    device: Device,
}

impl Classifier {
    /// Loads the metadata sidecar and the weights from `model_dir`. The
    /// artifact is treated as immutable from here on.
    pub fn load(model_dir: &Path) -> Result<Self, ClassifierError> {
        let metadata = ModelMetadata::load(&model_dir.join(model::METADATA_FILE))?;
        let device = Device::cuda_if_available();
        let mut vs = nn::VarStore::new(device);
        let net = model::retina_cnn(&vs.root(), metadata.classes.len() as i64);
        vs.load(model_dir.join(model::WEIGHTS_FILE))?;
        Ok(Self {
            net: Arc::new(Mutex::new(net)),
            metadata,
            device,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.metadata.classes
    }

    /// Runs the forward pass over one preprocessed image and returns the
    /// arg-max class name with its probability as a percentage.
    pub fn predict(&self, pixels: &[f32]) -> Result<(String, f32), ClassifierError> {
        let input = model::input_tensor(pixels, self.metadata.img_size).to_device(self.device);
        let output = tch::no_grad(|| {
            self.net
                .lock()
                .unwrap()
                .forward_t(&input, false)
                .softmax(-1, Kind::Float)
                .view([-1])
                .to_device(Device::Cpu)
        });
        let probabilities = Vec::<f32>::try_from(&output)?;

        let (best, probability) = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .ok_or(ClassifierError::EmptyOutput)?;
        let class = self
            .metadata
            .classes
            .get(best)
            .cloned()
            .ok_or(ClassifierError::UnknownClass(best))?;

        Ok((class, probability * 100.0))
    }
}

#[cfg(test)]
impl Classifier {
    /// A freshly initialized network with random weights, for route tests
    /// that never exercise a real prediction.
    pub fn untrained(classes: Vec<String>) -> Self {
        let device = Device::Cpu;
        let vs = nn::VarStore::new(device);
        let metadata = ModelMetadata::new(classes);
        let net = model::retina_cnn(&vs.root(), metadata.classes.len() as i64);
        Self {
            net: Arc::new(Mutex::new(net)),
            metadata,
            device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::preprocess::IMG_SIZE;

    #[test]
    fn untrained_model_still_yields_a_known_class() {
        let classifier = Classifier::untrained(vec!["cataract".into(), "normal".into()]);
        let pixels = vec![0.5f32; (IMG_SIZE * IMG_SIZE) as usize];
        let (class, confidence) = classifier.predict(&pixels).unwrap();
        assert!(classifier.classes().contains(&class));
        assert!((0.0..=100.0).contains(&confidence));
    }
}
