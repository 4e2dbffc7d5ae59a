//! The CNN architecture and its on-disk artifact layout.
//!
//! The trainer and the backend must build the exact same variable graph for
//! `VarStore::load` to find every weight, so the network is defined once
//! here and both sides call it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tch::nn::{self, SequentialT};
use tch::Tensor;

use crate::preprocess::IMG_SIZE;

pub const WEIGHTS_FILE: &str = "retina_cnn.safetensors";
pub const METADATA_FILE: &str = "metadata.json";

// Three conv/pool stages shrink a 100x100 input to 64 maps of 10x10.
const FLAT_DIM: i64 = 64 * 10 * 10;

/// Builds the classifier network. Outputs are logits; apply softmax at the
/// call site when probabilities are needed.
pub fn retina_cnn(vs: &nn::Path, num_classes: i64) -> SequentialT {
    nn::seq_t()
        .add(nn::conv2d(vs / "conv1", 1, 32, 3, Default::default()))
        .add_fn(|x| x.relu().max_pool2d_default(2))
        .add(nn::conv2d(vs / "conv2", 32, 64, 3, Default::default()))
        .add_fn(|x| x.relu().max_pool2d_default(2))
        .add(nn::conv2d(vs / "conv3", 64, 64, 3, Default::default()))
        .add_fn(|x| x.relu().max_pool2d_default(2))
        .add_fn_t(|x, train| x.dropout(0.25, train))
        .add_fn(|x| x.flat_view())
        .add(nn::linear(vs / "fc1", FLAT_DIM, 128, Default::default()))
        .add_fn(|x| x.relu())
        .add(nn::linear(vs / "fc2", 128, 128, Default::default()))
        .add_fn(|x| x.relu())
        .add(nn::linear(vs / "out", 128, num_classes, Default::default()))
}

/// Shapes a flat `[0,1]` pixel buffer into an `[N, 1, size, size]` batch.
pub fn input_tensor(pixels: &[f32], img_size: u32) -> Tensor {
    Tensor::from_slice(pixels).view([-1, 1, img_size as i64, img_size as i64])
}

/// Written by the trainer next to the weights and read by the backend, so
/// the class index to name mapping travels with the model artifact instead
/// of being re-derived from the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub classes: Vec<String>,
    pub img_size: u32,
}

impl ModelMetadata {
    pub fn new(classes: Vec<String>) -> Self {
        Self {
            classes,
            img_size: IMG_SIZE,
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;
    use tch::nn::ModuleT;

    #[test]
    fn forward_pass_shape_matches_class_count() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = retina_cnn(&vs.root(), 4);
        let pixels = vec![0.5f32; 2 * (IMG_SIZE * IMG_SIZE) as usize];
        let input = input_tensor(&pixels, IMG_SIZE);
        let output = net.forward_t(&input, false);
        assert_eq!(output.size(), vec![2, 4]);
    }

    #[test]
    fn metadata_round_trips_through_disk() {
        let path = std::env::temp_dir().join("retina_metadata_test.json");
        let metadata = ModelMetadata::new(vec!["cataract".into(), "normal".into()]);
        metadata.save(&path).unwrap();
        let loaded = ModelMetadata::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.classes, metadata.classes);
        assert_eq!(loaded.img_size, IMG_SIZE);
    }
}
