//! Labeled dataset loading, class balancing and splitting.
//!
//! The data directory holds one subdirectory per category; the category
//! index is the training label. Unreadable images are logged and skipped.

use std::fs;
use std::path::Path;

use rand::prelude::*;
use rand::rngs::StdRng;
use tch::{Device, Tensor};

use shared::preprocess::{self, IMG_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: String,
        source: std::io::Error,
    },
    #[error("no category directories found under {0}")]
    NoCategories(String),
    #[error("no readable images found under {0}")]
    NoImages(String),
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub pixels: Vec<f32>,
    pub label: i64,
}

pub struct Dataset {
    pub samples: Vec<Sample>,
    pub classes: Vec<String>,
}

impl Dataset {
    /// Walks `data_dir`, preprocessing every file under every category
    /// subdirectory. Category order (and therefore label assignment) is
    /// the sorted directory name order.
    pub fn load(data_dir: &Path) -> Result<Self, DatasetError> {
        let mut classes = Vec::new();
        for entry in read_dir(data_dir)? {
            if entry.path().is_dir() {
                classes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        classes.sort();
        if classes.is_empty() {
            return Err(DatasetError::NoCategories(data_dir.display().to_string()));
        }

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let class_dir = data_dir.join(class);
            let mut loaded = 0usize;
            for entry in read_dir(&class_dir)? {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match preprocess::preprocess(&path, None) {
                    Ok(image) => {
                        samples.push(Sample {
                            pixels: image.to_input(),
                            label: label as i64,
                        });
                        loaded += 1;
                    }
                    Err(e) => {
                        log::warn!("skipping unreadable image {}: {e}", path.display());
                    }
                }
            }
            log::info!("loaded {loaded} images for class '{class}'");
        }

        if samples.is_empty() {
            return Err(DatasetError::NoImages(data_dir.display().to_string()));
        }
        Ok(Self { samples, classes })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn shuffle(&mut self, rng: &mut StdRng) {
        self.samples.shuffle(rng);
    }

    /// Number of samples per class, indexed by label.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.classes.len()];
        for sample in &self.samples {
            counts[sample.label as usize] += 1;
        }
        counts
    }

    /// Random oversampler: duplicates randomly chosen samples of every
    /// minority class until all class counts match the majority class.
    /// Classes with no samples at all are left alone.
    pub fn oversample(&mut self, rng: &mut StdRng) {
        let counts = self.class_counts();
        let Some(&target) = counts.iter().max() else {
            return;
        };

        for (label, &count) in counts.iter().enumerate() {
            if count == 0 || count == target {
                continue;
            }
            let pool: Vec<usize> = self
                .samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.label as usize == label)
                .map(|(i, _)| i)
                .collect();
            for _ in 0..target - count {
                let pick = pool[rng.random_range(0..pool.len())];
                let duplicate = self.samples[pick].clone();
                self.samples.push(duplicate);
            }
        }
        self.samples.shuffle(rng);
    }

    /// Shuffles and splits off the trailing `fraction` of the samples,
    /// returning `(rest, held_out)`.
    pub fn split(mut self, fraction: f64, rng: &mut StdRng) -> (Dataset, Dataset) {
        self.samples.shuffle(rng);
        let held = (self.samples.len() as f64 * fraction).round() as usize;
        let held = held.min(self.samples.len());
        let held_out = self.samples.split_off(self.samples.len() - held);
        let classes = self.classes.clone();
        (
            Dataset {
                samples: self.samples,
                classes: self.classes,
            },
            Dataset {
                samples: held_out,
                classes,
            },
        )
    }

    /// Materializes the whole set as an `[N, 1, size, size]` image tensor
    /// and an `[N]` label tensor on `device`.
    pub fn tensors(&self, device: Device) -> (Tensor, Tensor) {
        let pixel_count = (IMG_SIZE * IMG_SIZE) as usize;
        let mut pixels = Vec::with_capacity(self.samples.len() * pixel_count);
        for sample in &self.samples {
            pixels.extend_from_slice(&sample.pixels);
        }
        let labels: Vec<i64> = self.samples.iter().map(|s| s.label).collect();

        let size = IMG_SIZE as i64;
        (
            Tensor::from_slice(&pixels)
                .view([-1, 1, size, size])
                .to_device(device),
            Tensor::from_slice(&labels).to_device(device),
        )
    }
}

fn read_dir(path: &Path) -> Result<impl Iterator<Item = fs::DirEntry>, DatasetError> {
    let entries = fs::read_dir(path).map_err(|source| DatasetError::ReadDir {
        path: path.display().to_string(),
        source,
    })?;
    Ok(entries.flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn synthetic(counts: &[usize]) -> Dataset {
        let classes = (0..counts.len()).map(|i| format!("class_{i}")).collect();
        let mut samples = Vec::new();
        for (label, &count) in counts.iter().enumerate() {
            for i in 0..count {
                samples.push(Sample {
                    pixels: vec![label as f32 + i as f32 / 1000.0; 4],
                    label: label as i64,
                });
            }
        }
        Dataset { samples, classes }
    }

    #[test]
    fn oversampling_equalizes_class_counts() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut dataset = synthetic(&[30, 7, 15]);
        dataset.oversample(&mut rng);
        assert_eq!(dataset.class_counts(), vec![30, 30, 30]);
    }

    #[test]
    fn oversampling_is_a_noop_on_balanced_data() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut dataset = synthetic(&[12, 12]);
        dataset.oversample(&mut rng);
        assert_eq!(dataset.len(), 24);
    }

    #[test]
    fn split_respects_fraction_and_loses_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        let dataset = synthetic(&[40, 40, 20]);
        let total = dataset.len();
        let (train, test) = dataset.split(0.2, &mut rng);
        assert_eq!(test.len(), 20);
        assert_eq!(train.len() + test.len(), total);
    }

    #[test]
    fn class_counts_track_labels() {
        let dataset = synthetic(&[3, 1]);
        assert_eq!(dataset.class_counts(), vec![3, 1]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let result = Dataset::load(Path::new("no/such/data/dir"));
        assert!(matches!(result, Err(DatasetError::ReadDir { .. })));
    }
}
