//! The preprocessing pipeline shared between training and inference.
//!
//! Every image, whether it comes from the labeled training tree or from an
//! upload, goes through the identical chain: grayscale → CLAHE → median
//! blur → inversion → inverse binary threshold → resize. The model only
//! ever sees the output of this function.

use std::path::Path;

use image::GrayImage;
use image::imageops::{self, FilterType};
use imageproc::contrast::{ThresholdType, threshold};
use imageproc::filter::median_filter;

use crate::clahe;

/// Side length of the square model input.
pub const IMG_SIZE: u32 = 100;

pub const CLAHE_CLIP_LIMIT: f32 = 100.0;
pub const CLAHE_TILES: u32 = 8;
// 5x5 median kernel.
const MEDIAN_RADIUS: u32 = 2;
const THRESHOLD: u8 = 165;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("failed to read image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to write processed copy to {path}: {source}")]
    Write {
        path: String,
        source: image::ImageError,
    },
    #[error("image has zero width or height")]
    EmptyImage,
}

/// A preprocessed, fixed-size, single-channel image ready for the model.
pub struct ProcessedImage {
    pixels: GrayImage,
}

impl ProcessedImage {
    pub fn image(&self) -> &GrayImage {
        &self.pixels
    }

    /// Pixels normalized to `[0,1]`, row-major, `IMG_SIZE * IMG_SIZE` long.
    pub fn to_input(&self) -> Vec<f32> {
        self.pixels.pixels().map(|p| p[0] as f32 / 255.0).collect()
    }
}

/// Reads and preprocesses the image at `input`. When `processed_copy` is
/// given, the processed result is also written there for inspection.
pub fn preprocess(
    input: &Path,
    processed_copy: Option<&Path>,
) -> Result<ProcessedImage, PreprocessError> {
    let gray = image::open(input)?.to_luma8();
    preprocess_gray(gray, processed_copy)
}

/// Same pipeline, starting from an already decoded grayscale image.
pub fn preprocess_gray(
    gray: GrayImage,
    processed_copy: Option<&Path>,
) -> Result<ProcessedImage, PreprocessError> {
    if gray.width() == 0 || gray.height() == 0 {
        return Err(PreprocessError::EmptyImage);
    }

    let equalized = clahe::apply(&gray, CLAHE_CLIP_LIMIT, CLAHE_TILES, CLAHE_TILES);
    let mut blurred = median_filter(&equalized, MEDIAN_RADIUS, MEDIAN_RADIUS);
    imageops::invert(&mut blurred);
    let thresholded = threshold(&blurred, THRESHOLD, ThresholdType::BinaryInverted);
    let resized = imageops::resize(&thresholded, IMG_SIZE, IMG_SIZE, FilterType::Triangle);

    if let Some(path) = processed_copy {
        resized.save(path).map_err(|source| PreprocessError::Write {
            path: path.display().to_string(),
            source,
        })?;
    }

    Ok(ProcessedImage { pixels: resized })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn sample_image() -> GrayImage {
        GrayImage::from_fn(240, 180, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn output_has_fixed_shape() {
        let processed = preprocess_gray(sample_image(), None).unwrap();
        assert_eq!(processed.image().dimensions(), (IMG_SIZE, IMG_SIZE));
        assert_eq!(processed.to_input().len(), (IMG_SIZE * IMG_SIZE) as usize);
    }

    #[test]
    fn input_is_normalized() {
        let processed = preprocess_gray(sample_image(), None).unwrap();
        assert!(
            processed
                .to_input()
                .iter()
                .all(|&v| (0.0..=1.0).contains(&v))
        );
    }

    #[test]
    fn deterministic_for_identical_bytes() {
        let a = preprocess_gray(sample_image(), None).unwrap();
        let b = preprocess_gray(sample_image(), None).unwrap();
        assert_eq!(a.to_input(), b.to_input());
    }

    #[test]
    fn empty_image_is_rejected() {
        let empty = GrayImage::new(0, 0);
        assert!(matches!(
            preprocess_gray(empty, None),
            Err(PreprocessError::EmptyImage)
        ));
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let missing = Path::new("definitely/not/here.png");
        assert!(preprocess(missing, None).is_err());
    }
}
