//! Image → per-face embeddings.

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_EMBEDDING_DIM};
use crate::types::Embedding;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects every face in an image and produces one embedding per face.
///
/// Implementations may hold exclusive inference state, hence `&mut self`.
pub trait FaceEncoder: Send {
    /// Length of the embeddings this encoder produces.
    fn dimension(&self) -> usize;

    /// Embeddings in detection order; empty when no face is found.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncodeError>;
}

/// SCRFD detection followed by ArcFace embedding.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EncodeError> {
        let scrfd = model_dir.join(SCRFD_MODEL_FILE);
        let arcface = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy())?;

        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn dimension(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }

    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncodeError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(
            faces = faces.len(),
            width = image.width(),
            height = image.height(),
            "detected faces"
        );

        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(EncodeError::from))
            .collect()
    }
}
