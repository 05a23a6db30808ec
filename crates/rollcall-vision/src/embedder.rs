//! ArcFace face embedder via ONNX Runtime.
//!
//! Resizes a face crop to 112×112 and returns the raw model output. The
//! vector is not L2-normalized; match thresholds are Euclidean distances on
//! this raw scale.

use crate::models::FaceModelKind;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{Embedding, FaceEmbedder};
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} (download it from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty face crop")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct ArcFaceEmbedder {
    session: Session,
    kind: FaceModelKind,
}

impl ArcFaceEmbedder {
    /// Load the ONNX model for `kind` from `model_path`.
    pub fn load(model_path: &Path, kind: FaceModelKind) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = kind.name(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session, kind })
    }

    pub fn kind(&self) -> FaceModelKind {
        self.kind
    }

    /// Resize a face crop and pack it as a normalized NCHW RGB tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let resized = image::imageops::resize(face, size, size, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    type Error = EmbedderError;

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmbedderError::EmptyCrop);
        }

        let input = Self::preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let expected = self.kind.dimensions();
        if raw.len() != expected {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {expected}-dim embedding, got {}",
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(EmbedderError::InferenceFailed("non-finite embedding".into()));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}
