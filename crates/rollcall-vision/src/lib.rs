//! rollcall-vision: ONNX face detection and embedding.
//!
//! SCRFD for detection and ArcFace for embeddings, both on ONNX Runtime
//! CPU inference. Implements the collaborator traits from `rollcall-core`.

pub mod detector;
pub mod embedder;
pub mod models;

pub use detector::{DetectorError, ScrfdDetector};
pub use embedder::{ArcFaceEmbedder, EmbedderError};
pub use models::{FaceModelKind, UnknownModel, DETECTOR_MODEL_FILE};

use std::path::{Path, PathBuf};

/// Per-user data directory: `$XDG_DATA_HOME/rollcall`, else `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Where ONNX model files are looked up by default.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}

/// Load the detector and the embedder for `kind` from `model_dir`.
pub fn load_models(
    model_dir: &Path,
    kind: FaceModelKind,
) -> Result<(ScrfdDetector, ArcFaceEmbedder), VisionError> {
    let detector = ScrfdDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
    let embedder = ArcFaceEmbedder::load(&kind.path_in(model_dir), kind)?;
    Ok((detector, embedder))
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}
