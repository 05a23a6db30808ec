//! MODEL identifiers and the ONNX files behind them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// SCRFD detector shipped with every supported embedder.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// Embedding models the daemon and CLI can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaceModelKind {
    /// InsightFace ResNet-50 ArcFace (w600k_r50).
    #[default]
    ArcFace,
    /// InsightFace MobileFaceNet ArcFace (w600k_mbf), for slower CPUs.
    ArcFaceMobile,
}

impl FaceModelKind {
    pub const ALL: [FaceModelKind; 2] = [FaceModelKind::ArcFace, FaceModelKind::ArcFaceMobile];

    /// MODEL identifier as written in config and in the embedding store.
    pub fn name(self) -> &'static str {
        match self {
            FaceModelKind::ArcFace => "ArcFace",
            FaceModelKind::ArcFaceMobile => "ArcFaceMobile",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            FaceModelKind::ArcFace => "w600k_r50.onnx",
            FaceModelKind::ArcFaceMobile => "w600k_mbf.onnx",
        }
    }

    pub fn dimensions(self) -> usize {
        512
    }

    pub fn path_in(self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.file_name())
    }
}

impl fmt::Display for FaceModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown MODEL {0:?} (supported: ArcFace, ArcFaceMobile)")]
pub struct UnknownModel(pub String);

impl FromStr for FaceModelKind {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FaceModelKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownModel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_names() {
        assert_eq!("ArcFace".parse::<FaceModelKind>(), Ok(FaceModelKind::ArcFace));
        assert_eq!("arcfacemobile".parse::<FaceModelKind>(), Ok(FaceModelKind::ArcFaceMobile));
        assert!("Facenet512".parse::<FaceModelKind>().is_err());
    }

    #[test]
    fn test_name_roundtrips_through_parse() {
        for kind in FaceModelKind::ALL {
            assert_eq!(kind.to_string().parse::<FaceModelKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_model_path() {
        let path = FaceModelKind::ArcFace.path_in(Path::new("/opt/models"));
        assert_eq!(path, Path::new("/opt/models/w600k_r50.onnx"));
    }
}
