use serde::{Deserialize, Serialize};

/// Label reported for a probe that matched no enrolled identity.
///
/// The ledger never records this name.
pub const UNKNOWN: &str = "Unknown";

/// Bounding box for a detected face, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - overlap;

        if union > 0.0 { overlap / union } else { 0.0 }
    }
}

/// Face embedding vector (512-dimensional for the ArcFace models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimensions(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance between two embeddings.
    ///
    /// Callers must ensure both sides share the same dimensionality;
    /// [`Matcher`](crate::Matcher) checks this before calling.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Outcome of matching one probe embedding against the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Accepted identity, or `None` when the best candidate was over threshold.
    pub identity: Option<String>,
    /// True minimum distance, reported whether or not the match was accepted.
    /// `+inf` when the store is empty.
    pub distance: f32,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self { identity: None, distance }
    }

    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }

    /// Identity name, or [`UNKNOWN`].
    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or(UNKNOWN)
    }
}
