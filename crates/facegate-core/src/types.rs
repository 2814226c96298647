use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimensionality of every embedding the pipeline accepts.
pub const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Face bounding box in image pixel coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Neutral box centered in a `width` × `height` frame, used when no face is visible.
    pub fn centered(width: u32, height: u32) -> Self {
        let w = (width as i32 * 2) / 5;
        let h = height as i32 / 2;
        Self {
            x: (width as i32 - w) / 2,
            y: (height as i32 - h) / 2,
            width: w,
            height: h,
        }
    }
}

/// One candidate face as reported by an embedding provider.
///
/// The embedding is carried as raw values; nothing about its length is
/// trusted until it passes through [`crate::selector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub confidence: f32,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Face identity vector, always exactly [`EMBEDDING_DIM`] components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Wrap raw values, rejecting anything that is not [`EMBEDDING_DIM`] long.
    pub fn from_values(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Cosine similarity in [-1, 1].
    ///
    /// Returns `None` when either vector has zero norm. Accumulates in f64 so
    /// unnormalized inputs with large components stay accurate.
    pub fn similarity(&self, other: &Embedding) -> Option<f32> {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (a as f64, b as f64);
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 && denom.is_finite() {
            Some((dot / denom) as f32)
        } else {
            None
        }
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values
            .iter()
            .map(|&v| (v as f64) * (v as f64))
            .sum::<f64>()
            .sqrt() as f32
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::from_values(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

/// The single usable face chosen from a provider's detections.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub embedding: Embedding,
}

/// Outcome of comparing two embeddings. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchDecision {
    /// Cosine similarity, 0.0 when either side is degenerate.
    pub similarity: f32,
    pub matched: bool,
}
