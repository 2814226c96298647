//! Reduces a provider's raw detections to a single usable face.
//!
//! The provider already drops detections below its confidence threshold, so
//! the first survivor with a well-formed embedding is taken as is. Embedding
//! length is re-checked here regardless of what the provider claims.

use crate::provider::{EmbeddingProvider, ProviderError};
use crate::types::{Detection, Embedding, SelectedFace, EMBEDDING_DIM};
use image::DynamicImage;

/// Return the first detection carrying an embedding of exactly `dim` values.
pub fn select_first(detections: &[Detection], dim: usize) -> Option<SelectedFace> {
    for (idx, det) in detections.iter().enumerate() {
        let Some(values) = det.embedding.as_ref() else {
            tracing::debug!(idx, confidence = det.confidence, "detection has no embedding; skipping");
            continue;
        };

        if values.len() != dim {
            tracing::debug!(
                idx,
                expected = dim,
                actual = values.len(),
                "embedding dimension mismatch; discarding detection"
            );
            continue;
        }

        // Embedding itself only admits EMBEDDING_DIM, whatever `dim` says.
        match Embedding::from_values(values.clone()) {
            Ok(embedding) => {
                return Some(SelectedFace {
                    bbox: det.bbox,
                    confidence: det.confidence,
                    embedding,
                })
            }
            Err(e) => {
                tracing::debug!(idx, error = %e, "discarding detection");
            }
        }
    }
    None
}

/// Run the provider on `image` and select a usable face from its output.
pub fn detect_face<P: EmbeddingProvider + ?Sized>(
    provider: &mut P,
    image: &DynamicImage,
    confidence_threshold: f32,
) -> Result<Option<SelectedFace>, ProviderError> {
    let detections = provider.extract(image, confidence_threshold)?;
    let selected = select_first(&detections, EMBEDDING_DIM);
    tracing::debug!(
        detections = detections.len(),
        usable = selected.is_some(),
        "face detection"
    );
    Ok(selected)
}
