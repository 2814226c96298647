//! Embedding provider contract.
//!
//! Face detection and embedding happen in an external pretrained model; the
//! rest of the crate only ever talks to it through [`EmbeddingProvider`].

use crate::types::Detection;
use image::DynamicImage;
use thiserror::Error;

/// Minimum detector confidence requested from the provider.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("malformed provider response: {0}")]
    BadResponse(String),
    #[error("failed to encode image for provider: {0}")]
    Encode(String),
}

/// Detects faces in an image and returns one [`Detection`] per candidate.
///
/// Implementations may return any number of detections, including none, and
/// may attach embeddings of any length. Calls are synchronous and blocking.
pub trait EmbeddingProvider {
    fn extract(
        &mut self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn extract(
        &mut self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError> {
        (**self).extract(image, confidence_threshold)
    }
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for &mut P {
    fn extract(
        &mut self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError> {
        (**self).extract(image, confidence_threshold)
    }
}
