//! Deterministic stand-ins for the embedding model, shared by unit tests.
//!
//! Test images are uniform; the red channel encodes which identity is "in"
//! the picture, 0 meaning no face.

use crate::provider::{EmbeddingProvider, ProviderError};
use crate::types::{BoundingBox, Detection, EMBEDDING_DIM};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

pub const FACE_IMAGE_SIZE: u32 = 64;

/// One-hot embedding: distinct identities are orthogonal.
pub fn identity_embedding(id: u8) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[id as usize] = 1.0;
    v
}

pub fn face_image(id: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(
        FACE_IMAGE_SIZE,
        FACE_IMAGE_SIZE,
        Rgb([id, 90, 90]),
    ))
}

pub struct FakeProvider {
    pub calls: usize,
    pub embedding_len: usize,
    /// When false, images smaller than a full test frame yield no detections.
    pub faces_in_crops: bool,
    pub fail: bool,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            calls: 0,
            embedding_len: EMBEDDING_DIM,
            faces_in_crops: true,
            fail: false,
        }
    }
}

impl EmbeddingProvider for FakeProvider {
    fn extract(
        &mut self,
        image: &DynamicImage,
        _confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError> {
        self.calls += 1;
        if self.fail {
            return Err(ProviderError::Unavailable("fake provider offline".into()));
        }

        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }
        if !self.faces_in_crops && (w < FACE_IMAGE_SIZE || h < FACE_IMAGE_SIZE) {
            return Ok(Vec::new());
        }

        let id = image.to_rgb8().get_pixel(0, 0).0[0];
        if id == 0 {
            return Ok(Vec::new());
        }

        let mut embedding = identity_embedding(id);
        embedding.resize(self.embedding_len, 0.0);

        Ok(vec![Detection {
            bbox: BoundingBox::new(
                (w / 4) as i32,
                (h / 4) as i32,
                (w / 2) as i32,
                (h / 2) as i32,
            ),
            confidence: 0.99,
            embedding: Some(embedding),
        }])
    }
}
