//! One-shot operations over still images: inspect, register, verify.

use crate::crop::{self, DEFAULT_EMBED_MARGIN};
use crate::matcher::{CosineMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::provider::{EmbeddingProvider, ProviderError, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::remote::encode_jpeg_base64;
use crate::selector::detect_face;
use crate::store::{Registration, RegistrationStore, StoreError};
use crate::types::{BoundingBox, Embedding, SelectedFace};
use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("no face is registered")]
    NoRegistration,
    #[error("store: {0}")]
    Store(StoreError),
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
}

impl From<StoreError> for VerifyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NoRegistration => VerifyError::NoRegistration,
            other => VerifyError::Store(other),
        }
    }
}

/// Decode an encoded image (JPEG, PNG, ...) from memory.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, VerifyError> {
    image::load_from_memory(bytes).map_err(|e| VerifyError::InvalidImage(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub match_threshold: f32,
    pub confidence_threshold: f32,
    /// Margin around the face box when cropping for inspection.
    pub embed_margin: f32,
    /// Verify probes whose face crop is blurrier than this report no face. 0 disables.
    pub min_sharpness: f64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            embed_margin: DEFAULT_EMBED_MARGIN,
            min_sharpness: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropSize {
    pub w: u32,
    pub h: u32,
}

/// Result of inspecting one image.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingReport {
    /// 0 or 1: at most one face is ever reported.
    pub faces_detected: u8,
    #[serde(rename = "box")]
    pub bbox: Option<BoundingBox>,
    pub confidence: Option<f32>,
    pub embedding: Option<Embedding>,
    pub sharpness: Option<f64>,
    pub size: Option<CropSize>,
    /// The margin crop as a `data:image/jpeg;base64,` URL.
    pub face_base64: Option<String>,
}

impl EmbeddingReport {
    fn no_face() -> Self {
        Self {
            faces_detected: 0,
            bbox: None,
            confidence: None,
            embedding: None,
            sharpness: None,
            size: None,
            face_base64: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    Registered {
        bbox: BoundingBox,
        confidence: f32,
        registered_at: DateTime<Utc>,
    },
    /// Nothing usable in the image; the stored registration is untouched.
    NoFaceDetected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerifyOutcome {
    NoFaceDetected,
    Registered { similarity: f32 },
    NotRegistered { similarity: f32 },
}

impl VerifyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyOutcome::NoFaceDetected => "no_face_detected",
            VerifyOutcome::Registered { .. } => "registered",
            VerifyOutcome::NotRegistered { .. } => "not_registered",
        }
    }

    pub fn similarity(&self) -> Option<f32> {
        match self {
            VerifyOutcome::NoFaceDetected => None,
            VerifyOutcome::Registered { similarity } | VerifyOutcome::NotRegistered { similarity } => {
                Some(*similarity)
            }
        }
    }
}

/// Embedding provider, registration store and matcher wired together.
pub struct Verifier<P> {
    provider: P,
    store: RegistrationStore,
    matcher: CosineMatcher,
    settings: VerifierSettings,
}

impl<P: EmbeddingProvider> Verifier<P> {
    pub fn new(provider: P, store: RegistrationStore, settings: VerifierSettings) -> Self {
        Self {
            provider,
            store,
            matcher: CosineMatcher,
            settings,
        }
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    pub fn store(&self) -> &RegistrationStore {
        &self.store
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn registration(&self) -> Result<Option<Registration>, VerifyError> {
        Ok(self.store.load()?)
    }

    pub fn clear_registration(&self) -> Result<bool, VerifyError> {
        Ok(self.store.clear()?)
    }

    fn detect(&mut self, image: &DynamicImage) -> Result<Option<SelectedFace>, VerifyError> {
        Ok(detect_face(
            &mut self.provider,
            image,
            self.settings.confidence_threshold,
        )?)
    }

    /// Re-embed the face crop, keeping the full-image embedding when the crop yields none.
    fn embed_crop(
        &mut self,
        crop: &DynamicImage,
        fallback: &SelectedFace,
    ) -> Result<Embedding, VerifyError> {
        match self.detect(crop)? {
            Some(face) => Ok(face.embedding),
            None => {
                tracing::debug!("no face in crop; using full-image embedding");
                Ok(fallback.embedding.clone())
            }
        }
    }

    /// Detect a face, crop it with the configured margin and report its embedding.
    pub fn compute_embedding(&mut self, image: &DynamicImage) -> Result<EmbeddingReport, VerifyError> {
        let Some(face) = self.detect(image)? else {
            return Ok(EmbeddingReport::no_face());
        };
        let Some(crop) = crop::crop_with_margin(image, &face.bbox, self.settings.embed_margin) else {
            tracing::debug!(bbox = ?face.bbox, "face box lies outside the image");
            return Ok(EmbeddingReport::no_face());
        };

        let embedding = self.embed_crop(&crop, &face)?;
        let (w, h) = crop.dimensions();
        let face_base64 = format!("data:image/jpeg;base64,{}", encode_jpeg_base64(&crop)?);

        Ok(EmbeddingReport {
            faces_detected: 1,
            bbox: Some(face.bbox),
            confidence: Some(face.confidence),
            embedding: Some(embedding),
            sharpness: Some(crop::sharpness(&crop)),
            size: Some(CropSize { w, h }),
            face_base64: Some(face_base64),
        })
    }

    /// Register the face in `image`, replacing any previous registration.
    pub fn register(&mut self, image: &DynamicImage) -> Result<RegistrationOutcome, VerifyError> {
        let Some(face) = self.detect(image)? else {
            tracing::info!("register: no usable face; registration unchanged");
            return Ok(RegistrationOutcome::NoFaceDetected);
        };
        let Some(crop) = crop::crop_with_margin(image, &face.bbox, 0.0) else {
            tracing::info!(bbox = ?face.bbox, "register: face box outside image; registration unchanged");
            return Ok(RegistrationOutcome::NoFaceDetected);
        };

        let embedding = self.embed_crop(&crop, &face)?;
        let saved = self.store.save(&embedding)?;

        tracing::info!(
            confidence = face.confidence,
            x = face.bbox.x,
            y = face.bbox.y,
            "register: face registered"
        );
        Ok(RegistrationOutcome::Registered {
            bbox: face.bbox,
            confidence: face.confidence,
            registered_at: saved.registered_at,
        })
    }

    /// Compare the face in `image` against the registration.
    ///
    /// Fails with [`VerifyError::NoRegistration`] before touching the provider
    /// when nothing is registered.
    pub fn verify(&mut self, image: &DynamicImage) -> Result<VerifyOutcome, VerifyError> {
        let registration = self.store.load_required()?;

        let Some(face) = self.detect(image)? else {
            tracing::info!("verify: no face detected");
            return Ok(VerifyOutcome::NoFaceDetected);
        };

        if self.settings.min_sharpness > 0.0 {
            let sharpness = crop::crop_with_margin(image, &face.bbox, self.settings.embed_margin)
                .map(|c| crop::sharpness(&c))
                .unwrap_or(0.0);
            if sharpness < self.settings.min_sharpness {
                tracing::info!(sharpness, min = self.settings.min_sharpness, "verify: face too blurry");
                return Ok(VerifyOutcome::NoFaceDetected);
            }
        }

        let decision = self.matcher.compare(
            &registration.embedding,
            &face.embedding,
            self.settings.match_threshold,
        );
        let outcome = if decision.matched {
            VerifyOutcome::Registered {
                similarity: decision.similarity,
            }
        } else {
            VerifyOutcome::NotRegistered {
                similarity: decision.similarity,
            }
        };

        tracing::info!(
            result = outcome.as_str(),
            similarity = decision.similarity,
            threshold = self.settings.match_threshold,
            "verify: decided"
        );
        Ok(outcome)
    }
}
