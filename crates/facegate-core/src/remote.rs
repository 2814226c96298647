//! HTTP client for an out-of-process face embedding service.
//!
//! The service receives a base64 JPEG and replies with at most one face in
//! the flat `faces_detected` form, or a full `detections` list. Both shapes
//! are mapped onto [`Detection`]s; length validation is left to the selector.

use crate::provider::{EmbeddingProvider, ProviderError};
use crate::types::{BoundingBox, Detection};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PROVIDER_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(12);
const JPEG_QUALITY: u8 = 90;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    image_base64: &'a str,
    threshold: f32,
}

#[derive(Deserialize, Debug, Default)]
struct EmbedResponse {
    #[serde(default)]
    faces_detected: u32,
    #[serde(rename = "box", default)]
    bbox: Option<[f64; 4]>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    detections: Option<Vec<WireDetection>>,
}

#[derive(Deserialize, Debug)]
struct WireDetection {
    #[serde(rename = "box")]
    bbox: [f64; 4],
    confidence: f32,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

fn to_bbox(raw: [f64; 4]) -> BoundingBox {
    BoundingBox::new(
        raw[0].round() as i32,
        raw[1].round() as i32,
        raw[2].round() as i32,
        raw[3].round() as i32,
    )
}

impl EmbedResponse {
    fn into_detections(self) -> Vec<Detection> {
        if let Some(list) = self.detections {
            return list
                .into_iter()
                .map(|d| Detection {
                    bbox: to_bbox(d.bbox),
                    confidence: d.confidence,
                    embedding: d.embedding,
                })
                .collect();
        }

        if self.faces_detected == 0 {
            return Vec::new();
        }

        match self.bbox {
            Some(raw) => vec![Detection {
                bbox: to_bbox(raw),
                confidence: self.confidence.unwrap_or(0.0),
                embedding: self.embedding,
            }],
            None => {
                tracing::debug!(
                    faces = self.faces_detected,
                    "provider reported faces without a box; ignoring"
                );
                Vec::new()
            }
        }
    }
}

/// Encode an image as base64 JPEG for transport.
pub fn encode_jpeg_base64(image: &DynamicImage) -> Result<String, ProviderError> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| ProviderError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(&buf))
}

/// [`EmbeddingProvider`] backed by a remote embedding service.
pub struct HttpEmbeddingProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the service's health endpoint.
    pub fn health(&self) -> Result<(), ProviderError> {
        let url = format!("{}/api/health", self.base_url);
        self.client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::Unavailable(format!("{url}: {e}")))?;
        Ok(())
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn extract(
        &mut self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError> {
        let encoded = encode_jpeg_base64(image)?;
        let url = format!("{}/api/embed", self.base_url);

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                image_base64: &encoded,
                threshold: confidence_threshold,
            })
            .send()
            .map_err(|e| ProviderError::Unavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::BadResponse(format!("{url}: HTTP {status}")));
        }

        let body: EmbedResponse = response
            .json()
            .map_err(|e| ProviderError::BadResponse(format!("{url}: {e}")))?;
        let detections = body.into_detections();

        tracing::debug!(
            count = detections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "provider returned detections"
        );
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<Detection> {
        serde_json::from_str::<EmbedResponse>(json)
            .unwrap()
            .into_detections()
    }

    #[test]
    fn test_flat_response_with_face() {
        let dets = parse(
            r#"{"faces_detected": 1, "box": [10, 20, 30.6, 40], "confidence": 0.99, "embedding": [0.1, 0.2]}"#,
        );
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(10, 20, 31, 40));
        assert!((dets[0].confidence - 0.99).abs() < 1e-6);
        assert_eq!(dets[0].embedding.as_deref(), Some(&[0.1f32, 0.2][..]));
    }

    #[test]
    fn test_flat_response_without_face() {
        assert!(parse(r#"{"faces_detected": 0, "embedding": null}"#).is_empty());
    }

    #[test]
    fn test_flat_response_missing_box_is_ignored() {
        assert!(parse(r#"{"faces_detected": 1, "embedding": [1.0]}"#).is_empty());
    }

    #[test]
    fn test_detection_list_response_keeps_order() {
        let dets = parse(
            r#"{"detections": [
                {"box": [0, 0, 5, 5], "confidence": 0.97},
                {"box": [5, 5, 5, 5], "confidence": 0.99, "embedding": [1.0]}
            ]}"#,
        );
        assert_eq!(dets.len(), 2);
        assert!(dets[0].embedding.is_none());
        assert_eq!(dets[1].bbox, BoundingBox::new(5, 5, 5, 5));
    }

    #[test]
    fn test_encode_jpeg_base64_produces_jpeg() {
        let img = DynamicImage::new_rgb8(8, 8);
        let encoded = encode_jpeg_base64(&img).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p = HttpEmbeddingProvider::new("http://localhost:5000/", DEFAULT_PROVIDER_TIMEOUT).unwrap();
        assert_eq!(p.base_url(), "http://localhost:5000");
    }
}
