use crate::engine::{EngineError, EngineHandle, EngineStatus};
use facegate_core::{RegistrationOutcome, Settings, VerifyError, VerifyOutcome};
use serde_json::{json, Value};
use zbus::interface;

pub const BUS_NAME: &str = "io.facegate.Facegate1";
pub const OBJECT_PATH: &str = "/io/facegate/Facegate1";

/// Errors returned over D-Bus as `io.facegate.Facegate1.Error.*`.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "io.facegate.Facegate1.Error")]
pub enum ServiceError {
    #[zbus(error)]
    ZBus(zbus::Error),
    /// Verify was called before any face was registered.
    NoRegistration(String),
    /// The supplied bytes are not a decodable image.
    InvalidImage(String),
    /// Anything else: embedding service, store, engine thread.
    Engine(String),
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Verify(VerifyError::NoRegistration) => {
                ServiceError::NoRegistration("no face registered".into())
            }
            EngineError::Verify(VerifyError::InvalidImage(msg)) => ServiceError::InvalidImage(msg),
            other => ServiceError::Engine(other.to_string()),
        }
    }
}

fn registration_json(outcome: &RegistrationOutcome) -> Value {
    match outcome {
        RegistrationOutcome::Registered {
            bbox,
            confidence,
            registered_at,
        } => json!({
            "result": "registered",
            "box": bbox,
            "confidence": confidence,
            "registered_at": registered_at.to_rfc3339(),
        }),
        RegistrationOutcome::NoFaceDetected => json!({ "result": "no_face_detected" }),
    }
}

fn verify_json(outcome: &VerifyOutcome, threshold: f32) -> Value {
    let mut body = json!({
        "result": outcome.as_str(),
        "threshold": threshold,
    });
    if let Some(similarity) = outcome.similarity() {
        body["similarity"] = json!(similarity);
    }
    body
}

fn status_json(status: &EngineStatus, provider_url: &str, threshold: f32) -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "registered": status.registered,
        "registered_at": status.registered_at,
        "provider_url": provider_url,
        "match_threshold": threshold,
    })
}

/// D-Bus interface for the facegate daemon.
///
/// Bus name: io.facegate.Facegate1
/// Object path: /io/facegate/Facegate1
pub struct FacegateService {
    engine: EngineHandle,
    provider_url: String,
    match_threshold: f32,
}

impl FacegateService {
    pub fn new(engine: EngineHandle, settings: &Settings) -> Self {
        Self {
            engine,
            provider_url: settings.provider_url.clone(),
            match_threshold: settings.match_threshold,
        }
    }
}

#[interface(name = "io.facegate.Facegate1")]
impl FacegateService {
    /// Detect the face in an encoded image and return its embedding as JSON.
    async fn compute_embedding(&self, image: Vec<u8>) -> Result<String, ServiceError> {
        tracing::info!(bytes = image.len(), "compute_embedding requested");
        let report = self.engine.compute_embedding(image).await?;
        serde_json::to_string(&report).map_err(|e| ServiceError::Engine(e.to_string()))
    }

    /// Register the face in an encoded image, replacing any previous registration.
    async fn register(&self, image: Vec<u8>) -> Result<String, ServiceError> {
        tracing::info!(bytes = image.len(), "register requested");
        let outcome = self.engine.register(image).await?;
        Ok(registration_json(&outcome).to_string())
    }

    /// Compare the face in an encoded image against the registration.
    async fn verify(&self, image: Vec<u8>) -> Result<String, ServiceError> {
        tracing::info!(bytes = image.len(), "verify requested");
        let outcome = self.engine.verify(image).await?;
        tracing::info!(result = outcome.as_str(), similarity = ?outcome.similarity(), "verify complete");
        Ok(verify_json(&outcome, self.match_threshold).to_string())
    }

    async fn status(&self) -> Result<String, ServiceError> {
        let status = self.engine.status().await?;
        Ok(status_json(&status, &self.provider_url, self.match_threshold).to_string())
    }

    /// Remove the registration. Returns false if there was none.
    async fn clear_registration(&self) -> Result<bool, ServiceError> {
        tracing::info!("clear_registration requested");
        Ok(self.engine.clear().await?)
    }
}
