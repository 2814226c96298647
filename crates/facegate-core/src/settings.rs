use crate::crop::DEFAULT_EMBED_MARGIN;
use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::provider::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::remote::{DEFAULT_PROVIDER_TIMEOUT, DEFAULT_PROVIDER_URL};
use crate::session::{SessionSettings, DEFAULT_CHECK_INTERVAL};
use crate::verifier::VerifierSettings;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the embedding service.
    pub provider_url: String,
    /// Request timeout for the embedding service.
    pub provider_timeout: Duration,
    /// Path to the SQLite registration database.
    pub db_path: PathBuf,
    /// Cosine similarity a probe must strictly exceed to match.
    pub match_threshold: f32,
    /// Minimum detector confidence requested from the provider.
    pub confidence_threshold: f32,
    /// Minimum wall-clock time between detections in the live loop.
    pub check_interval: Duration,
    /// Margin around the face box for inspection crops.
    pub embed_margin: f32,
    /// Laplacian-variance floor for verify probes (0 disables).
    pub min_sharpness: f64,
    /// V4L2 device for the live loop.
    pub camera_device: String,
    /// Register the daemon on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            db_path: default_data_dir().join("registration.db"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            check_interval: DEFAULT_CHECK_INTERVAL,
            embed_margin: DEFAULT_EMBED_MARGIN,
            min_sharpness: 0.0,
            camera_device: "/dev/video0".to_string(),
            system_bus: false,
        }
    }
}

impl Settings {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            provider_url: get("FACEGATE_PROVIDER_URL").unwrap_or(defaults.provider_url),
            provider_timeout: parse_var(&get, "FACEGATE_PROVIDER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.provider_timeout),
            db_path: get("FACEGATE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            match_threshold: parse_var(&get, "FACEGATE_MATCH_THRESHOLD").unwrap_or(defaults.match_threshold),
            confidence_threshold: parse_var(&get, "FACEGATE_CONFIDENCE_THRESHOLD")
                .unwrap_or(defaults.confidence_threshold),
            check_interval: parse_var(&get, "FACEGATE_CHECK_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.check_interval),
            embed_margin: parse_var(&get, "FACEGATE_EMBED_MARGIN").unwrap_or(defaults.embed_margin),
            min_sharpness: parse_var(&get, "FACEGATE_MIN_SHARPNESS").unwrap_or(defaults.min_sharpness),
            camera_device: get("FACEGATE_CAMERA_DEVICE").unwrap_or(defaults.camera_device),
            system_bus: get("FACEGATE_SYSTEM_BUS")
                .map(|v| v != "0")
                .unwrap_or(defaults.system_bus),
        }
    }

    pub fn verifier_settings(&self) -> VerifierSettings {
        VerifierSettings {
            match_threshold: self.match_threshold,
            confidence_threshold: self.confidence_threshold,
            embed_margin: self.embed_margin,
            min_sharpness: self.min_sharpness,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            check_interval: self.check_interval,
            match_threshold: self.match_threshold,
            confidence_threshold: self.confidence_threshold,
        }
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|v| v.trim().parse().ok())
}

/// `$XDG_DATA_HOME/facegate`, falling back to `~/.local/share/facegate`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}
