//! facegate-core — single-identity face verification.
//!
//! Detection and embedding are delegated to an external model behind
//! [`EmbeddingProvider`]. This crate decides which detection to trust,
//! stores the one registered embedding, compares faces by cosine similarity,
//! and drives the throttled live verification loop.

pub mod crop;
pub mod matcher;
pub mod provider;
pub mod remote;
pub mod selector;
pub mod session;
pub mod settings;
pub mod store;
pub mod types;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use matcher::{CosineMatcher, Matcher};
pub use provider::{EmbeddingProvider, ProviderError};
pub use remote::HttpEmbeddingProvider;
pub use session::{
    DisplayState, FrameSource, Overlay, Renderer, SessionError, StopSignal, VerificationSession,
};
pub use settings::Settings;
pub use store::{Registration, RegistrationStore, StoreError};
pub use types::{BoundingBox, Detection, Embedding, MatchDecision, SelectedFace, EMBEDDING_DIM};
pub use verifier::{RegistrationOutcome, Verifier, VerifyError, VerifyOutcome};
