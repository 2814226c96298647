use facegate_core::verifier::{decode_image, EmbeddingReport};
use facegate_core::{
    EmbeddingProvider, HttpEmbeddingProvider, RegistrationOutcome, RegistrationStore, Settings,
    Verifier, VerifyError, VerifyOutcome,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("engine startup failed: {0}")]
    Startup(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Registration state as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub registered: bool,
    /// RFC 3339 timestamp of the current registration.
    pub registered_at: Option<String>,
}

type Reply<T> = oneshot::Sender<Result<T, VerifyError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    ComputeEmbedding {
        image: Vec<u8>,
        reply: Reply<EmbeddingReport>,
    },
    Register {
        image: Vec<u8>,
        reply: Reply<RegistrationOutcome>,
    },
    Verify {
        image: Vec<u8>,
        reply: Reply<VerifyOutcome>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
    Clear {
        reply: Reply<bool>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Inspect an encoded image: detect, crop, embed.
    pub async fn compute_embedding(&self, image: Vec<u8>) -> Result<EmbeddingReport, EngineError> {
        self.call(|reply| EngineRequest::ComputeEmbedding { image, reply })
            .await
    }

    /// Register the face in an encoded image, replacing any previous one.
    pub async fn register(&self, image: Vec<u8>) -> Result<RegistrationOutcome, EngineError> {
        self.call(|reply| EngineRequest::Register { image, reply }).await
    }

    /// Verify the face in an encoded image against the registration.
    pub async fn verify(&self, image: Vec<u8>) -> Result<VerifyOutcome, EngineError> {
        self.call(|reply| EngineRequest::Verify { image, reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    pub async fn clear(&self) -> Result<bool, EngineError> {
        self.call(|reply| EngineRequest::Clear { reply }).await
    }
}

/// Spawn the engine backed by the HTTP embedding service and the on-disk store.
pub fn spawn_engine(settings: &Settings) -> Result<EngineHandle, EngineError> {
    let settings = settings.clone();
    spawn_engine_with(move || {
        let store = RegistrationStore::open(&settings.db_path)
            .map_err(|e| EngineError::Startup(format!("registration store: {e}")))?;
        let provider =
            HttpEmbeddingProvider::new(&settings.provider_url, settings.provider_timeout)
                .map_err(|e| EngineError::Startup(e.to_string()))?;

        match provider.health() {
            Ok(()) => tracing::info!(url = %settings.provider_url, "embedding service reachable"),
            Err(e) => tracing::warn!(
                error = %e,
                "embedding service not reachable yet; requests will fail until it is"
            ),
        }

        Ok(Verifier::new(provider, store, settings.verifier_settings()))
    })
}

/// Spawn the engine on a dedicated OS thread.
///
/// `build` runs on that thread, so the provider and store never cross
/// threads. Fails fast if `build` fails.
pub fn spawn_engine_with<P, F>(build: F) -> Result<EngineHandle, EngineError>
where
    P: EmbeddingProvider + 'static,
    F: FnOnce() -> Result<Verifier<P>, EngineError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), EngineError>>(1);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            let mut verifier = match build() {
                Ok(v) => {
                    let _ = ready_tx.send(Ok(()));
                    v
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&mut verifier, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(|e| EngineError::Startup(format!("failed to spawn engine thread: {e}")))?;

    ready_rx
        .recv()
        .map_err(|_| EngineError::Startup("engine thread exited during startup".into()))??;

    Ok(EngineHandle { tx })
}

fn handle_request<P: EmbeddingProvider>(verifier: &mut Verifier<P>, req: EngineRequest) {
    match req {
        EngineRequest::ComputeEmbedding { image, reply } => {
            let result = decode_image(&image).and_then(|img| verifier.compute_embedding(&img));
            let _ = reply.send(result);
        }
        EngineRequest::Register { image, reply } => {
            let result = decode_image(&image).and_then(|img| verifier.register(&img));
            let _ = reply.send(result);
        }
        EngineRequest::Verify { image, reply } => {
            let result = decode_image(&image).and_then(|img| verifier.verify(&img));
            let _ = reply.send(result);
        }
        EngineRequest::Status { reply } => {
            let result = verifier.registration().map(|reg| EngineStatus {
                registered: reg.is_some(),
                registered_at: reg.map(|r| r.registered_at.to_rfc3339()),
            });
            let _ = reply.send(result);
        }
        EngineRequest::Clear { reply } => {
            let _ = reply.send(verifier.clear_registration());
        }
    }
}
