//! Live verification loop.
//!
//! A session pulls frames from a [`FrameSource`], runs the expensive
//! detect-and-match path at most once per check interval, and renders the
//! current decision on every frame. Between checks the last decision and box
//! are shown unchanged, so the display can be up to one interval stale.
//!
//! ```text
//! Idle ──(registration loaded)──▶ Armed ──┬─ check due ─▶ Matched / NotMatched / NoFaceVisible
//!                                         └─ not due ───▶ previous state
//! ```

use crate::matcher::{CosineMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::provider::{EmbeddingProvider, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::selector::detect_face;
use crate::store::{RegistrationStore, StoreError};
use crate::types::{BoundingBox, Embedding};
use image::{DynamicImage, GenericImageView};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(800);

/// Pause after a missed frame so a stalled source does not spin the loop.
const MISS_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no face is registered; register one before starting a live session")]
    NoRegistration,
    #[error("store: {0}")]
    Store(StoreError),
    #[error("capture source unavailable: {0}")]
    CaptureSource(String),
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NoRegistration => SessionError::NoRegistration,
            other => SessionError::Store(other),
        }
    }
}

/// Whether the detect-and-match path should run for a frame seen at `now`.
///
/// The first frame of a session is always checked.
pub fn is_check_due(now: Instant, last_check: Option<Instant>, interval: Duration) -> bool {
    match last_check {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= interval,
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub check_interval: Duration,
    pub match_threshold: f32,
    pub confidence_threshold: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// What the loop is currently showing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayState {
    NoFaceVisible,
    Matched { bbox: BoundingBox, similarity: f32 },
    NotMatched { bbox: BoundingBox, similarity: f32 },
}

impl DisplayState {
    pub fn label(&self) -> String {
        match self {
            DisplayState::NoFaceVisible => "no face".to_string(),
            DisplayState::Matched { similarity, .. } => format!("registered ({similarity:.2})"),
            DisplayState::NotMatched { similarity, .. } => {
                format!("not registered ({similarity:.2})")
            }
        }
    }

    fn same_kind(&self, other: &DisplayState) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Box and label to draw over a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub bbox: BoundingBox,
    pub label: String,
    pub state: DisplayState,
}

impl Overlay {
    /// Overlay for `state` on a `width` × `height` frame. With no face visible
    /// a neutral box is centered in the frame.
    pub fn for_state(state: &DisplayState, width: u32, height: u32) -> Self {
        let bbox = match state {
            DisplayState::NoFaceVisible => BoundingBox::centered(width, height),
            DisplayState::Matched { bbox, .. } | DisplayState::NotMatched { bbox, .. } => *bbox,
        };
        Self {
            bbox,
            label: state.label(),
            state: *state,
        }
    }
}

/// A live image source. `None` is a transient miss; the loop simply retries.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<DynamicImage>;
}

/// Presents a frame with its overlay. Called once per acquired frame.
pub trait Renderer {
    fn render(&mut self, frame: &DynamicImage, overlay: &Overlay);
}

/// Cloneable flag that ends a running session.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub checks: u64,
    pub misses: u64,
}

/// An armed verification session. Owns its provider; reads the store once.
pub struct VerificationSession<P> {
    provider: P,
    reference: Embedding,
    matcher: CosineMatcher,
    settings: SessionSettings,
    last_check: Option<Instant>,
    state: DisplayState,
    checks: u64,
}

impl<P: EmbeddingProvider> VerificationSession<P> {
    /// Load the registration and arm the session.
    ///
    /// Refuses to start with [`SessionError::NoRegistration`] when the store is empty.
    pub fn start(
        provider: P,
        store: &RegistrationStore,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let registration = store.load_required()?;
        tracing::info!(
            registered_at = %registration.registered_at,
            interval_ms = settings.check_interval.as_millis() as u64,
            threshold = settings.match_threshold,
            "verification session armed"
        );

        Ok(Self {
            provider,
            reference: registration.embedding,
            matcher: CosineMatcher,
            settings,
            last_check: None,
            state: DisplayState::NoFaceVisible,
            checks: 0,
        })
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Advance the session by one frame observed at `now`.
    pub fn step(&mut self, frame: &DynamicImage, now: Instant) -> &DisplayState {
        if is_check_due(now, self.last_check, self.settings.check_interval) {
            self.last_check = Some(now);
            self.checks += 1;

            let next = self.check(frame);
            if !next.same_kind(&self.state) {
                tracing::info!(from = %self.state.label(), to = %next.label(), "display state changed");
            }
            self.state = next;
        }
        &self.state
    }

    fn check(&mut self, frame: &DynamicImage) -> DisplayState {
        let face = match detect_face(&mut self.provider, frame, self.settings.confidence_threshold) {
            Ok(face) => face,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed; showing no face");
                None
            }
        };

        let Some(face) = face else {
            return DisplayState::NoFaceVisible;
        };

        let decision = self.matcher.compare(
            &self.reference,
            &face.embedding,
            self.settings.match_threshold,
        );
        tracing::debug!(
            similarity = decision.similarity,
            matched = decision.matched,
            "live check"
        );

        if decision.matched {
            DisplayState::Matched {
                bbox: face.bbox,
                similarity: decision.similarity,
            }
        } else {
            DisplayState::NotMatched {
                bbox: face.bbox,
                similarity: decision.similarity,
            }
        }
    }

    /// Run until `stop` is raised. The source is dropped (and its device
    /// released) before this returns.
    pub fn run<S: FrameSource, R: Renderer + ?Sized>(
        mut self,
        mut source: S,
        renderer: &mut R,
        stop: &StopSignal,
    ) -> SessionSummary {
        let mut summary = SessionSummary::default();

        while !stop.is_stopped() {
            let Some(frame) = source.next_frame() else {
                summary.misses += 1;
                std::thread::sleep(MISS_BACKOFF);
                continue;
            };

            let state = *self.step(&frame, Instant::now());
            let (w, h) = frame.dimensions();
            renderer.render(&frame, &Overlay::for_state(&state, w, h));
            summary.frames += 1;
        }

        drop(source);
        summary.checks = self.checks;
        tracing::info!(
            frames = summary.frames,
            checks = summary.checks,
            misses = summary.misses,
            "verification session stopped; capture released"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_image, identity_embedding, FakeProvider};
    use std::collections::VecDeque;

    fn armed(id: u8) -> VerificationSession<FakeProvider> {
        let store = RegistrationStore::open_in_memory().unwrap();
        store
            .save(&Embedding::from_values(identity_embedding(id)).unwrap())
            .unwrap();
        VerificationSession::start(FakeProvider::default(), &store, SessionSettings::default())
            .unwrap()
    }

    #[test]
    fn test_is_check_due() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(800);
        assert!(is_check_due(t0, None, interval));
        assert!(!is_check_due(t0 + Duration::from_millis(100), Some(t0), interval));
        assert!(!is_check_due(t0 + Duration::from_millis(799), Some(t0), interval));
        assert!(is_check_due(t0 + interval, Some(t0), interval));
        assert!(is_check_due(t0 + Duration::from_secs(5), Some(t0), interval));
        // Clock going backwards never triggers a check.
        assert!(!is_check_due(t0, Some(t0 + Duration::from_millis(50)), interval));
    }

    #[test]
    fn test_start_without_registration_refuses() {
        let store = RegistrationStore::open_in_memory().unwrap();
        let result =
            VerificationSession::start(FakeProvider::default(), &store, SessionSettings::default());
        assert!(matches!(result, Err(SessionError::NoRegistration)));
    }

    #[test]
    fn test_throttle_reuses_previous_state() {
        let mut session = armed(1);
        let t0 = Instant::now();

        let first = *session.step(&face_image(1), t0);
        assert!(matches!(first, DisplayState::Matched { .. }));
        assert_eq!(session.provider().calls, 1);

        // Different identity 0.1s later: still within the window.
        let second = *session.step(&face_image(2), t0 + Duration::from_millis(100));
        assert_eq!(second, first);
        assert_eq!(session.provider().calls, 1);

        let third = *session.step(&face_image(2), t0 + Duration::from_millis(800));
        assert!(matches!(third, DisplayState::NotMatched { .. }));
        assert_eq!(session.provider().calls, 2);
    }

    #[test]
    fn test_no_face_state() {
        let mut session = armed(1);
        let state = *session.step(&face_image(0), Instant::now());
        assert_eq!(state, DisplayState::NoFaceVisible);
    }

    #[test]
    fn test_provider_failure_is_absorbed() {
        let mut session = armed(1);
        let t0 = Instant::now();
        session.step(&face_image(1), t0);

        session.provider.fail = true;
        let state = *session.step(&face_image(1), t0 + Duration::from_secs(1));
        assert_eq!(state, DisplayState::NoFaceVisible);
        // The failed check still counts against the throttle window.
        session.step(&face_image(1), t0 + Duration::from_millis(1100));
        assert_eq!(session.provider().calls, 2);
    }

    #[test]
    fn test_matched_box_comes_from_detection() {
        let mut session = armed(1);
        match session.step(&face_image(1), Instant::now()) {
            DisplayState::Matched { bbox, similarity } => {
                assert_eq!(*bbox, BoundingBox::new(16, 16, 32, 32));
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_overlay_placeholder_for_no_face() {
        let overlay = Overlay::for_state(&DisplayState::NoFaceVisible, 640, 480);
        assert_eq!(overlay.bbox, BoundingBox::centered(640, 480));
        assert_eq!(overlay.label, "no face");

        let state = DisplayState::NotMatched {
            bbox: BoundingBox::new(1, 2, 3, 4),
            similarity: 0.25,
        };
        let overlay = Overlay::for_state(&state, 640, 480);
        assert_eq!(overlay.bbox, BoundingBox::new(1, 2, 3, 4));
        assert_eq!(overlay.label, "not registered (0.25)");
    }

    struct ScriptedSource {
        frames: VecDeque<Option<DynamicImage>>,
        stop: StopSignal,
        released: Arc<AtomicBool>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Option<DynamicImage> {
            match self.frames.pop_front() {
                Some(frame) => frame,
                None => {
                    self.stop.stop();
                    None
                }
            }
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        overlays: Vec<Overlay>,
    }

    impl Renderer for RecordingRenderer {
        fn render(&mut self, _frame: &DynamicImage, overlay: &Overlay) {
            self.overlays.push(overlay.clone());
        }
    }

    #[test]
    fn test_run_renders_every_frame_and_releases_source() {
        let session = armed(1);
        let stop = StopSignal::new();
        let released = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            frames: VecDeque::from(vec![
                Some(face_image(1)),
                None,
                Some(face_image(2)),
                Some(face_image(0)),
            ]),
            stop: stop.clone(),
            released: released.clone(),
        };

        let mut renderer = RecordingRenderer::default();
        let summary = session.run(source, &mut renderer, &stop);

        assert_eq!(summary.frames, 3);
        assert_eq!(renderer.overlays.len(), 3);
        // The frames arrive well inside one interval: only the first is checked.
        assert_eq!(summary.checks, 1);
        assert!(summary.misses >= 1);
        assert!(renderer
            .overlays
            .iter()
            .all(|o| matches!(o.state, DisplayState::Matched { .. })));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_before_first_frame() {
        let session = armed(1);
        let stop = StopSignal::new();
        stop.stop();
        let source = ScriptedSource {
            frames: VecDeque::from(vec![Some(face_image(1))]),
            stop: stop.clone(),
            released: Arc::new(AtomicBool::new(false)),
        };
        let summary = session.run(source, &mut RecordingRenderer::default(), &stop);
        assert_eq!(summary, SessionSummary::default());
    }
}
