//! `facegate live`: the verification loop against a local webcam.

use crate::preview::PreviewRenderer;
use anyhow::{Context, Result};
use facegate_core::session::SessionSummary;
use facegate_core::{
    FrameSource, HttpEmbeddingProvider, RegistrationStore, SessionError, Settings, StopSignal,
    VerificationSession,
};
use facegate_hw::{Camera, CameraError, CameraStream, Frame};
use image::DynamicImage;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

/// Log every Nth consecutive capture failure so a dead device does not flood the log.
const FAILURE_LOG_EVERY: u32 = 100;

/// Dark frames skipped while the sensor settles its exposure at startup.
const WARMUP_FRAMES: u32 = 30;

pub struct LiveOptions {
    pub device: String,
    pub interval: Duration,
    pub preview: Option<PathBuf>,
}

/// Blocking frame capture; implemented by the V4L2 stream.
trait Capture {
    fn capture(&mut self) -> Result<Frame, CameraError>;
}

impl Capture for CameraStream<'_> {
    fn capture(&mut self) -> Result<Frame, CameraError> {
        self.next_frame()
    }
}

/// Adapts a capture stream to the session's frame source.
///
/// Failed reads are misses. Dark frames are misses only during the startup
/// warm-up; afterwards they are real frames and the provider reports no face.
struct CameraSource<C> {
    capture: C,
    warmup_left: u32,
    consecutive_failures: u32,
}

impl<C: Capture> CameraSource<C> {
    fn new(capture: C) -> Self {
        Self {
            capture,
            warmup_left: WARMUP_FRAMES,
            consecutive_failures: 0,
        }
    }
}

impl<C: Capture> FrameSource for CameraSource<C> {
    fn next_frame(&mut self) -> Option<DynamicImage> {
        match self.capture.capture() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                if frame.is_dark && self.warmup_left > 0 {
                    self.warmup_left -= 1;
                    tracing::debug!(sequence = frame.sequence, "skipping dark warm-up frame");
                    return None;
                }
                self.warmup_left = 0;
                Some(DynamicImage::ImageRgb8(frame.image))
            }
            Err(e) => {
                if self.consecutive_failures % FAILURE_LOG_EVERY == 0 {
                    tracing::warn!(
                        error = %e,
                        failures = self.consecutive_failures + 1,
                        "frame capture failed"
                    );
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                None
            }
        }
    }
}

/// Raise `stop` once a line reading `q` arrives. End of input is not a quit.
fn wait_for_quit(input: impl BufRead, stop: &StopSignal) {
    for line in input.lines() {
        match line {
            Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                stop.stop();
                return;
            }
            Ok(_) => continue,
            Err(_) => return,
        }
    }
    tracing::debug!("stdin closed; use Ctrl-C to stop");
}

/// Raise `stop` when the user types `q` and presses Enter.
fn watch_stdin(stop: StopSignal) {
    let spawned = std::thread::Builder::new()
        .name("facegate-stdin".into())
        .spawn(move || wait_for_quit(std::io::stdin().lock(), &stop));
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "stdin watcher unavailable; use Ctrl-C to quit");
    }
}

fn run_blocking(settings: &Settings, opts: &LiveOptions, stop: &StopSignal) -> Result<SessionSummary> {
    let store = RegistrationStore::open(&settings.db_path)
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;
    let provider = HttpEmbeddingProvider::new(&settings.provider_url, settings.provider_timeout)?;

    let mut session_settings = settings.session_settings();
    session_settings.check_interval = opts.interval;

    // Refuse before touching the camera.
    let session = VerificationSession::start(provider, &store, session_settings)?;

    let camera = Camera::open(&opts.device, CAPTURE_WIDTH, CAPTURE_HEIGHT)
        .map_err(|e| SessionError::CaptureSource(e.to_string()))?;
    let stream = camera
        .stream()
        .map_err(|e| SessionError::CaptureSource(e.to_string()))?;

    println!(
        "live verification on {} ({}x{}); type q + Enter or press Ctrl-C to stop",
        camera.device_path, camera.width, camera.height
    );

    let mut renderer = PreviewRenderer::new(opts.preview.clone());
    Ok(session.run(CameraSource::new(stream), &mut renderer, stop))
}

pub async fn run(settings: Settings, opts: LiveOptions) -> Result<()> {
    let stop = StopSignal::new();
    watch_stdin(stop.clone());

    let worker_stop = stop.clone();
    let mut worker =
        tokio::task::spawn_blocking(move || run_blocking(&settings, &opts, &worker_stop));

    let summary = tokio::select! {
        res = &mut worker => res??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            stop.stop();
            worker.await??
        }
    };

    println!(
        "stopped: {} frames, {} checks, {} missed",
        summary.frames, summary.checks, summary.misses
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::session::SessionSettings;
    use facegate_core::{
        BoundingBox, Detection, DisplayState, EmbeddingProvider, Embedding, ProviderError,
        EMBEDDING_DIM,
    };
    use image::{GenericImageView, Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::time::Instant;

    struct ScriptedCapture(VecDeque<Result<Frame, CameraError>>);

    impl Capture for ScriptedCapture {
        fn capture(&mut self) -> Result<Frame, CameraError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(CameraError::CaptureFailed("script exhausted".into())))
        }
    }

    fn frame(id: u8, is_dark: bool) -> Frame {
        Frame {
            image: RgbImage::from_pixel(32, 32, Rgb([id, if is_dark { 0 } else { 90 }, 0])),
            timestamp: Instant::now(),
            sequence: 0,
            is_dark,
        }
    }

    fn source(frames: Vec<Frame>) -> CameraSource<ScriptedCapture> {
        CameraSource::new(ScriptedCapture(frames.into_iter().map(Ok).collect()))
    }

    /// Red channel selects a one-hot identity; 0 (a black frame) is no face.
    struct RedChannelProvider;

    impl EmbeddingProvider for RedChannelProvider {
        fn extract(&mut self, image: &DynamicImage, _: f32) -> Result<Vec<Detection>, ProviderError> {
            let (w, h) = image.dimensions();
            let id = image.to_rgb8().get_pixel(0, 0).0[0] as usize;
            if id == 0 {
                return Ok(Vec::new());
            }
            let mut embedding = vec![0.0; EMBEDDING_DIM];
            embedding[id] = 1.0;
            Ok(vec![Detection {
                bbox: BoundingBox::new(0, 0, w as i32, h as i32),
                confidence: 0.99,
                embedding: Some(embedding),
            }])
        }
    }

    #[test]
    fn test_dark_warmup_frames_are_skipped() {
        let mut src = source(vec![frame(0, true), frame(0, true), frame(7, false)]);
        assert!(src.next_frame().is_none());
        assert!(src.next_frame().is_none());
        assert!(src.next_frame().is_some());
    }

    #[test]
    fn test_warmup_is_bounded() {
        let frames = (0..=WARMUP_FRAMES).map(|_| frame(0, true)).collect();
        let mut src = source(frames);
        for _ in 0..WARMUP_FRAMES {
            assert!(src.next_frame().is_none());
        }
        assert!(src.next_frame().is_some());
    }

    #[test]
    fn test_capture_failure_is_a_miss() {
        let mut src = CameraSource::new(ScriptedCapture(VecDeque::from([
            Err(CameraError::DeviceBusy),
            Ok(frame(7, false)),
        ])));
        assert!(src.next_frame().is_none());
        assert!(src.next_frame().is_some());
        assert_eq!(src.consecutive_failures, 0);
    }

    #[test]
    fn test_darkness_after_match_shows_no_face() {
        let store = RegistrationStore::open_in_memory().unwrap();
        let mut reference = vec![0.0; EMBEDDING_DIM];
        reference[7] = 1.0;
        store.save(&Embedding::from_values(reference).unwrap()).unwrap();

        let settings = SessionSettings::default();
        let interval = settings.check_interval;
        let mut session = VerificationSession::start(RedChannelProvider, &store, settings).unwrap();
        let mut src = source(vec![frame(7, false), frame(0, true), frame(0, true)]);

        let t0 = Instant::now();
        let lit = src.next_frame().unwrap();
        assert!(matches!(session.step(&lit, t0), DisplayState::Matched { .. }));

        // Within the interval the match is still shown.
        let dark = src.next_frame().expect("dark frame after warm-up is delivered");
        assert!(matches!(session.step(&dark, t0), DisplayState::Matched { .. }));

        let dark = src.next_frame().expect("dark frame after warm-up is delivered");
        assert_eq!(*session.step(&dark, t0 + interval), DisplayState::NoFaceVisible);
    }

    #[test]
    fn test_end_of_input_does_not_stop() {
        let stop = StopSignal::new();
        wait_for_quit(Cursor::new(""), &stop);
        assert!(!stop.is_stopped());

        wait_for_quit(Cursor::new("hello\n\n"), &stop);
        assert!(!stop.is_stopped());
    }

    #[test]
    fn test_q_stops() {
        let stop = StopSignal::new();
        wait_for_quit(Cursor::new("x\n Q \nmore\n"), &stop);
        assert!(stop.is_stopped());
    }
}
