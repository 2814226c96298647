//! Terminal + PNG rendering for the live loop.

use facegate_core::{BoundingBox, DisplayState, Overlay, Renderer};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::PathBuf;

/// Write the annotated preview every this many frames.
const PREVIEW_EVERY: u64 = 5;
const BOX_THICKNESS: i64 = 3;

fn state_color(state: &DisplayState) -> Rgb<u8> {
    match state {
        DisplayState::Matched { .. } => Rgb([0, 200, 0]),
        DisplayState::NotMatched { .. } => Rgb([220, 0, 0]),
        DisplayState::NoFaceVisible => Rgb([160, 160, 160]),
    }
}

/// Draw a rectangle outline, clipped to the image.
fn draw_box(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: i64) {
    if bbox.is_empty() {
        return;
    }
    let (w, h) = (img.width() as i64, img.height() as i64);
    let left = bbox.x as i64;
    let top = bbox.y as i64;
    let right = left + bbox.width as i64 - 1;
    let bottom = top + bbox.height as i64 - 1;

    let mut put = |x: i64, y: i64| {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            img.put_pixel(x as u32, y as u32, color);
        }
    };

    for t in 0..thickness {
        for x in left..=right {
            put(x, top + t);
            put(x, bottom - t);
        }
        for y in top..=bottom {
            put(left + t, y);
            put(right - t, y);
        }
    }
}

/// Frame with the overlay box drawn in the state's color.
pub fn annotate(frame: &DynamicImage, overlay: &Overlay) -> RgbImage {
    let mut img = frame.to_rgb8();
    draw_box(&mut img, &overlay.bbox, state_color(&overlay.state), BOX_THICKNESS);
    img
}

/// Prints each new label and optionally keeps an annotated PNG up to date.
pub struct PreviewRenderer {
    path: Option<PathBuf>,
    last_label: Option<String>,
    frames: u64,
    transitions: u64,
}

impl PreviewRenderer {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            last_label: None,
            frames: 0,
            transitions: 0,
        }
    }

    fn write_preview(&self, frame: &DynamicImage, overlay: &Overlay) {
        let Some(path) = &self.path else {
            return;
        };
        // Write then rename so viewers never see a half-written file.
        let tmp = path.with_extension("tmp.png");
        let result = annotate(frame, overlay)
            .save(&tmp)
            .map_err(|e| e.to_string())
            .and_then(|()| std::fs::rename(&tmp, path).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to write preview");
        }
    }
}

impl Renderer for PreviewRenderer {
    fn render(&mut self, frame: &DynamicImage, overlay: &Overlay) {
        if self.last_label.as_deref() != Some(overlay.label.as_str()) {
            println!("{}", overlay.label);
            self.last_label = Some(overlay.label.clone());
            self.transitions += 1;
        }

        if self.frames % PREVIEW_EVERY == 0 {
            self.write_preview(frame, overlay);
        }
        self.frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn gray_frame(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([50, 50, 50])))
    }

    #[test]
    fn test_annotate_matched_box_is_green() {
        let state = DisplayState::Matched {
            bbox: BoundingBox::new(10, 10, 20, 20),
            similarity: 0.9,
        };
        let img = annotate(&gray_frame(64, 64), &Overlay::for_state(&state, 64, 64));
        assert_eq!(img.get_pixel(10, 10).0, [0, 200, 0]);
        assert_eq!(img.get_pixel(29, 29).0, [0, 200, 0]);
        // Interior untouched.
        assert_eq!(img.get_pixel(20, 20).0, [50, 50, 50]);
    }

    #[test]
    fn test_annotate_not_matched_box_is_red() {
        let state = DisplayState::NotMatched {
            bbox: BoundingBox::new(0, 0, 8, 8),
            similarity: 0.1,
        };
        let img = annotate(&gray_frame(16, 16), &Overlay::for_state(&state, 16, 16));
        assert_eq!(img.get_pixel(0, 0).0, [220, 0, 0]);
    }

    #[test]
    fn test_box_outside_frame_is_clipped() {
        let state = DisplayState::Matched {
            bbox: BoundingBox::new(-10, -10, 500, 500),
            similarity: 0.9,
        };
        let img = annotate(&gray_frame(16, 16), &Overlay::for_state(&state, 16, 16));
        assert_eq!(img.dimensions(), (16, 16));
        assert_eq!(img.get_pixel(8, 8).0, [50, 50, 50]);
    }

    #[test]
    fn test_renderer_counts_label_changes() {
        let mut renderer = PreviewRenderer::new(None);
        let frame = gray_frame(32, 32);
        let none = Overlay::for_state(&DisplayState::NoFaceVisible, 32, 32);
        let hit = Overlay::for_state(
            &DisplayState::Matched {
                bbox: BoundingBox::new(4, 4, 8, 8),
                similarity: 0.95,
            },
            32,
            32,
        );

        renderer.render(&frame, &none);
        renderer.render(&frame, &none);
        renderer.render(&frame, &hit);
        renderer.render(&frame, &hit);
        assert_eq!(renderer.transitions, 2);
        assert_eq!(renderer.frames, 4);
    }

    #[test]
    fn test_preview_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let mut renderer = PreviewRenderer::new(Some(path.clone()));
        let frame = gray_frame(32, 32);
        renderer.render(&frame, &Overlay::for_state(&DisplayState::NoFaceVisible, 32, 32));

        let written = image::open(&path).unwrap();
        assert_eq!(written.width(), 32);
        assert!(!path.with_extension("tmp.png").exists());
    }
}
