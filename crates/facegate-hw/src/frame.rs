//! Frame type and pixel conversion — YUYV/GREY/MJPG to RGB, dark detection.

use image::{ImageFormat, Rgb, RgbImage};

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let n = self.image.width() as usize * self.image.height() as usize;
        if n == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p) as f32).sum::<f32>() / n as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("YUYV width must be even, got {0}")]
    OddWidth(u32),
    #[error("MJPG decode failed: {0}")]
    Decode(String),
}

/// Integer BT.601 luma approximation.
fn luma(p: &Rgb<u8>) -> u8 {
    let [r, g, b] = p.0;
    ((r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8) as u8
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 limited-range YUV to RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((298 * c + 409 * e + 128) >> 8),
        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V,
/// so `width` must be even.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    if width % 2 != 0 {
        return Err(FrameError::OddWidth(width));
    }
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut out = Vec::with_capacity(pixels * 3);
    for i in 0..pixels {
        let pair = (i / 2) * 4;
        let y = if i % 2 == 0 { yuyv[pair] } else { yuyv[pair + 2] };
        out.extend_from_slice(&yuv_to_rgb(y, yuyv[pair + 1], yuyv[pair + 3]));
    }

    RgbImage::from_raw(width, height, out).ok_or(FrameError::InvalidLength {
        expected: pixels * 3,
        actual: 0,
    })
}

/// Replicate an 8-bit grayscale buffer into RGB.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = gray[(y * width + x) as usize];
        Rgb([v, v, v])
    }))
}

/// Decode one Motion-JPEG frame.
pub fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, FrameError> {
    image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| FrameError::Decode(e.to_string()))
}

/// True if more than `threshold_pct` of pixels have luma below 32.
///
/// Typical of frames captured while the sensor is still adjusting exposure.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return true;
    }
    let dark = image.pixels().filter(|p| luma(p) < 32).count();
    (dark as f32 / total as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [98, 98, 98]);
        assert_eq!(rgb.get_pixel(1, 0).0, [214, 214, 214]);
    }

    #[test]
    fn test_yuyv_black_and_white_levels() {
        let rgb = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // Strong V pushes red up and green down.
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > 200 && g < 60 && b < 60, "got {r},{g},{b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_yuyv_odd_width_rejected() {
        // 3x1 would need a chroma pair past the end of the buffer.
        let err = yuyv_to_rgb(&[100, 128, 200, 128, 50, 128], 3, 1).unwrap_err();
        assert!(matches!(err, FrameError::OddWidth(3)));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[0, 10, 20, 30], 2, 2).unwrap();
        assert_eq!(rgb.get_pixel(1, 1).0, [30, 30, 30]);
        assert!(grey_to_rgb(&[0, 1], 2, 2).is_err());
    }

    #[test]
    fn test_decode_mjpeg_roundtrip_dimensions() {
        let img = RgbImage::from_pixel(16, 8, Rgb([120, 60, 30]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let decoded = decode_mjpeg(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert!(decode_mjpeg(b"garbage").is_err());
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&RgbImage::new(20, 20), 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        let img = RgbImage::from_pixel(20, 20, Rgb([128, 128, 128]));
        assert!(!is_dark_frame(&img, 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&RgbImage::new(0, 0), 0.95));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 96 of 100 dark → dark; 94 of 100 dark → not dark.
        let mostly = RgbImage::from_fn(10, 10, |x, y| {
            if y * 10 + x < 96 { Rgb([10, 10, 10]) } else { Rgb([128, 128, 128]) }
        });
        assert!(is_dark_frame(&mostly, 0.95));

        let some = RgbImage::from_fn(10, 10, |x, y| {
            if y * 10 + x < 94 { Rgb([10, 10, 10]) } else { Rgb([128, 128, 128]) }
        });
        assert!(!is_dark_frame(&some, 0.95));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            image: RgbImage::from_pixel(4, 4, Rgb([200, 200, 200])),
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        };
        assert!((frame.avg_brightness() - 200.0).abs() < 1.0);
    }
}
