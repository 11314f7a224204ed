// ABOUTME: Optional smart-resize of decoded frames before VLM submission, configured via sampling.resize.*
// ABOUTME: Ported from examples/original_source/src/monitor/utils/image_utils.py::smart_resize_frame

use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Mirrors `sampling.resize.*` in the configuration (§3 FrameResizePolicy).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameResizePolicy {
    pub enabled: bool,
    pub target_width: u32,
    pub target_height: u32,
    pub max_frame_size_mb: f64,
    pub maintain_aspect_ratio: bool,
}

impl Default for FrameResizePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            target_width: 640,
            target_height: 360,
            max_frame_size_mb: 5.0,
            maintain_aspect_ratio: true,
        }
    }
}

/// Resizes `frame` per `policy`, returning the original if it already fits
/// the bounds. Mirrors the Python original's two-pass resize: first to
/// `target_width`x`target_height` (or the aspect-preserving equivalent),
/// then a further shrink if the result still exceeds `max_frame_size_mb`.
pub fn smart_resize_frame(frame: &RgbImage, policy: &FrameResizePolicy) -> RgbImage {
    let (width, height) = frame.dimensions();
    let size_mb = frame_size_mb(frame);

    if width <= policy.target_width && height <= policy.target_height && size_mb <= policy.max_frame_size_mb {
        return frame.clone();
    }

    let (new_width, new_height) = if policy.maintain_aspect_ratio {
        let scale_w = policy.target_width as f64 / width as f64;
        let scale_h = policy.target_height as f64 / height as f64;
        let scale = scale_w.min(scale_h);
        (
            even((width as f64 * scale) as u32),
            even((height as f64 * scale) as u32),
        )
    } else {
        (policy.target_width, policy.target_height)
    };

    let mut resized = image::imageops::resize(frame, new_width.max(2), new_height.max(2), FilterType::Triangle);

    let resized_size_mb = frame_size_mb(&resized);
    if resized_size_mb > policy.max_frame_size_mb {
        let scale = (policy.max_frame_size_mb / resized_size_mb).sqrt();
        let final_width = even(((resized.width() as f64) * scale) as u32).max(2);
        let final_height = even(((resized.height() as f64) * scale) as u32).max(2);
        resized = image::imageops::resize(&resized, final_width, final_height, FilterType::Triangle);
    }

    resized
}

fn frame_size_mb(frame: &RgbImage) -> f64 {
    (frame.as_raw().len() as f64) / (1024.0 * 1024.0)
}

/// Encoders commonly require even dimensions.
fn even(value: u32) -> u32 {
    if value % 2 == 0 {
        value
    } else {
        value.saturating_sub(1)
    }
}

/// Basic shape/size sanity check before a frame is allowed into the
/// pipeline; ported from `image_utils.py::validate_frame`.
pub fn validate_frame(frame: &RgbImage) -> bool {
    let (width, height) = frame.dimensions();
    width >= 1 && height >= 1 && width <= 10_000 && height <= 10_000
}

/// Re-encodes a (possibly resized) frame back to JPEG bytes, for the
/// payload actually submitted to the VLM once `smart_resize_frame` has run.
pub fn encode_jpeg(frame: &RgbImage) -> std::result::Result<bytes::Bytes, image::ImageError> {
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(frame.clone())
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;
    Ok(bytes::Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_within_bounds_are_untouched() {
        let policy = FrameResizePolicy::default();
        let frame = RgbImage::new(320, 180);
        let resized = smart_resize_frame(&frame, &policy);
        assert_eq!(resized.dimensions(), (320, 180));
    }

    #[test]
    fn oversized_frame_is_scaled_down_preserving_aspect() {
        let policy = FrameResizePolicy {
            target_width: 640,
            target_height: 360,
            ..FrameResizePolicy::default()
        };
        let frame = RgbImage::new(1920, 1080);
        let resized = smart_resize_frame(&frame, &policy);
        assert!(resized.width() <= 640);
        assert!(resized.height() <= 360);
        let ratio = resized.width() as f64 / resized.height() as f64;
        assert!((ratio - 16.0 / 9.0).abs() < 0.05);
    }

    #[test]
    fn validate_frame_rejects_degenerate_dimensions() {
        assert!(validate_frame(&RgbImage::new(100, 100)));
        assert!(!validate_frame(&RgbImage::new(20_000, 10)));
    }

    #[test]
    fn encode_jpeg_round_trips_dimensions() {
        let frame = RgbImage::from_pixel(16, 16, image::Rgb([200, 100, 50]));
        let encoded = encode_jpeg(&frame).unwrap();
        let decoded = image::load_from_memory_with_format(&encoded, image::ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 16));
    }
}
