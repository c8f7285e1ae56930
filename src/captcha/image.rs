//! Puzzle-piece location via gradient template matching.
//!
//! The slider captcha shows a background with a rectangular gap and a cut-out
//! piece. Matching is done on Sobel gradient magnitudes rather than raw
//! pixels, which makes the score robust to the background's color variation
//! and the piece's semi-transparent overlay.

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage};

/// Sigma for the pre-matching Gaussian blur (noise suppression).
const BLUR_SIGMA: f32 = 0.8;

/// Decode an image from raw bytes.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context("failed to decode captcha image")
}

/// Uniformly rescale an image by `ratio`, preserving aspect.
#[must_use]
pub fn rescale(img: &DynamicImage, ratio: f64) -> DynamicImage {
    let width = ((f64::from(img.width()) * ratio).round() as u32).max(1);
    let height = ((f64::from(img.height()) * ratio).round() as u32).max(1);
    img.resize_exact(width, height, image::imageops::FilterType::Triangle)
}

/// Blur, convert to single-channel intensity, and compute the Sobel gradient
/// magnitude (average of absolute horizontal and vertical responses).
fn preprocess(img: &DynamicImage) -> GrayImage {
    let gray = img.blur(BLUR_SIGMA).to_luma8();
    let (width, height) = gray.dimensions();
    let mut gradient = GrayImage::new(width, height);

    // Clamp-to-edge sampling keeps border responses defined.
    let sample = |x: i64, y: i64| -> i32 {
        let cx = x.clamp(0, i64::from(width) - 1) as u32;
        let cy = y.clamp(0, i64::from(height) - 1) as u32;
        i32::from(gray.get_pixel(cx, cy).0[0])
    };

    for y in 0..height {
        for x in 0..width {
            let (xi, yi) = (i64::from(x), i64::from(y));
            let gx = -sample(xi - 1, yi - 1) + sample(xi + 1, yi - 1)
                - 2 * sample(xi - 1, yi)
                + 2 * sample(xi + 1, yi)
                - sample(xi - 1, yi + 1)
                + sample(xi + 1, yi + 1);
            let gy = -sample(xi - 1, yi - 1) - 2 * sample(xi, yi - 1) - sample(xi + 1, yi - 1)
                + sample(xi - 1, yi + 1)
                + 2 * sample(xi, yi + 1)
                + sample(xi + 1, yi + 1);
            let magnitude = (gx.unsigned_abs() / 2 + gy.unsigned_abs() / 2).min(255);
            gradient.put_pixel(x, y, image::Luma([magnitude as u8]));
        }
    }

    gradient
}

/// Locate the piece within the background.
///
/// Returns the top-left `(x, y)` of the position minimizing the
/// sum-of-squared-differences between the two gradient images. The piece
/// must be strictly smaller than the background in both dimensions.
pub fn locate(background: &DynamicImage, piece: &DynamicImage) -> Result<(u32, u32)> {
    let bg = preprocess(background);
    let template = preprocess(piece);

    let (bg_w, bg_h) = bg.dimensions();
    let (t_w, t_h) = template.dimensions();
    if t_w >= bg_w || t_h >= bg_h {
        anyhow::bail!(
            "piece ({t_w}x{t_h}) does not fit within background ({bg_w}x{bg_h})"
        );
    }

    let mut best = (0_u32, 0_u32);
    let mut best_score = u64::MAX;

    for y in 0..=(bg_h - t_h) {
        for x in 0..=(bg_w - t_w) {
            let mut score: u64 = 0;
            'window: for ty in 0..t_h {
                for tx in 0..t_w {
                    let b = i64::from(bg.get_pixel(x + tx, y + ty).0[0]);
                    let t = i64::from(template.get_pixel(tx, ty).0[0]);
                    let diff = b - t;
                    score += (diff * diff) as u64;
                    if score >= best_score {
                        break 'window;
                    }
                }
            }
            if score < best_score {
                best_score = score;
                best = (x, y);
            }
        }
    }

    Ok(best)
}
