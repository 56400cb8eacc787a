//! Rejects detected face candidates too small or too blurry to encode
//! reliably.

use image::{DynamicImage, GenericImageView, GrayImage};

use crate::store::{BoundingBox, FaceQuality};

/// Minimum grayscale standard deviation for a usable crop. Tunable.
pub const MIN_CONTRAST: f64 = 20.0;
/// Minimum Laplacian-response variance for a usable crop. Tunable.
pub const MIN_SHARPNESS: f64 = 50.0;

/// A detection that passed the quality gate, with its measurements.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub location: BoundingBox,
    pub size: (u32, u32),
    pub quality: FaceQuality,
}

/// Measure the face region and return it as a candidate, or `None` when it
/// is undersized or fails the contrast/sharpness thresholds. Side-effect
/// free.
pub fn evaluate(
    frame: &DynamicImage,
    location: BoundingBox,
    min_face_size: u32,
) -> Option<FaceCandidate> {
    let width = location.width();
    let height = location.height();
    if width < min_face_size as i32 || height < min_face_size as i32 {
        return None;
    }

    let gray = gray_region(frame, &location)?;
    let contrast = intensity_stddev(&gray);
    let sharpness = laplacian_variance(&gray);
    if contrast < MIN_CONTRAST || sharpness < MIN_SHARPNESS {
        return None;
    }

    Some(FaceCandidate {
        location,
        size: (width as u32, height as u32),
        quality: FaceQuality {
            contrast,
            sharpness,
        },
    })
}

/// Grayscale crop of the region, clamped to the frame bounds. `None` when
/// the clamped region is empty.
fn gray_region(frame: &DynamicImage, location: &BoundingBox) -> Option<GrayImage> {
    let (fw, fh) = frame.dimensions();
    let x = location.left.clamp(0, fw as i32) as u32;
    let y = location.top.clamp(0, fh as i32) as u32;
    let right = location.right.clamp(0, fw as i32) as u32;
    let bottom = location.bottom.clamp(0, fh as i32) as u32;
    if right <= x || bottom <= y {
        return None;
    }
    Some(frame.crop_imm(x, y, right - x, bottom - y).to_luma8())
}

/// Population standard deviation of pixel intensities.
fn intensity_stddev(gray: &GrayImage) -> f64 {
    let n = (gray.width() * gray.height()) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for p in gray.pixels() {
        let v = p[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt()
}

/// Variance of the 3x3 Laplacian response over interior pixels. Near-zero
/// for blurred crops, large for crisp ones.
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let w = gray.width();
    let h = gray.height();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let mut responses = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            responses.push(lap);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n
}
