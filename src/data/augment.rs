//! Image preprocessing: decode, resize, train-time augmentation, and
//! ImageNet normalization to CHW float data.

use crate::models::{AtlasError, AugmentationConfig, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::Rng;
use std::path::Path;

/// ImageNet channel means, matching the normalization the upstream data
/// was collected with.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Load an image, apply optional augmentation, and return normalized CHW
/// floats of length `3 * size * size`.
pub fn load_pixels<R: Rng>(
    path: &Path,
    size: usize,
    augment: Option<(&AugmentationConfig, &mut R)>,
) -> Result<Vec<f32>> {
    let img = image::open(path)
        .map_err(|e| AtlasError::image(path, e))?
        .to_rgb8();

    let side = size as u32;
    let mut img = imageops::resize(&img, side, side, FilterType::Triangle);

    if let Some((config, rng)) = augment {
        img = augment_image(img, config, rng);
    }

    Ok(to_normalized_chw(&img))
}

/// Apply the configured augmentations. Output is always `size x size`.
fn augment_image<R: Rng>(img: RgbImage, config: &AugmentationConfig, rng: &mut R) -> RgbImage {
    let side = img.width();
    let mut img = img;

    if config.random_rotation > 0.0 {
        let degrees = rng.gen_range(-config.random_rotation..=config.random_rotation);
        if degrees.abs() > 0.5 {
            img = rotate_about_center(&img, degrees);
        }
    }

    if config.random_horizontal_flip > 0.0 && rng.gen_bool(config.random_horizontal_flip.min(1.0)) {
        img = imageops::flip_horizontal(&img);
    }

    if config.color_jitter_brightness > 0.0 {
        let jitter = rng.gen_range(-config.color_jitter_brightness..=config.color_jitter_brightness);
        img = imageops::brighten(&img, (jitter * 255.0) as i32);
    }

    if config.color_jitter_contrast > 0.0 {
        let jitter = rng.gen_range(-config.color_jitter_contrast..=config.color_jitter_contrast);
        img = imageops::contrast(&img, (jitter * 100.0) as f32);
    }

    let (lo, hi) = config.random_crop_scale;
    if lo < 1.0 {
        let scale = rng.gen_range(lo..=hi);
        let crop_side = ((side as f64 * scale.sqrt()) as u32).clamp(1, side);
        if crop_side < side {
            let x = rng.gen_range(0..=side - crop_side);
            let y = rng.gen_range(0..=side - crop_side);
            let cropped = imageops::crop_imm(&img, x, y, crop_side, crop_side).to_image();
            img = imageops::resize(&cropped, side, side, FilterType::Triangle);
        }
    }

    img
}

/// Nearest-neighbor rotation around the image center, clamping samples
/// that fall outside to the nearest edge pixel.
fn rotate_about_center(img: &RgbImage, degrees: f64) -> RgbImage {
    let (w, h) = img.dimensions();
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let theta = degrees.to_radians();
    let (sin, cos) = theta.sin_cos();

    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            // Inverse mapping: sample the source at the un-rotated position.
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            let sx = cos * dx + sin * dy + cx - 0.5;
            let sy = -sin * dx + cos * dy + cy - 0.5;
            let sx = (sx.round() as i64).clamp(0, w as i64 - 1) as u32;
            let sy = (sy.round() as i64).clamp(0, h as i64 - 1) as u32;
            out.put_pixel(x, y, *img.get_pixel(sx, sy));
        }
    }
    out
}

/// Flatten to CHW order with ImageNet normalization.
pub fn to_normalized_chw(img: &RgbImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let mut data = Vec::with_capacity(3 * (w * h) as usize);

    for channel in 0..3 {
        for y in 0..h {
            for x in 0..w {
                let value = img.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn solid_image(side: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(side, side, Rgb(color))
    }

    #[test]
    fn test_normalized_chw_layout_and_values() {
        // A white image normalizes to (1 - mean) / std per channel.
        let img = solid_image(4, [255, 255, 255]);
        let data = to_normalized_chw(&img);
        assert_eq!(data.len(), 3 * 4 * 4);
        for channel in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            for i in 0..16 {
                assert!((data[channel * 16 + i] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_load_pixels_resizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.png");
        solid_image(10, [0, 0, 0]).save(&path).unwrap();

        let data = load_pixels::<StdRng>(&path, 6, None).unwrap();
        assert_eq!(data.len(), 3 * 6 * 6);
    }

    #[test]
    fn test_load_pixels_missing_file() {
        let result = load_pixels::<StdRng>(Path::new("/nonexistent/img.png"), 8, None);
        assert!(matches!(result, Err(AtlasError::Image { .. })));
    }

    #[test]
    fn test_augmented_size_is_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.png");
        solid_image(32, [128, 40, 200]).save(&path).unwrap();

        let config = AugmentationConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let data = load_pixels(&path, 16, Some((&config, &mut rng))).unwrap();
        assert_eq!(data.len(), 3 * 16 * 16);
    }

    #[test]
    fn test_rotation_preserves_solid_image() {
        let img = solid_image(8, [10, 20, 30]);
        let rotated = rotate_about_center(&img, 15.0);
        assert_eq!(rotated.dimensions(), (8, 8));
        for pixel in rotated.pixels() {
            assert_eq!(pixel.0, [10, 20, 30]);
        }
    }
}
