//! Plate variant generation
//!
//! Produces a fixed, ordered set of processed renderings of one plate crop so
//! the OCR engine gets several chances at a distorted or skewed plate. The
//! order is deterministic: the unrotated base comes first (its grayscale and
//! sharpened renderings form the fast tier), followed by each rotation.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology;
use tracing::debug;

use super::crop::PlateCrop;
use crate::config::OcrSettings;

/// Rotation angles (degrees) applied after the unrotated base
pub const ROTATION_ANGLES: [f32; 6] = [-15.0, -10.0, -5.0, 5.0, 10.0, 15.0];

/// Gaussian sigma approximating a 31px adaptive-threshold block
const THRESHOLD_SIGMA: f32 = 5.0;
/// Offset subtracted from the local mean before thresholding
const THRESHOLD_OFFSET: f32 = 2.0;
/// Contrast-limited equalization: clip limit and tile grid
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_TILES: u32 = 8;

/// Processing applied to a rotated base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Grayscale,
    Sharpened,
    AdaptiveThreshold,
    InvertedThreshold,
    LocalContrast,
    Closed,
}

impl VariantKind {
    /// Emission order within one rotated base
    pub const ALL: [VariantKind; 6] = [
        VariantKind::Grayscale,
        VariantKind::Sharpened,
        VariantKind::AdaptiveThreshold,
        VariantKind::InvertedThreshold,
        VariantKind::LocalContrast,
        VariantKind::Closed,
    ];
}

/// One processed rendering of a plate crop
#[derive(Debug, Clone)]
pub struct Variant {
    /// Processed image
    pub image: GrayImage,
    /// Processing applied
    pub kind: VariantKind,
    /// Rotation in degrees (0 for the base)
    pub angle: f32,
}

/// Number of variants produced for a non-empty crop
pub const fn variant_count() -> usize {
    (ROTATION_ANGLES.len() + 1) * VariantKind::ALL.len()
}

/// Generate the ordered variant set for a crop. An empty crop yields no variants.
pub fn generate_variants(crop: &PlateCrop, settings: &OcrSettings) -> Vec<Variant> {
    if crop.is_empty() {
        return Vec::new();
    }

    let scaled = scale_to_band(
        crop.image(),
        settings.min_variant_dim,
        settings.max_variant_dim,
        settings.max_upscale,
    );

    let mut variants = Vec::with_capacity(variant_count());
    let angles = std::iter::once(0.0).chain(ROTATION_ANGLES);

    for angle in angles {
        let base = if angle == 0.0 { scaled.clone() } else { rotate(&scaled, angle) };
        variants.extend(process_base(&base, angle));
    }

    debug!(
        "Generated {} variants from {}x{} crop (scaled to {}x{})",
        variants.len(),
        crop.width(),
        crop.height(),
        scaled.width(),
        scaled.height()
    );

    variants
}

fn process_base(base: &RgbImage, angle: f32) -> Vec<Variant> {
    let gray = median_filter(&image::imageops::grayscale(base), 1, 1);
    let sharpened = unsharp(&gray);
    let threshold = adaptive_threshold(&gray);
    let mut inverted = threshold.clone();
    image::imageops::invert(&mut inverted);
    let local_contrast = clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_TILES);
    let closed = morphology::close(&threshold, Norm::LInf, 1);

    let images = [gray, sharpened, threshold, inverted, local_contrast, closed];
    images
        .into_iter()
        .zip(VariantKind::ALL)
        .map(|(image, kind)| Variant { image, kind, angle })
        .collect()
}

/// Rescale so the longest side is at most `max_dim`; otherwise upscale a short
/// side below `min_dim` (by at most `max_upscale`). Degenerate input is
/// returned unchanged.
pub fn scale_to_band(image: &RgbImage, min_dim: u32, max_dim: u32, max_upscale: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let largest = width.max(height);
    let smallest = width.min(height);

    let scale = if largest > max_dim {
        max_dim as f32 / largest as f32
    } else if smallest < min_dim {
        (min_dim as f32 / smallest as f32).min(max_upscale)
    } else {
        1.0
    };

    if (scale - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }

    let new_width = ((width as f32 * scale) as u32).max(1);
    let new_height = ((height as f32 * scale) as u32).max(1);
    let filter = if scale < 1.0 {
        image::imageops::FilterType::Triangle
    } else {
        image::imageops::FilterType::CatmullRom
    };
    image::imageops::resize(image, new_width, new_height, filter)
}

/// Rotate about the center, filling uncovered corners with the mean border color
pub fn rotate(image: &RgbImage, degrees: f32) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let fill = border_mean(image);
    rotate_about_center(image, degrees.to_radians(), Interpolation::Bilinear, fill)
}

fn border_mean(image: &RgbImage) -> Rgb<u8> {
    let (w, h) = image.dimensions();
    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for (x, y, px) in image.enumerate_pixels() {
        if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
            for (acc, channel) in sum.iter_mut().zip(px.0) {
                *acc += channel as u64;
            }
            count += 1;
        }
    }
    let count = count.max(1);
    Rgb([
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
    ])
}

/// Unsharp mask: 1.5 * image - 0.5 * blurred
fn unsharp(gray: &GrayImage) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, 1.0);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let center = gray.get_pixel(x, y)[0] as f32;
        let blur = blurred.get_pixel(x, y)[0] as f32;
        Luma([(center * 1.5 - blur * 0.5).clamp(0.0, 255.0) as u8])
    })
}

/// Binarize against a Gaussian-weighted local mean
fn adaptive_threshold(gray: &GrayImage) -> GrayImage {
    let local_mean = gaussian_blur_f32(gray, THRESHOLD_SIGMA);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0] as f32;
        let mean = local_mean.get_pixel(x, y)[0] as f32;
        if value > mean - THRESHOLD_OFFSET {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Contrast-limited adaptive histogram equalization
///
/// Builds a clipped, equalized lookup table per tile and bilinearly blends
/// the four nearest tile tables for each pixel.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tiles_x = tiles.clamp(1, width);
    let tiles_y = tiles.clamp(1, height);
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(gray, x0, y0, x1, y1, clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

    GrayImage::from_fn(width, height, |x, y| {
        let value = gray.get_pixel(x, y)[0] as usize;

        // Position relative to tile centers
        let gx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).clamp(0.0, (tiles_x - 1) as f32);
        let gy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).clamp(0.0, (tiles_y - 1) as f32);
        let tx0 = gx.floor() as u32;
        let ty0 = gy.floor() as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fx = gx - tx0 as f32;
        let fy = gy - ty0 as f32;

        let top = lut_at(tx0, ty0)[value] as f32 * (1.0 - fx) + lut_at(tx1, ty0)[value] as f32 * fx;
        let bottom = lut_at(tx0, ty1)[value] as f32 * (1.0 - fx) + lut_at(tx1, ty1)[value] as f32 * fx;
        Luma([(top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[gray.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let area = ((x1 - x0) * (y1 - y0)).max(1);
    let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    // Clip and redistribute the excess evenly
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let bonus = excess / 256;
    let mut remainder = excess % 256;
    for bin in hist.iter_mut() {
        *bin += bonus;
        if remainder > 0 {
            *bin += 1;
            remainder -= 1;
        }
    }

    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (value, bin) in hist.iter().enumerate() {
        cumulative += bin;
        lut[value] = ((cumulative as f32 * 255.0) / area as f32).round().min(255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 7 + y * 3) % 256) as u8;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_variant_count_is_fixed() {
        let crop = PlateCrop::new(gradient(120, 40));
        let variants = generate_variants(&crop, &OcrSettings::default());
        assert_eq!(variants.len(), variant_count());
        assert_eq!(variants.len(), 42);
    }

    #[test]
    fn test_variant_order() {
        let crop = PlateCrop::new(gradient(120, 40));
        let variants = generate_variants(&crop, &OcrSettings::default());

        assert_eq!(variants[0].kind, VariantKind::Grayscale);
        assert_eq!(variants[1].kind, VariantKind::Sharpened);
        assert_eq!(variants[0].angle, 0.0);
        assert_eq!(variants[6].angle, -15.0);
        assert_eq!(variants[41].kind, VariantKind::Closed);
        assert_eq!(variants[41].angle, 15.0);
    }

    #[test]
    fn test_empty_crop_yields_nothing() {
        let crop = PlateCrop::new(RgbImage::new(0, 0));
        assert!(generate_variants(&crop, &OcrSettings::default()).is_empty());
    }

    #[test]
    fn test_scale_down_large() {
        let scaled = scale_to_band(&gradient(640, 160), 96, 320, 1.5);
        assert_eq!(scaled.dimensions(), (320, 80));
    }

    #[test]
    fn test_scale_up_small_is_capped() {
        let scaled = scale_to_band(&gradient(100, 20), 96, 320, 1.5);
        assert_eq!(scaled.dimensions(), (150, 30));
    }

    #[test]
    fn test_scale_noop_inside_band() {
        let scaled = scale_to_band(&gradient(200, 100), 96, 320, 1.5);
        assert_eq!(scaled.dimensions(), (200, 100));
    }

    #[test]
    fn test_scale_degenerate_unchanged() {
        let scaled = scale_to_band(&RgbImage::new(0, 5), 96, 320, 1.5);
        assert_eq!(scaled.dimensions(), (0, 5));
    }

    #[test]
    fn test_rotation_keeps_dimensions() {
        let rotated = rotate(&gradient(60, 20), 10.0);
        assert_eq!(rotated.dimensions(), (60, 20));
    }

    #[test]
    fn test_threshold_is_binary() {
        let gray = image::imageops::grayscale(&gradient(64, 32));
        let binary = adaptive_threshold(&gray);
        assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_clahe_uniform_image_stays_uniform() {
        let gray = GrayImage::from_pixel(32, 32, Luma([100]));
        let out = clahe(&gray, 2.0, 8);
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_clahe_spreads_low_contrast() {
        let gray = GrayImage::from_fn(32, 32, |x, _| Luma([if x < 16 { 100 } else { 110 }]));
        let out = clahe(&gray, 4.0, 1);
        let left = out.get_pixel(0, 0)[0] as i32;
        let right = out.get_pixel(31, 0)[0] as i32;
        assert!(right - left > 10);
    }
}
