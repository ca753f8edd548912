// THEORY:
// The `threshold` module turns an enhanced scene into a first binary guess at
// "bright structure". No single cutoff works on radar: a global cutoff captures
// large bright landmasses but misses thin coastlines, while a local cutoff picks up
// fine boundaries but fragments large uniform regions. The fusion step runs both
// and ORs them together.
//
// Key steps of `fuse_threshold`:
// 1.  **Global Cutoff**: Otsu's level, the split that maximizes between-class
//     variance of the histogram. Samples strictly above it are set.
// 2.  **Local Cutoff**: each sample is compared with a Gaussian-weighted mean of its
//     21x21 neighborhood. With inverted polarity a sample is set when it is at least
//     `offset` darker than its surroundings.
// 3.  **Fusion**: OR of the two binary maps, three bilateral passes to soften the
//     ragged union, then a second Otsu pass to snap it back to {0, 255}.

use crate::core_modules::filters::{convolve_separable, gaussian_kernel, smooth, FUSE_SMOOTH_DIAMETER, SMOOTHING_PASSES};
use crate::core_modules::raster::{binarize_above, blank_like, Border, LAND, WATER};
use image::GrayImage;
use imageproc::contrast::otsu_level;

pub const ADAPTIVE_BLOCK_SIZE: u32 = 21;
pub const ADAPTIVE_OFFSET: f64 = 5.0;

/// Otsu level of the image. A single-valued image has no second class, so the level
/// is that value and nothing lies above it.
pub fn global_level(image: &GrayImage) -> u8 {
    let mut samples = image.as_raw().iter();
    let Some(&first) = samples.next() else {
        return 0;
    };
    if samples.all(|&v| v == first) {
        return first;
    }
    otsu_level(image)
}

/// Global-optimal binarization.
pub fn global_threshold(image: &GrayImage) -> GrayImage {
    binarize_above(image, global_level(image))
}

/// Inverted adaptive threshold against a Gaussian-weighted local mean.
/// A sample becomes `LAND` when `value <= round(mean) - ceil(offset)`.
pub fn adaptive_threshold_inv(image: &GrayImage, block_size: u32, offset: f64) -> GrayImage {
    let kernel = gaussian_kernel(block_size.max(1) as usize);
    let local_mean = convolve_separable(image, &kernel, Border::Replicate);
    let offset = offset.ceil() as i32;

    let mut out = blank_like(image);
    for ((dst, &v), mean) in out.iter_mut().zip(image.as_raw()).zip(local_mean) {
        let mean = mean.round().clamp(0.0, 255.0) as i32;
        *dst = if v as i32 - mean > -offset { WATER } else { LAND };
    }
    out
}

/// Fuses global and local thresholds into one binary raster.
pub fn fuse_threshold(image: &GrayImage, block_size: u32, offset: f64) -> GrayImage {
    let global = global_threshold(image);
    let local = adaptive_threshold_inv(image, block_size, offset);

    let mut combined = blank_like(image);
    for ((dst, &g), &l) in combined.iter_mut().zip(global.as_raw()).zip(local.as_raw()) {
        *dst = g | l;
    }

    let softened = smooth(&combined, FUSE_SMOOTH_DIAMETER, SMOOTHING_PASSES);
    global_threshold(&softened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::raster::count_nonzero;
    use image::Luma;

    #[test]
    fn flat_images_have_no_foreground() {
        for value in [0u8, 128, 255] {
            let flat = GrayImage::from_pixel(30, 30, Luma([value]));
            assert_eq!(global_level(&flat), value);
            assert_eq!(count_nonzero(&global_threshold(&flat)), 0);
            assert_eq!(count_nonzero(&fuse_threshold(&flat, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET)), 0);
        }
    }

    #[test]
    fn bimodal_image_splits_between_modes() {
        let image = GrayImage::from_fn(40, 40, |x, _| Luma([if x < 20 { 30 } else { 200 }]));
        let level = global_level(&image);
        assert!((30..200).contains(&level));
        let binary = global_threshold(&image);
        assert_eq!(binary.get_pixel(5, 5).0[0], WATER);
        assert_eq!(binary.get_pixel(35, 5).0[0], LAND);
    }

    #[test]
    fn adaptive_threshold_flags_dark_spots_only() {
        let image = GrayImage::from_fn(41, 41, |x, y| Luma([if x == 20 && y == 20 { 20 } else { 180 }]));
        let local = adaptive_threshold_inv(&image, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET);
        assert_eq!(local.get_pixel(20, 20).0[0], LAND);
        assert_eq!(local.get_pixel(0, 0).0[0], WATER);
        assert_eq!(count_nonzero(&local), 1);
    }

    #[test]
    fn fused_output_is_binary() {
        let image = GrayImage::from_fn(64, 48, |x, y| Luma([((x * 13 + y * 7) % 200 + 20) as u8]));
        let fused = fuse_threshold(&image, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET);
        assert!(fused.pixels().all(|p| p.0[0] == LAND || p.0[0] == WATER));
    }
}
