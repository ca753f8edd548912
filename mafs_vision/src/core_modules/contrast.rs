// THEORY:
// The `contrast` module prepares a smoothed radar scene for thresholding. Land and
// sea differ mostly in local texture and brightness, and those differences are
// often compressed into a narrow band of the histogram. A light Gaussian blur
// removes residual grain, then Contrast Limited Adaptive Histogram Equalization
// (CLAHE) stretches each region of the scene against its own neighborhood.
//
// CLAHE in brief:
// 1.  The image is split into a grid of tiles (8x8 by default). If the size is not a
//     multiple of the grid, the image is extended with a reflect-101 border first.
// 2.  Every tile gets its own histogram. Bins above the clip limit are cut and the
//     excess is spread back over all bins, which caps how much any tile can be
//     stretched and keeps noise in flat tiles from exploding.
// 3.  Each tile's clipped cumulative histogram becomes a lookup table.
// 4.  Every pixel is mapped through the four nearest tile tables and the results are
//     blended bilinearly, so no tile seams appear.

use crate::core_modules::filters::gaussian_blur;
use crate::core_modules::raster::{blank_like, Border};
use image::GrayImage;

pub const ENHANCE_BLUR_SIZE: usize = 7;
pub const CLAHE_CLIP_LIMIT: f64 = 2.0;
pub const CLAHE_TILES: u32 = 8;

const BINS: usize = 256;

/// Gaussian blur (7x7) followed by CLAHE.
pub fn contrast_enhance(image: &GrayImage, clip_limit: f64, tiles: u32) -> GrayImage {
    let blurred = gaussian_blur(image, ENHANCE_BLUR_SIZE, Border::Reflect101);
    clahe(&blurred, clip_limit, tiles, tiles)
}

/// Contrast limited adaptive histogram equalization over a `tiles_x` by `tiles_y` grid.
pub fn clahe(image: &GrayImage, clip_limit: f64, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }
    let tiles_x = tiles_x.max(1) as usize;
    let tiles_y = tiles_y.max(1) as usize;
    let src = image.as_raw();

    // --- 1. Tile Geometry ---
    // Pad up to a multiple of the grid; padded samples are read through the border rule.
    let padded_w = if w % tiles_x == 0 { w } else { w + tiles_x - w % tiles_x };
    let padded_h = if h % tiles_y == 0 { h } else { h + tiles_y - h % tiles_y };
    let tile_w = padded_w / tiles_x;
    let tile_h = padded_h / tiles_y;
    let tile_area = tile_w * tile_h;

    let clip = if clip_limit > 0.0 {
        ((clip_limit * tile_area as f64 / BINS as f64) as usize).max(1)
    } else {
        usize::MAX
    };
    let lut_scale = (BINS - 1) as f64 / tile_area as f64;

    // --- 2. Per-Tile Lookup Tables ---
    let mut luts = vec![[0u8; BINS]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0usize; BINS];
            for py in ty * tile_h..(ty + 1) * tile_h {
                let sy = Border::Reflect101.index(py as isize, h);
                for px in tx * tile_w..(tx + 1) * tile_w {
                    let sx = Border::Reflect101.index(px as isize, w);
                    hist[src[sy * w + sx] as usize] += 1;
                }
            }

            clip_histogram(&mut hist, clip);

            let lut = &mut luts[ty * tiles_x + tx];
            let mut cumulative = 0usize;
            for (bin, entry) in lut.iter_mut().enumerate() {
                cumulative += hist[bin];
                *entry = (cumulative as f64 * lut_scale).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    // --- 3. Bilinear Blend Between Neighboring Tiles ---
    let inv_tw = 1.0 / tile_w as f64;
    let inv_th = 1.0 / tile_h as f64;
    let mut out = blank_like(image);
    let dst = &mut *out;
    for y in 0..h {
        let tyf = y as f64 * inv_th - 0.5;
        let ty1_raw = tyf.floor();
        let ya = tyf - ty1_raw;
        let ty1 = (ty1_raw.max(0.0) as usize).min(tiles_y - 1);
        let ty2 = ((ty1_raw + 1.0).max(0.0) as usize).min(tiles_y - 1);

        for x in 0..w {
            let txf = x as f64 * inv_tw - 0.5;
            let tx1_raw = txf.floor();
            let xa = txf - tx1_raw;
            let tx1 = (tx1_raw.max(0.0) as usize).min(tiles_x - 1);
            let tx2 = ((tx1_raw + 1.0).max(0.0) as usize).min(tiles_x - 1);

            let v = src[y * w + x] as usize;
            let top = luts[ty1 * tiles_x + tx1][v] as f64 * (1.0 - xa) + luts[ty1 * tiles_x + tx2][v] as f64 * xa;
            let bottom = luts[ty2 * tiles_x + tx1][v] as f64 * (1.0 - xa) + luts[ty2 * tiles_x + tx2][v] as f64 * xa;
            dst[y * w + x] = (top * (1.0 - ya) + bottom * ya).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Cuts every bin at `clip` and hands the excess back: an equal share to every bin,
/// the remainder one count at a time at evenly spaced bins.
fn clip_histogram(hist: &mut [usize; BINS], clip: usize) {
    if clip == usize::MAX {
        return;
    }
    let mut clipped = 0usize;
    for count in hist.iter_mut() {
        if *count > clip {
            clipped += *count - clip;
            *count = clip;
        }
    }

    let share = clipped / BINS;
    let residual = clipped - share * BINS;
    for count in hist.iter_mut() {
        *count += share;
    }
    if residual != 0 {
        let step = (BINS / residual).max(1);
        for bin in (0..BINS).step_by(step).take(residual) {
            hist[bin] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn clipped_histogram_preserves_total_count() {
        let mut hist = [0usize; BINS];
        hist[10] = 3000;
        hist[200] = 1096;
        clip_histogram(&mut hist, 32);
        assert_eq!(hist.iter().sum::<usize>(), 4096);
        assert!(hist.iter().all(|&c| c <= 32 + 4096 / BINS + 1));
    }

    #[test]
    fn flat_image_stays_flat() {
        let flat = GrayImage::from_pixel(64, 64, Luma([128]));
        let out = contrast_enhance(&flat, CLAHE_CLIP_LIMIT, CLAHE_TILES);
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn low_contrast_ramp_is_stretched() {
        // Intensities confined to 100..=115 should spread well beyond that band.
        let ramp = GrayImage::from_fn(96, 80, |x, _| Luma([100 + (x % 16) as u8]));
        let out = clahe(&ramp, CLAHE_CLIP_LIMIT, CLAHE_TILES, CLAHE_TILES);
        let min = out.pixels().map(|p| p.0[0]).min().unwrap();
        let max = out.pixels().map(|p| p.0[0]).max().unwrap();
        assert!(max - min > 15, "range {min}..{max} was not stretched");
    }

    #[test]
    fn sizes_not_divisible_by_the_grid_are_handled() {
        let image = GrayImage::from_fn(37, 23, |x, y| Luma([((x * 5 + y * 3) % 256) as u8]));
        let out = contrast_enhance(&image, CLAHE_CLIP_LIMIT, CLAHE_TILES);
        assert_eq!(out.dimensions(), (37, 23));

        let tiny = GrayImage::from_pixel(3, 2, Luma([40]));
        assert_eq!(clahe(&tiny, CLAHE_CLIP_LIMIT, CLAHE_TILES, CLAHE_TILES).dimensions(), (3, 2));
    }
}
