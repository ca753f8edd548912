// THEORY:
// The `filters` module is the smoothing half of the pixel toolbox. Radar imagery
// is dominated by speckle, a multiplicative grain that a plain Gaussian cannot
// remove without erasing coastlines. The pipeline therefore relies on two
// edge-aware smoothers and a pair of tone curves:
//
// 1.  **Bilateral Smoothing** (`denoise`, `bilateral_filter`): each output sample is
//     a weighted mean of its circular neighborhood, where the weight falls off with
//     both spatial distance and intensity difference. Three passes with a very wide
//     color sigma give a strong, mostly edge-respecting blur.
// 2.  **Adaptive De-speckling** (`speckle_filter`): a Lee-style filter. Local mean and
//     variance come from box filters over the image and its square; where the local
//     coefficient of variation is high (an edge) the sample is kept, where it is low
//     (flat but grainy) the sample is pulled toward the mean.
// 3.  **Tone Curves** (`gamma`, `rescale`): cheap per-sample remaps used between
//     refinement rounds to re-normalize brightness after land has been blanked out.
//
// All functions are pure and allocate their output.

use crate::core_modules::raster::{blank_like, map_samples, Border};
use image::GrayImage;

/// Diameter of the bilateral neighborhood used by `denoise`.
pub const DENOISE_DIAMETER: u32 = 10;
/// Diameter of the bilateral neighborhood used when smoothing fused threshold maps.
pub const FUSE_SMOOTH_DIAMETER: u32 = 9;
pub const BILATERAL_SIGMA_COLOR: f64 = 256.0;
pub const BILATERAL_SIGMA_SPACE: f64 = 75.0;
pub const SMOOTHING_PASSES: usize = 3;

/// Variance floor that keeps the speckle filter finite on flat regions.
pub const SPECKLE_VARIANCE_EPSILON: f64 = 1e-10;

/// Builds a normalized 1-D Gaussian kernel of odd length `size`.
/// Sizes up to 7 use the fixed binomial tables; larger sizes derive sigma from the size.
pub fn gaussian_kernel(size: usize) -> Vec<f64> {
    match size {
        1 => return vec![1.0],
        3 => return vec![0.25, 0.5, 0.25],
        5 => return vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        7 => return vec![0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125],
        _ => {}
    }
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size as f64 - 1.0) * 0.5;
    let scale = -0.5 / (sigma * sigma);
    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (scale * d * d).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable convolution with the same kernel on both axes. Returns unrounded samples.
pub fn convolve_separable(image: &GrayImage, kernel: &[f64], border: Border) -> Vec<f64> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let src = image.as_raw();
    let radius = (kernel.len() / 2) as isize;

    // --- 1. Horizontal Pass ---
    let mut horizontal = vec![0.0f64; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = border.index(x as isize + k as isize - radius, w);
                acc += weight * row[sx] as f64;
            }
            horizontal[y * w + x] = acc;
        }
    }

    // --- 2. Vertical Pass ---
    let mut out = vec![0.0f64; w * h];
    for y in 0..h {
        for (k, weight) in kernel.iter().enumerate() {
            let sy = border.index(y as isize + k as isize - radius, h);
            let src_row = &horizontal[sy * w..(sy + 1) * w];
            let dst_row = &mut out[y * w..(y + 1) * w];
            for (d, s) in dst_row.iter_mut().zip(src_row) {
                *d += weight * s;
            }
        }
    }
    out
}

/// Gaussian blur with an explicit odd kernel size, rounded back to 8 bits.
pub fn gaussian_blur(image: &GrayImage, size: usize, border: Border) -> GrayImage {
    let kernel = gaussian_kernel(size);
    let blurred = convolve_separable(image, &kernel, border);
    let mut out = blank_like(image);
    for (dst, v) in out.iter_mut().zip(blurred) {
        *dst = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Edge-preserving bilateral filter over a circular neighborhood of the given diameter.
pub fn bilateral_filter(image: &GrayImage, diameter: u32, sigma_color: f64, sigma_space: f64) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let src = image.as_raw();
    let radius = (diameter / 2).max(1) as usize;

    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_weight: Vec<f64> = (0..256).map(|d| ((d * d) as f64 * color_coeff).exp()).collect();

    // --- 1. Pad Once ---
    let padded_w = w + 2 * radius;
    let padded_h = h + 2 * radius;
    let mut padded = vec![0u8; padded_w * padded_h];
    for py in 0..padded_h {
        let sy = Border::Reflect101.index(py as isize - radius as isize, h);
        for px in 0..padded_w {
            let sx = Border::Reflect101.index(px as isize - radius as isize, w);
            padded[py * padded_w + px] = src[sy * w + sx];
        }
    }

    // --- 2. Circular Neighborhood ---
    let r = radius as isize;
    let mut offsets: Vec<(isize, f64)> = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let r2 = (dy * dy + dx * dx) as f64;
            if r2.sqrt() > radius as f64 {
                continue;
            }
            offsets.push((dy * padded_w as isize + dx, (r2 * space_coeff).exp()));
        }
    }

    // --- 3. Weighted Means ---
    let mut out = blank_like(image);
    let dst = &mut *out;
    for y in 0..h {
        for x in 0..w {
            let base = ((y + radius) * padded_w + x + radius) as isize;
            let center = padded[base as usize] as i32;
            let mut sum = 0.0;
            let mut wsum = 0.0;
            for &(offset, space_weight) in &offsets {
                let v = padded[(base + offset) as usize] as i32;
                let weight = space_weight * color_weight[(v - center).unsigned_abs() as usize];
                sum += weight * v as f64;
                wsum += weight;
            }
            dst[y * w + x] = (sum / wsum).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Repeated bilateral smoothing with fixed parameters.
pub fn smooth(image: &GrayImage, diameter: u32, passes: usize) -> GrayImage {
    let mut current = image.clone();
    for _ in 0..passes {
        current = bilateral_filter(&current, diameter, BILATERAL_SIGMA_COLOR, BILATERAL_SIGMA_SPACE);
    }
    current
}

/// Strong edge-preserving smoothing: three bilateral passes.
pub fn denoise(image: &GrayImage) -> GrayImage {
    smooth(image, DENOISE_DIAMETER, SMOOTHING_PASSES)
}

/// Sliding-window mean along one axis with a symmetric border, over `len` samples
/// spaced `stride` apart starting at `start`.
fn box_mean_line(src: &[f64], dst: &mut [f64], start: usize, stride: usize, len: usize, window: usize) {
    let half = (window / 2) as isize;
    let at = |i: isize| src[start + Border::Reflect.index(i, len) * stride];

    let mut acc: f64 = (-half..window as isize - half).map(at).sum();
    for i in 0..len {
        dst[start + i * stride] = acc / window as f64;
        let leaving = i as isize - half;
        let entering = leaving + window as isize;
        acc += at(entering) - at(leaving);
    }
}

/// Box filter of side `window` with a symmetric border.
fn box_mean(values: &[f64], w: usize, h: usize, window: usize) -> Vec<f64> {
    let mut rows = vec![0.0; w * h];
    for y in 0..h {
        box_mean_line(values, &mut rows, y * w, 1, w, window);
    }
    let mut out = vec![0.0; w * h];
    for x in 0..w {
        box_mean_line(&rows, &mut out, x, w, h, window);
    }
    out
}

/// Adaptive (Lee-style) speckle suppression.
///
/// For each sample `x` with local mean `μ` and variance `σ²` over a `window`-sided box:
/// `cv = σ / μ`, `w = 1 / (1 + k·cv²)`, output `μ + w·(x − μ)` clamped to `[0, 255]`.
/// Non-positive variances are floored at [`SPECKLE_VARIANCE_EPSILON`].
pub fn speckle_filter(image: &GrayImage, window: u32, k: f64) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let window = window.max(1) as usize;
    let values: Vec<f64> = image.as_raw().iter().map(|&v| v as f64).collect();
    let squares: Vec<f64> = values.iter().map(|v| v * v).collect();

    let mean = box_mean(&values, w, h, window);
    let mean_square = box_mean(&squares, w, h, window);

    let mut out = blank_like(image);
    for (i, dst) in out.iter_mut().enumerate() {
        let mu = mean[i];
        let mut variance = mean_square[i] - mu * mu;
        if variance <= 0.0 {
            variance = SPECKLE_VARIANCE_EPSILON;
        }
        // A zero local mean drives cv to infinity, i.e. a zero weight.
        let weight = if mu > 0.0 {
            let cv = variance.sqrt() / mu;
            1.0 / (1.0 + k * cv * cv)
        } else {
            0.0
        };
        let filtered = mu + weight * (values[i] - mu);
        *dst = filtered.clamp(0.0, 255.0) as u8;
    }
    out
}

/// 256-entry lookup table for `255·(v/255)^(1/γ)`.
pub fn gamma_table(gamma: f64) -> [u8; 256] {
    let inv_gamma = 1.0 / gamma;
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = ((i as f64 / 255.0).powf(inv_gamma) * 255.0).clamp(0.0, 255.0) as u8;
    }
    table
}

pub fn gamma(image: &GrayImage, gamma: f64) -> GrayImage {
    let table = gamma_table(gamma);
    map_samples(image, |v| table[v as usize])
}

/// Linear remap `clamp(alpha·v + beta, 0, 255)`, rounded.
pub fn rescale(image: &GrayImage, alpha: f64, beta: f64) -> GrayImage {
    map_samples(image, |v| (alpha * v as f64 + beta).round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn noisy(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let base = if x < width / 2 { 60 } else { 190 };
            let grain = ((x * 31 + y * 17) % 23) as i32 - 11;
            Luma([(base + grain).clamp(0, 255) as u8])
        })
    }

    #[test]
    fn gaussian_kernels_are_normalized() {
        for size in [1, 3, 5, 7, 9, 21] {
            let kernel = gaussian_kernel(size);
            assert_eq!(kernel.len(), size);
            let sum: f64 = kernel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "size {size} sums to {sum}");
        }
    }

    #[test]
    fn blur_and_bilateral_keep_flat_images_flat() {
        let flat = GrayImage::from_pixel(33, 17, Luma([128]));
        assert_eq!(gaussian_blur(&flat, 7, Border::Reflect101), flat);
        assert_eq!(denoise(&flat), flat);
    }

    #[test]
    fn speckle_filter_on_flat_input_is_identity() {
        // Zero variance everywhere: the epsilon floor must keep this finite.
        let flat = GrayImage::from_pixel(50, 40, Luma([77]));
        assert_eq!(speckle_filter(&flat, 35, 15.0), flat);

        let black = GrayImage::new(20, 20);
        assert_eq!(speckle_filter(&black, 35, 15.0), black);
    }

    #[test]
    fn speckle_filter_reduces_grain() {
        let image = noisy(64, 64);
        let filtered = speckle_filter(&image, 35, 15.0);
        assert_eq!(filtered.dimensions(), image.dimensions());

        // Left half only, far enough from the step that windows never straddle it.
        let spread = |img: &GrayImage| {
            let samples: Vec<f64> = (10..50)
                .flat_map(|y| (0..12).map(move |x| (x, y)))
                .map(|(x, y)| img.get_pixel(x, y).0[0] as f64)
                .collect();
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64
        };
        assert!(spread(&filtered) < spread(&image));
    }

    #[test]
    fn speckle_filter_with_unit_window_is_identity() {
        // A 1-sample window has zero variance: output equals the local mean, i.e. the input.
        let image = noisy(16, 16);
        assert_eq!(speckle_filter(&image, 1, 15.0), image);
    }

    #[test]
    fn gamma_table_matches_formula() {
        let table = gamma_table(0.9);
        assert_eq!(table[0], 0);
        assert_eq!(table[255], 255);
        let expected = ((128.0f64 / 255.0).powf(1.0 / 0.9) * 255.0) as u8;
        assert_eq!(table[128], expected);
        // gamma < 1 darkens mid-tones
        assert!(table[128] < 128);
    }

    #[test]
    fn rescale_saturates() {
        let image = GrayImage::from_fn(3, 1, |x, _| Luma([[0, 90, 250][x as usize]]));
        let out = rescale(&image, 10.0 / 9.0, 0.0);
        assert_eq!(out.as_raw(), &vec![0, 100, 255]);
    }
}
