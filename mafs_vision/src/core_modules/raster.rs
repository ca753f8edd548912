// THEORY:
// The `raster` module holds the small vocabulary every other pixel operation is
// written in. Images and masks are both plain `GrayImage`s: an image carries
// intensities, a mask carries only 0 (water) and 255 (land). Keeping a single
// buffer type means any stage can be snapshotted, encoded, or compared without
// conversion.
//
// Key architectural principles:
// 1.  **Pure Functions**: Every helper takes borrowed rasters and returns a new one.
//     Nothing here keeps state between calls.
// 2.  **Explicit Borders**: Neighborhood operations need a rule for samples that
//     fall outside the image. The three rules used by the pipeline (reflect,
//     reflect-101, replicate) are spelled out here once and shared.
// 3.  **Mask Algebra**: OR, NOT and "zero where masked" are the only ways masks
//     combine. Land only ever grows through `bitwise_or`.

use crate::error::{LandMaskError, Result};
use image::GrayImage;

pub const LAND: u8 = 255;
pub const WATER: u8 = 0;

/// How samples outside the image are synthesized for neighborhood operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Border {
    /// `dcba|abcd|dcba` - the edge sample is repeated.
    Reflect,
    /// `dcb|abcd|cba` - the edge sample is the mirror axis.
    Reflect101,
    /// `aaa|abcd|ddd`
    Replicate,
}

impl Border {
    /// Maps a possibly out-of-range coordinate onto `0..len`.
    #[inline]
    pub fn index(self, i: isize, len: usize) -> usize {
        let n = len as isize;
        if (0..n).contains(&i) {
            return i as usize;
        }
        match self {
            Border::Replicate => i.clamp(0, n - 1) as usize,
            Border::Reflect => {
                let period = 2 * n;
                let m = i.rem_euclid(period);
                (if m >= n { period - 1 - m } else { m }) as usize
            }
            Border::Reflect101 => {
                if n == 1 {
                    return 0;
                }
                let period = 2 * (n - 1);
                let m = i.rem_euclid(period);
                (if m >= n { period - m } else { m }) as usize
            }
        }
    }
}

/// A zeroed raster with the same dimensions as `image`.
pub fn blank_like(image: &GrayImage) -> GrayImage {
    GrayImage::new(image.width(), image.height())
}

/// Applies `f` to every sample.
pub fn map_samples<F: Fn(u8) -> u8>(image: &GrayImage, f: F) -> GrayImage {
    let mut out = blank_like(image);
    for (dst, &src) in out.iter_mut().zip(image.as_raw()) {
        *dst = f(src);
    }
    out
}

/// Combines two same-sized rasters sample by sample.
pub fn zip_samples<F: Fn(u8, u8) -> u8>(a: &GrayImage, b: &GrayImage, f: F) -> Result<GrayImage> {
    ensure_same_size(a, b)?;
    let mut out = blank_like(a);
    for ((dst, &x), &y) in out.iter_mut().zip(a.as_raw()).zip(b.as_raw()) {
        *dst = f(x, y);
    }
    Ok(out)
}

pub fn ensure_same_size(a: &GrayImage, b: &GrayImage) -> Result<()> {
    if a.dimensions() != b.dimensions() {
        return Err(LandMaskError::DimensionMismatch {
            expected: a.dimensions(),
            actual: b.dimensions(),
        });
    }
    Ok(())
}

pub fn bitwise_or(a: &GrayImage, b: &GrayImage) -> Result<GrayImage> {
    zip_samples(a, b, |x, y| x | y)
}

pub fn bitwise_not(image: &GrayImage) -> GrayImage {
    map_samples(image, |v| !v)
}

/// Zeroes every sample of `image` that lies under a positive sample of `mask`.
pub fn remove_masked(image: &GrayImage, mask: &GrayImage) -> Result<GrayImage> {
    zip_samples(image, mask, |v, m| if m != 0 { 0 } else { v })
}

/// Binarizes at `level`: strictly greater samples become `LAND`.
pub fn binarize_above(image: &GrayImage, level: u8) -> GrayImage {
    map_samples(image, |v| if v > level { LAND } else { WATER })
}

pub fn count_nonzero(image: &GrayImage) -> usize {
    image.as_raw().iter().filter(|&&v| v != 0).count()
}

/// Share of positive samples in percent. An empty raster has no land.
pub fn land_percentage(mask: &GrayImage) -> f64 {
    let total = mask.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    100.0 * count_nonzero(mask) as f64 / total as f64
}

/// True if every positive sample of `subset` is also positive in `superset`.
pub fn is_subset(subset: &GrayImage, superset: &GrayImage) -> bool {
    subset.dimensions() == superset.dimensions()
        && subset
            .as_raw()
            .iter()
            .zip(superset.as_raw())
            .all(|(&a, &b)| a == 0 || b != 0)
}
