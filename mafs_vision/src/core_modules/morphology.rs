// THEORY:
// The `morphology` module cleans binary masks with elliptical structuring elements.
// A fused threshold map is ragged: land has pinholes and the sea is peppered with
// isolated bright returns (ships, waves, sensor noise). Closing (dilate, then
// erode) seals the pinholes; opening (erode, then dilate) removes the pepper. A
// single final dilation adds a safety margin around detected land so that bright
// shoreline pixels never leak into the cleaned sea image.
//
// Implementation notes:
// - An ellipse element is stored as one horizontal span per row, symmetric about
//   the anchor column. Dilation then asks "does any set pixel fall inside this
//   span?" and erosion asks "are all in-image pixels inside this span set?". Both
//   are answered in O(1) per row from a prefix count of set pixels.
// - Samples outside the image never participate: they neither grow land under
//   dilation nor erase it under erosion.
// - Repeated iterations are applied as N dilations followed by N erosions (close)
//   or N erosions followed by N dilations (open).

use crate::core_modules::raster::{blank_like, LAND, WATER};
use image::GrayImage;

pub const MORPH_KERNEL_SIZE: u32 = 5;
pub const CLOSE_ITERATIONS: usize = 3;
pub const OPEN_ITERATIONS: usize = 2;
pub const BUFFER_RADIUS: u32 = 10;

/// An elliptical structuring element, one span per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ellipse {
    /// Anchor row/column offset from the top-left of the element.
    pub anchor: (usize, usize),
    /// `(row offset from anchor, half width)` for every non-empty row.
    pub spans: Vec<(isize, usize)>,
}

impl Ellipse {
    /// Ellipse inscribed in a `width` x `height` box, anchored at the center.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1) as usize, height.max(1) as usize);
        let r = height / 2;
        let c = width / 2;
        let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };

        let mut spans = Vec::with_capacity(height);
        for i in 0..height {
            let dy = i as isize - r as isize;
            if dy.unsigned_abs() > r {
                continue;
            }
            let dx = (c as f64 * (((r * r) as f64 - (dy * dy) as f64) * inv_r2).sqrt()).round() as usize;
            let j1 = c.saturating_sub(dx);
            let j2 = (c + dx + 1).min(width);
            if j2 > j1 {
                spans.push((dy, (j2 - j1) / 2));
            }
        }
        Self { anchor: (r, c), spans }
    }

    /// Ellipse of the given radius: a (2r+1) x (2r+1) element, so radius 0 is a single pixel.
    pub fn with_radius(radius: u32) -> Self {
        Self::new(2 * radius + 1, 2 * radius + 1)
    }

    #[cfg(test)]
    fn to_grid(&self, width: usize, height: usize) -> Vec<Vec<u8>> {
        let mut grid = vec![vec![0u8; width]; height];
        let (r, c) = self.anchor;
        for &(dy, half) in &self.spans {
            let row = (r as isize + dy) as usize;
            for col in c - half..=c + half {
                grid[row][col] = 1;
            }
        }
        grid
    }
}

/// Per-row prefix counts of set samples; `prefix[y][x]` counts samples `0..x`.
fn row_prefix_counts(mask: &GrayImage) -> Vec<Vec<u32>> {
    let w = mask.width() as usize;
    mask.as_raw()
        .chunks(w.max(1))
        .map(|row| {
            let mut prefix = Vec::with_capacity(w + 1);
            prefix.push(0u32);
            let mut acc = 0u32;
            for &v in row {
                acc += (v != 0) as u32;
                prefix.push(acc);
            }
            prefix
        })
        .collect()
}

fn apply(mask: &GrayImage, element: &Ellipse, erode: bool) -> GrayImage {
    let (w, h) = (mask.width() as isize, mask.height() as isize);
    let prefix = row_prefix_counts(mask);
    let mut out = blank_like(mask);
    let dst = &mut *out;

    for y in 0..h {
        for x in 0..w {
            // Erosion holds until a span has a gap; dilation fails until a span has a hit.
            let mut hit = erode;
            for &(dy, half) in &element.spans {
                let sy = y + dy;
                if sy < 0 || sy >= h {
                    continue;
                }
                let lo = (x - half as isize).max(0) as usize;
                let hi = (x + half as isize + 1).min(w) as usize;
                let set = prefix[sy as usize][hi] - prefix[sy as usize][lo];
                if erode && set < (hi - lo) as u32 {
                    hit = false;
                    break;
                }
                if !erode && set > 0 {
                    hit = true;
                    break;
                }
            }
            dst[(y * w + x) as usize] = if hit { LAND } else { WATER };
        }
    }
    out
}

pub fn dilate_with(mask: &GrayImage, element: &Ellipse, iterations: usize) -> GrayImage {
    let mut current = mask.clone();
    for _ in 0..iterations {
        current = apply(&current, element, false);
    }
    current
}

pub fn erode_with(mask: &GrayImage, element: &Ellipse, iterations: usize) -> GrayImage {
    let mut current = mask.clone();
    for _ in 0..iterations {
        current = apply(&current, element, true);
    }
    current
}

pub fn close(mask: &GrayImage, element: &Ellipse, iterations: usize) -> GrayImage {
    erode_with(&dilate_with(mask, element, iterations), element, iterations)
}

pub fn open(mask: &GrayImage, element: &Ellipse, iterations: usize) -> GrayImage {
    dilate_with(&erode_with(mask, element, iterations), element, iterations)
}

/// Closing then opening with an elliptical element of `kernel_size`.
pub fn morph_clean(mask: &GrayImage, kernel_size: u32, close_iterations: usize, open_iterations: usize) -> GrayImage {
    let element = Ellipse::new(kernel_size, kernel_size);
    let closed = close(mask, &element, close_iterations);
    open(&closed, &element, open_iterations)
}

/// One dilation by an ellipse of the given radius.
pub fn dilate(mask: &GrayImage, radius: u32) -> GrayImage {
    dilate_with(mask, &Ellipse::with_radius(radius), 1)
}
