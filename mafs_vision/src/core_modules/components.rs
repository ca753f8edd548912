// THEORY:
// The `components` module is the spatial grouping layer of the land masker. A
// cleaned binary map still contains many small islands of "not sea": rocks, ships,
// wave crests, leftover noise. Real land is large and contiguous, so the last
// stage of mask construction keeps only regions above an area floor.
//
// Algorithm steps:
// 1.  **Hole Filling**: every region is treated as the area enclosed by its outer
//     boundary. Background pockets (4-connected) that cannot reach the image border
//     are enclosed by some region and are filled in. Anything nested inside a hole
//     belongs to the enclosing region from here on.
// 2.  **Labelling**: the filled map is split into 8-connected regions.
// 3.  **Data Aggregation**: area is gathered per region.
// 4.  **Area Filter**: regions whose filled area exceeds the floor are rasterized
//     back as solid `LAND`; the rest are dropped.
//
// Like the rest of the pixel toolbox this is a stateless utility.

use crate::core_modules::raster::{blank_like, LAND, WATER};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

pub const MIN_COMPONENT_AREA: usize = 2000;

/// Aggregated properties of one connected region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Label in the label image; labels start at 1.
    pub id: u32,
    /// Filled area in pixels.
    pub area: usize,
}

pub mod components {
    use super::*;

    /// Normalizes any raster to a strict {0, 255} mask.
    fn normalized(mask: &GrayImage) -> GrayImage {
        let mut out = blank_like(mask);
        for (dst, &v) in out.iter_mut().zip(mask.as_raw()) {
            *dst = if v != 0 { LAND } else { WATER };
        }
        out
    }

    /// Fills background pockets that do not touch the image border.
    pub fn fill_holes(mask: &GrayImage) -> GrayImage {
        let mask = normalized(mask);
        let (w, h) = mask.dimensions();
        if w == 0 || h == 0 {
            return mask;
        }

        // Label the sea rather than the land: LAND acts as background here.
        let pockets = connected_components(&mask, Connectivity::Four, Luma([LAND]));

        let max_label = pockets.as_raw().iter().copied().max().unwrap_or(0) as usize;
        let mut reaches_border = vec![false; max_label + 1];
        for x in 0..w {
            reaches_border[pockets.get_pixel(x, 0).0[0] as usize] = true;
            reaches_border[pockets.get_pixel(x, h - 1).0[0] as usize] = true;
        }
        for y in 0..h {
            reaches_border[pockets.get_pixel(0, y).0[0] as usize] = true;
            reaches_border[pockets.get_pixel(w - 1, y).0[0] as usize] = true;
        }

        let mut out = mask.clone();
        for (dst, &label) in out.iter_mut().zip(pockets.as_raw()) {
            if label != 0 && !reaches_border[label as usize] {
                *dst = LAND;
            }
        }
        out
    }

    /// Labels the outer regions of `mask` (holes filled) and aggregates their properties.
    pub fn external_components(mask: &GrayImage) -> (ImageBuffer<Luma<u32>, Vec<u32>>, Vec<Component>) {
        let filled = fill_holes(mask);
        let labels = connected_components(&filled, Connectivity::Eight, Luma([WATER]));

        let max_label = labels.as_raw().iter().copied().max().unwrap_or(0);
        let mut found: Vec<Component> = (1..=max_label)
            .map(|id| Component { id, area: 0 })
            .collect();

        for &label in labels.as_raw() {
            if label != 0 {
                found[label as usize - 1].area += 1;
            }
        }

        (labels, found)
    }

    /// Keeps only regions whose filled area is strictly greater than `min_area`,
    /// rasterized as solid regions.
    pub fn filter_small_components(mask: &GrayImage, min_area: usize) -> GrayImage {
        let (labels, found) = external_components(mask);
        let mut keep = vec![false; found.len() + 1];
        for component in &found {
            keep[component.id as usize] = component.area > min_area;
        }

        let mut out = blank_like(mask);
        for (dst, &label) in out.iter_mut().zip(labels.as_raw()) {
            if keep[label as usize] {
                *dst = LAND;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::components::*;
    use super::*;
    use crate::core_modules::raster::count_nonzero;

    fn square(mask: &mut GrayImage, x0: u32, y0: u32, side: u32) {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                mask.put_pixel(x, y, Luma([LAND]));
            }
        }
    }

    #[test]
    fn small_regions_are_dropped_and_large_ones_kept() {
        let mut mask = GrayImage::new(120, 120);
        square(&mut mask, 2, 2, 10); // 100 px
        square(&mut mask, 40, 40, 50); // 2500 px
        let filtered = filter_small_components(&mask, MIN_COMPONENT_AREA);
        assert_eq!(count_nonzero(&filtered), 2500);
        assert_eq!(filtered.get_pixel(5, 5).0[0], WATER);
        assert_eq!(filtered.get_pixel(60, 60).0[0], LAND);
    }

    #[test]
    fn area_floor_is_exclusive() {
        let mut mask = GrayImage::new(60, 60);
        square(&mut mask, 5, 5, 40); // exactly 1600 px
        assert_eq!(count_nonzero(&filter_small_components(&mask, 1600)), 0);
        assert_eq!(count_nonzero(&filter_small_components(&mask, 1599)), 1600);
    }

    #[test]
    fn kept_regions_are_filled_solid() {
        // A 60x60 ring, 4 px thick, with a speck inside its hole.
        let mut mask = GrayImage::new(80, 80);
        square(&mut mask, 10, 10, 60);
        for y in 14..66 {
            for x in 14..66 {
                mask.put_pixel(x, y, Luma([WATER]));
            }
        }
        mask.put_pixel(40, 40, Luma([LAND]));

        let filtered = filter_small_components(&mask, MIN_COMPONENT_AREA);
        assert_eq!(count_nonzero(&filtered), 3600);
        assert_eq!(filtered.get_pixel(30, 30).0[0], LAND);
    }

    #[test]
    fn diagonal_neighbours_join_one_region() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(2, 2, Luma([LAND]));
        mask.put_pixel(3, 3, Luma([LAND]));
        let (_, found) = external_components(&mask);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].area, 2);
    }

    #[test]
    fn border_touching_sea_is_not_a_hole() {
        let mask = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { LAND } else { WATER }]));
        assert_eq!(fill_holes(&mask), mask);
    }
}
