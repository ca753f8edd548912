// THEORY:
// The `pipeline` module is the top-level API of the land masker. It owns the
// iterative segmentation algorithm and turns one single-channel radar image into
// a land mask plus a land-excluded copy of that image.
//
// A single thresholding pass is unreliable on radar scenes: once large bright land
// regions are removed, the brightness statistics of what remains shift. The engine
// therefore iterates. Each round classifies land on a working copy, carves the new
// land out of that copy, re-normalizes what is left and classifies again.
//
// Key architectural principles:
// 1.  **Two Tracks**: the working copy decays round after round (zeroed land, gamma,
//     rescale, re-filtering). The delivered image is always composed from the
//     pristine input, so none of those artifacts leak into the output.
// 2.  **Monotonic Accumulation**: the accumulated mask only ever grows. Every round's
//     mask is OR-ed in, and the next round's classification starts from it.
// 3.  **Bounded Work**: a hard iteration cap, an early stop once land is sparse, and
//     a short-circuit when the scene is almost all land.
// 4.  **Observable Runs**: every executed round leaves an `IterationReport`, and the
//     first round can capture its intermediate rasters as named step snapshots.

use crate::core_modules::components::{MIN_COMPONENT_AREA, components::filter_small_components};
use crate::core_modules::contrast::{contrast_enhance, CLAHE_CLIP_LIMIT, CLAHE_TILES};
use crate::core_modules::filters::{denoise, gamma, rescale, speckle_filter};
use crate::core_modules::morphology::{
    dilate, morph_clean, BUFFER_RADIUS, CLOSE_ITERATIONS, MORPH_KERNEL_SIZE, OPEN_ITERATIONS,
};
use crate::core_modules::raster::{
    bitwise_not, bitwise_or, blank_like, ensure_same_size, land_percentage, remove_masked,
};
use crate::core_modules::threshold::{fuse_threshold, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET};
use crate::error::{LandMaskError, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const STEP_DENOISING: &str = "Denoising";
pub const STEP_ENHANCED: &str = "Enhanced";
pub const STEP_THRESHOLDING: &str = "Thresholding";
pub const STEP_MORPHOLOGICAL: &str = "Morphological";
pub const STEP_LAND_MASK: &str = "Land Mask";
pub const STEP_FINAL_RESULT: &str = "Final Result";

/// Configuration for the LandMaskEngine. `Default` holds the reference constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandMaskConfig {
    pub speckle_window: u32,
    pub speckle_k: f64,
    pub gamma: f64,
    pub rescale_alpha: f64,
    pub rescale_beta: f64,
    pub min_component_area: usize,
    pub max_iterations: usize,
    /// A round classifying more than this share (percent) of the scene as land ends
    /// the run with an all-zero output.
    pub short_circuit_percentage: f64,
    /// A round classifying less than this share (percent) as land is the last one.
    pub early_stop_percentage: f64,
    pub buffer_radius: u32,
    pub clahe_clip_limit: f64,
    pub clahe_tiles: u32,
    pub adaptive_block_size: u32,
    pub adaptive_offset: f64,
    pub morph_kernel_size: u32,
    pub close_iterations: usize,
    pub open_iterations: usize,
    /// Record the first round's intermediate rasters.
    pub capture_steps: bool,
}

impl Default for LandMaskConfig {
    fn default() -> Self {
        Self {
            speckle_window: 35,
            speckle_k: 15.0,
            gamma: 0.9,
            rescale_alpha: 10.0 / 9.0,
            rescale_beta: 0.0,
            min_component_area: MIN_COMPONENT_AREA,
            max_iterations: 2,
            short_circuit_percentage: 95.0,
            early_stop_percentage: 10.0,
            buffer_radius: BUFFER_RADIUS,
            clahe_clip_limit: CLAHE_CLIP_LIMIT,
            clahe_tiles: CLAHE_TILES,
            adaptive_block_size: ADAPTIVE_BLOCK_SIZE,
            adaptive_offset: ADAPTIVE_OFFSET,
            morph_kernel_size: MORPH_KERNEL_SIZE,
            close_iterations: CLOSE_ITERATIONS,
            open_iterations: OPEN_ITERATIONS,
            capture_steps: true,
        }
    }
}

impl LandMaskConfig {
    pub fn validate(&self) -> Result<()> {
        if self.speckle_window == 0 || self.speckle_window % 2 == 0 {
            return Err(LandMaskError::config(format!(
                "speckle_window must be odd and positive, got {}",
                self.speckle_window
            )));
        }
        if !(self.speckle_k.is_finite() && self.speckle_k >= 0.0) {
            return Err(LandMaskError::config("speckle_k must be finite and non-negative"));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(LandMaskError::config(format!("gamma must be positive, got {}", self.gamma)));
        }
        if !(self.rescale_alpha.is_finite() && self.rescale_beta.is_finite()) {
            return Err(LandMaskError::config("rescale coefficients must be finite"));
        }
        if self.max_iterations == 0 {
            return Err(LandMaskError::config("max_iterations must be at least 1"));
        }
        for (name, value) in [
            ("short_circuit_percentage", self.short_circuit_percentage),
            ("early_stop_percentage", self.early_stop_percentage),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(LandMaskError::config(format!("{name} must lie in [0, 100], got {value}")));
            }
        }
        if !(self.clahe_clip_limit.is_finite() && self.clahe_clip_limit >= 0.0) {
            return Err(LandMaskError::config("clahe_clip_limit must be finite and non-negative"));
        }
        if self.clahe_tiles == 0 {
            return Err(LandMaskError::config("clahe_tiles must be at least 1"));
        }
        if self.adaptive_block_size < 3 || self.adaptive_block_size % 2 == 0 {
            return Err(LandMaskError::config(format!(
                "adaptive_block_size must be odd and at least 3, got {}",
                self.adaptive_block_size
            )));
        }
        if !self.adaptive_offset.is_finite() {
            return Err(LandMaskError::config("adaptive_offset must be finite"));
        }
        if self.morph_kernel_size == 0 {
            return Err(LandMaskError::config("morph_kernel_size must be at least 1"));
        }
        Ok(())
    }
}

/// One named intermediate raster.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSnapshot {
    pub name: String,
    pub image: GrayImage,
}

/// Ordered diagnostic rasters captured during one run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepSnapshots {
    entries: Vec<StepSnapshot>,
}

impl StepSnapshots {
    pub fn push(&mut self, name: &str, image: GrayImage) {
        self.entries.push(StepSnapshot {
            name: name.to_string(),
            image,
        });
    }

    pub fn get(&self, name: &str) -> Option<&GrayImage> {
        self.entries.iter().find(|s| s.name == name).map(|s| &s.image)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepSnapshot> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why the refinement loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every allowed round ran.
    Exhausted,
    /// A round found less land than the early-stop share.
    EarlyStop,
    /// A round found more land than the short-circuit share.
    ShortCircuit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    /// 1-based round index.
    pub iteration: usize,
    /// Land share of this round's mask, in percent.
    pub land_percentage: f64,
    /// Accumulated mask after this round.
    pub accumulated_mask: GrayImage,
}

/// The outcome of `LandMaskEngine::segment_land`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// The input with land (plus buffer) zeroed, or all zero after a short-circuit.
    pub masked_image: GrayImage,
    /// Final land mask, 255 = land.
    pub mask: GrayImage,
    /// The input with each round's land removed, before the safety buffer.
    pub unbuffered_image: GrayImage,
    pub steps: StepSnapshots,
    pub iterations: Vec<IterationReport>,
    pub termination: Termination,
}

impl Segmentation {
    pub fn land_percentage(&self) -> f64 {
        land_percentage(&self.mask)
    }
}

/// The main, top-level struct for the land masker.
#[derive(Debug, Clone)]
pub struct LandMaskEngine {
    config: LandMaskConfig,
}

impl LandMaskEngine {
    pub fn new(config: LandMaskConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LandMaskConfig {
        &self.config
    }

    /// Classifies land on `working`, starting from what `accumulated` already marks.
    /// When `steps` is given, every intermediate raster is recorded into it.
    pub fn compute_mask(
        &self,
        working: &GrayImage,
        accumulated: &GrayImage,
        mut steps: Option<&mut StepSnapshots>,
    ) -> Result<GrayImage> {
        ensure_same_size(working, accumulated)?;
        let cfg = &self.config;
        let mut record = |name: &str, image: &GrayImage| {
            if let Some(steps) = steps.as_mut() {
                steps.push(name, image.clone());
            }
        };

        // --- 1. Edge-Preserving Smoothing ---
        let denoised = denoise(working);
        record(STEP_DENOISING, &denoised);

        // --- 2. Local Contrast ---
        let enhanced = contrast_enhance(&denoised, cfg.clahe_clip_limit, cfg.clahe_tiles);
        record(STEP_ENHANCED, &enhanced);

        // --- 3. Global + Local Threshold ---
        let fused = fuse_threshold(&enhanced, cfg.adaptive_block_size, cfg.adaptive_offset);
        record(STEP_THRESHOLDING, &fused);

        // --- 4. Morphological Cleanup ---
        let cleaned = morph_clean(&fused, cfg.morph_kernel_size, cfg.close_iterations, cfg.open_iterations);
        record(STEP_MORPHOLOGICAL, &cleaned);

        // --- 5. Sea Extraction ---
        // Large sea regions survive the area floor; everything else is land.
        let merged = bitwise_or(&cleaned, accumulated)?;
        let sea = filter_small_components(&bitwise_not(&merged), cfg.min_component_area);
        let land = bitwise_not(&sea);
        record(STEP_LAND_MASK, &land);

        Ok(land)
    }

    /// Runs the full iterative segmentation on a single-channel image.
    pub fn segment_land(&self, image: &GrayImage) -> Result<Segmentation> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(LandMaskError::EmptyImage { width, height });
        }
        let cfg = &self.config;

        let mut working = speckle_filter(image, cfg.speckle_window, cfg.speckle_k);
        let mut unbuffered = image.clone();
        let mut accumulated = blank_like(image);
        let mut steps = StepSnapshots::default();
        let mut iterations = Vec::with_capacity(cfg.max_iterations);
        let mut termination = Termination::Exhausted;

        for iteration in 1..=cfg.max_iterations {
            let capture = cfg.capture_steps && iteration == 1;
            let step_mask = self.compute_mask(&working, &accumulated, capture.then_some(&mut steps))?;
            let percentage = land_percentage(&step_mask);
            debug!(iteration, land_percentage = percentage, "segmentation round finished");

            if percentage > cfg.short_circuit_percentage {
                debug!(iteration, "scene is almost entirely land, short-circuiting");
                iterations.push(IterationReport {
                    iteration,
                    land_percentage: percentage,
                    accumulated_mask: accumulated.clone(),
                });
                return Ok(Segmentation {
                    masked_image: blank_like(image),
                    mask: accumulated,
                    unbuffered_image: unbuffered,
                    steps,
                    iterations,
                    termination: Termination::ShortCircuit,
                });
            }

            // Carve the new land out of both tracks, then re-normalize the working copy.
            unbuffered = remove_masked(&unbuffered, &step_mask)?;
            working = remove_masked(&working, &step_mask)?;
            working = self.renormalize(&working);
            accumulated = bitwise_or(&accumulated, &step_mask)?;
            iterations.push(IterationReport {
                iteration,
                land_percentage: percentage,
                accumulated_mask: accumulated.clone(),
            });

            if percentage < cfg.early_stop_percentage {
                termination = Termination::EarlyStop;
                break;
            }
        }

        let mask = dilate(&accumulated, cfg.buffer_radius);
        let masked_image = remove_masked(image, &mask)?;
        if cfg.capture_steps {
            steps.push(STEP_FINAL_RESULT, masked_image.clone());
        }
        debug!(
            rounds = iterations.len(),
            ?termination,
            land_percentage = land_percentage(&mask),
            "segmentation complete"
        );

        Ok(Segmentation {
            masked_image,
            mask,
            unbuffered_image: unbuffered,
            steps,
            iterations,
            termination,
        })
    }

    fn renormalize(&self, working: &GrayImage) -> GrayImage {
        let cfg = &self.config;
        let despeckled = speckle_filter(working, cfg.speckle_window, cfg.speckle_k);
        let brightened = gamma(&despeckled, cfg.gamma);
        rescale(&brightened, cfg.rescale_alpha, cfg.rescale_beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::raster::{count_nonzero, is_subset, LAND, WATER};
    use image::Luma;

    fn engine() -> LandMaskEngine {
        LandMaskEngine::new(LandMaskConfig::default()).unwrap()
    }

    /// Dark sea with a bright coastal strip along the left edge.
    fn coast_scene(width: u32, height: u32, land_width: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| Luma([if x < land_width { 200 } else { 40 }]))
    }

    #[test]
    fn default_config_is_valid_and_bad_values_are_rejected() {
        assert!(LandMaskConfig::default().validate().is_ok());

        let bad = [
            LandMaskConfig { speckle_window: 34, ..Default::default() },
            LandMaskConfig { max_iterations: 0, ..Default::default() },
            LandMaskConfig { gamma: 0.0, ..Default::default() },
            LandMaskConfig { early_stop_percentage: 120.0, ..Default::default() },
            LandMaskConfig { adaptive_block_size: 20, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(LandMaskEngine::new(config), Err(LandMaskError::InvalidConfig(_))));
        }
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: LandMaskConfig = serde_json::from_str(r#"{"max_iterations": 1, "capture_steps": false}"#).unwrap();
        assert_eq!(config.max_iterations, 1);
        assert!(!config.capture_steps);
        assert_eq!(config.speckle_window, 35);
        assert_eq!(config.min_component_area, 2000);
    }

    #[test]
    fn empty_input_is_an_error() {
        let result = engine().segment_land(&GrayImage::new(0, 10));
        assert!(matches!(result, Err(LandMaskError::EmptyImage { width: 0, height: 10 })));
    }

    #[test]
    fn flat_scene_has_no_land_and_stops_after_one_round() {
        let image = GrayImage::from_pixel(512, 512, Luma([128]));
        let result = engine().segment_land(&image).unwrap();

        assert_eq!(result.termination, Termination::EarlyStop);
        assert_eq!(result.iterations.len(), 1);
        assert_eq!(count_nonzero(&result.mask), 0);
        assert_eq!(result.masked_image, image);
        assert_eq!(
            result.steps.names(),
            vec![
                STEP_DENOISING,
                STEP_ENHANCED,
                STEP_THRESHOLDING,
                STEP_MORPHOLOGICAL,
                STEP_LAND_MASK,
                STEP_FINAL_RESULT
            ]
        );
    }

    #[test]
    fn overwhelming_land_short_circuits_to_an_empty_image() {
        // Bright scene whose only dark region is too small to count as sea.
        let image = GrayImage::from_fn(256, 256, |x, y| {
            Luma([if (100..140).contains(&x) && (100..140).contains(&y) { 30 } else { 220 }])
        });
        let result = engine().segment_land(&image).unwrap();

        assert_eq!(result.termination, Termination::ShortCircuit);
        assert_eq!(result.iterations.len(), 1);
        assert!(result.iterations[0].land_percentage > 95.0);
        assert_eq!(count_nonzero(&result.masked_image), 0);
        assert_eq!(count_nonzero(&result.mask), 0);
        assert!(result.steps.get(STEP_LAND_MASK).is_some());
        assert!(result.steps.get(STEP_FINAL_RESULT).is_none());
    }

    #[test]
    fn sparse_land_is_buffered_and_cut_from_the_pristine_input() {
        let image = coast_scene(400, 128, 16);
        let result = engine().segment_land(&image).unwrap();

        assert_eq!(result.termination, Termination::EarlyStop);
        assert_eq!(result.iterations.len(), 1);
        let last = &result.iterations[0].accumulated_mask;
        assert!(count_nonzero(last) > 0);
        assert!(is_subset(last, &result.mask));
        assert_eq!(result.mask.get_pixel(4, 64).0[0], LAND);
        assert_eq!(result.mask.get_pixel(300, 64).0[0], WATER);

        for ((masked, original), mask) in result
            .masked_image
            .pixels()
            .zip(image.pixels())
            .zip(result.mask.pixels())
        {
            if mask.0[0] == LAND {
                assert_eq!(masked.0[0], WATER);
            } else {
                assert_eq!(masked.0[0], original.0[0]);
            }
        }
    }

    #[test]
    fn accumulated_mask_never_shrinks_between_rounds() {
        let image = coast_scene(256, 256, 100);
        let result = engine().segment_land(&image).unwrap();

        let first = result.iterations[0].land_percentage;
        assert!(first > 10.0 && first < 95.0, "first round found {first}% land");
        assert_eq!(result.iterations.len(), 2);
        for pair in result.iterations.windows(2) {
            assert!(is_subset(&pair[0].accumulated_mask, &pair[1].accumulated_mask));
        }
        if result.termination != Termination::ShortCircuit {
            let last = &result.iterations[1].accumulated_mask;
            assert!(is_subset(last, &result.mask));
        }
    }

    #[test]
    fn land_enclosed_by_sea_is_absorbed_into_the_sea() {
        // Sea regions are kept with their holes filled, so an offshore island that
        // never touches the frame does not survive as land.
        let image = GrayImage::from_fn(256, 256, |x, y| {
            Luma([if (100..150).contains(&x) && (100..150).contains(&y) { 200 } else { 40 }])
        });
        let result = engine().segment_land(&image).unwrap();
        assert_eq!(count_nonzero(&result.mask), 0);
        assert_eq!(result.masked_image, image);
    }

    #[test]
    fn snapshots_are_skipped_when_capture_is_off() {
        let config = LandMaskConfig { capture_steps: false, ..Default::default() };
        let result = LandMaskEngine::new(config)
            .unwrap()
            .segment_land(&GrayImage::from_pixel(64, 64, Luma([90])))
            .unwrap();
        assert!(result.steps.is_empty());
    }

    #[test]
    fn compute_mask_rejects_mismatched_rasters() {
        let result = engine().compute_mask(&GrayImage::new(8, 8), &GrayImage::new(8, 9), None);
        assert!(matches!(result, Err(LandMaskError::DimensionMismatch { .. })));
    }
}
