//! Tiled upscale orchestration.
//!
//! Decides whether an image needs tiling at all, sizes the input tiles from
//! the output budget, drives per-tile semantic extraction and refinement in
//! deterministic row-major order, and stitches the refined tiles into the
//! final canvas. Execution is synchronous and sequential per tile: diffusion
//! refinement holds exclusive accelerator memory, so concurrent tiles would
//! only contend for it.

use tracing::{debug, info};

use crate::align::{align_patch_grid, ResampleMode};
use crate::config::{RefinementMode, UpscaleConfig};
use crate::error::UpscaleError;
use crate::extract::PatchFeatureExtractor;
use crate::refine::{BicubicRefiner, DiffusionRefiner, RefineRequest};
use crate::tiling::{partition_grid, TileStitcher};
use crate::types::RgbImage;

/// Input tiles never shrink below this edge, whatever the budget/scale ratio;
/// smaller refinement inputs degrade output quality sharply.
pub const MIN_INPUT_TILE: u32 = 256;

/// Minimum overlap between neighboring input tiles.
pub const MIN_OVERLAP: u32 = 16;

/// Initialized capabilities for one or more upscale calls.
///
/// Owned by the caller and passed in explicitly; the orchestrator never
/// constructs models lazily behind the scenes.
#[derive(Default)]
pub struct UpscaleSession {
    refiner: Option<Box<dyn DiffusionRefiner>>,
    extractor: Option<Box<dyn PatchFeatureExtractor>>,
}

impl UpscaleSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refiner(mut self, refiner: Box<dyn DiffusionRefiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn PatchFeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn has_refiner(&self) -> bool {
        self.refiner.is_some()
    }

    pub fn has_extractor(&self) -> bool {
        self.extractor.is_some()
    }
}

/// Returned by the progress callback to continue or abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Cancel,
}

/// Snapshot handed to the progress callback at each tile boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub tiles_completed: usize,
    pub tiles_total: usize,
}

pub type ProgressCallback<'a> = dyn FnMut(&ProgressUpdate) -> Control + 'a;

/// Derived seed for one tile.
///
/// With a fixed base seed every tile gets a distinct seed so tiles are not
/// artifactually identical, while two runs of the same configuration derive
/// identical per-tile seeds. This deliberately trades "same seed ⇒ same
/// output regardless of tiling" for tile decorrelation.
pub fn derive_tile_seed(seed: u64, tile_index: usize) -> u64 {
    seed.wrapping_add(tile_index as u64)
}

fn round_to_multiple(value: u32, multiple: u32) -> u32 {
    if multiple <= 1 {
        return value.max(1);
    }
    (((value + multiple / 2) / multiple) * multiple).max(multiple)
}

/// The top-level tiled upscale algorithm over a session's capabilities.
pub struct TiledUpscaler<'s> {
    session: &'s mut UpscaleSession,
}

impl<'s> TiledUpscaler<'s> {
    pub fn new(session: &'s mut UpscaleSession) -> Self {
        Self { session }
    }

    /// Upscale `image` to `(width * scale, height * scale)`.
    ///
    /// Returns either a complete stitched image or an error/cancellation;
    /// never a partial result. The optional `progress` callback runs at each
    /// tile boundary and can cancel the run cooperatively.
    pub fn upscale(
        &mut self,
        image: &RgbImage,
        config: &UpscaleConfig,
        mut progress: Option<&mut ProgressCallback<'_>>,
    ) -> Result<RgbImage, UpscaleError> {
        config.validate()?;

        let scale = config.scale_factor;
        let target_w = (image.width as f64 * scale).round() as u32;
        let target_h = (image.height as f64 * scale).round() as u32;

        // Resolve capabilities before any tiling work so a missing backend
        // fails fast instead of after minutes of refinement.
        let UpscaleSession {
            refiner: refiner_slot,
            extractor: extractor_slot,
        } = &mut *self.session;

        let mut direct = BicubicRefiner;
        let refiner: &mut dyn DiffusionRefiner = match config.mode {
            RefinementMode::Diffusion => refiner_slot
                .as_deref_mut()
                .ok_or(UpscaleError::MissingRefiner)?,
            RefinementMode::Direct => &mut direct,
        };

        let mut extractor: Option<&mut dyn PatchFeatureExtractor> = if config.semantic_guidance {
            Some(
                extractor_slot
                    .as_deref_mut()
                    .ok_or(UpscaleError::MissingExtractor)?,
            )
        } else {
            None
        };

        let multiple = refiner.dimension_multiple();

        if target_w <= config.tile_budget && target_h <= config.tile_budget {
            debug!(
                target_w,
                target_h,
                budget = config.tile_budget,
                "Target fits the tile budget — refining in one pass"
            );
            let width = round_to_multiple(target_w, multiple);
            let height = round_to_multiple(target_h, multiple);
            let seed = derive_tile_seed(config.seed, 0);
            let refined = refine_tile(refiner, &mut extractor, image, width, height, config, seed)?;

            if let Some(callback) = progress.as_mut() {
                let update = ProgressUpdate {
                    tiles_completed: 1,
                    tiles_total: 1,
                };
                if callback(&update) == Control::Cancel {
                    return Err(UpscaleError::Cancelled { tiles_completed: 1 });
                }
            }
            return Ok(refined);
        }

        let input_tile =
            ((config.tile_budget as f64 / scale).floor() as u32).max(MIN_INPUT_TILE);
        let overlap =
            ((input_tile as f64 * config.overlap_fraction).round() as u32).max(MIN_OVERLAP);

        let regions = partition_grid(image.width, image.height, input_tile, overlap)?;
        let tiles_total = regions.len();
        info!(
            tiles = tiles_total,
            input_tile, overlap, scale, target_w, target_h, "Starting tiled upscale"
        );

        let mut refined_tiles: Vec<(RgbImage, u32, u32)> = Vec::with_capacity(tiles_total);

        for (index, region) in regions.iter().enumerate() {
            let tile_pixels = image.crop(region)?;
            let width = round_to_multiple((region.width as f64 * scale).round() as u32, multiple);
            let height = round_to_multiple((region.height as f64 * scale).round() as u32, multiple);
            let seed = derive_tile_seed(config.seed, index);

            debug!(
                tile = index,
                x = region.x,
                y = region.y,
                seed,
                "Refining tile"
            );
            let refined = refine_tile(
                refiner,
                &mut extractor,
                &tile_pixels,
                width,
                height,
                config,
                seed,
            )?;
            refined_tiles.push((
                refined,
                (region.x as f64 * scale).round() as u32,
                (region.y as f64 * scale).round() as u32,
            ));

            // Bounds peak accelerator memory across tiles; the backend does
            // not do this on its own.
            refiner.release_memory();

            if let Some(callback) = progress.as_mut() {
                let update = ProgressUpdate {
                    tiles_completed: index + 1,
                    tiles_total,
                };
                if callback(&update) == Control::Cancel {
                    info!(tiles_completed = index + 1, "Upscale cancelled");
                    return Err(UpscaleError::Cancelled {
                        tiles_completed: index + 1,
                    });
                }
            }
        }

        let scaled_overlap = (overlap as f64 * scale).round() as u32;
        let mut stitcher = TileStitcher::new(target_w, target_h, scaled_overlap);
        for (pixels, x, y) in &refined_tiles {
            stitcher.accumulate(pixels, *x, *y);
        }
        Ok(stitcher.finalize())
    }
}

fn refine_tile(
    refiner: &mut dyn DiffusionRefiner,
    extractor: &mut Option<&mut dyn PatchFeatureExtractor>,
    tile: &RgbImage,
    target_width: u32,
    target_height: u32,
    config: &UpscaleConfig,
    seed: u64,
) -> Result<RgbImage, UpscaleError> {
    let conditioning = match extractor {
        Some(ex) => {
            let embeddings = ex.extract(tile)?;
            let grid = refiner.conditioning_grid(target_width, target_height);
            Some(align_patch_grid(&embeddings, grid, ResampleMode::Bilinear)?)
        }
        None => None,
    };

    let request = RefineRequest {
        denoise: config.denoise,
        steps: config.steps,
        guidance: config.guidance,
        seed,
        prompt: &config.prompt,
        sampler: &config.sampler,
        scheduler: &config.scheduler,
        conditioning: conditioning.as_ref(),
        conditioning_strength: config.guidance_strength,
    };

    let result = refiner.refine(tile, target_width, target_height, &request);
    if matches!(result, Err(UpscaleError::Resource(_))) {
        // Best-effort: let the backend drop what it can before the OOM
        // surfaces to the caller.
        refiner.release_memory();
    }
    result
}
