//! The refinement capability boundary.
//!
//! The orchestrator never knows which diffusion backbone (if any) sits behind
//! a tile refinement: everything it needs is the [`DiffusionRefiner`]
//! strategy. Backends wrap a host-supplied sampler; [`BicubicRefiner`] is the
//! built-in non-diffusion strategy used for direct mode.

use crate::align::latent_patch_grid;
use crate::error::UpscaleError;
use crate::resample::resize_bicubic;
use crate::types::{PatchEmbeddings, RgbImage};

/// Everything a refinement backend may consume for one tile.
///
/// `sampler` and `scheduler` are identifiers passed through to backends that
/// expose native sampler selection; backends with built-in sampling ignore
/// them.
pub struct RefineRequest<'a> {
    pub denoise: f32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: u64,
    pub prompt: &'a str,
    pub sampler: &'a str,
    pub scheduler: &'a str,
    pub conditioning: Option<&'a PatchEmbeddings>,
    pub conditioning_strength: f32,
}

/// A swappable tile-refinement strategy.
pub trait DiffusionRefiner {
    /// Refine one pixel tile to `target_width x target_height`.
    ///
    /// Must be safely callable repeatedly within a run; every call is
    /// independent.
    fn refine(
        &mut self,
        tile: &RgbImage,
        target_width: u32,
        target_height: u32,
        request: &RefineRequest<'_>,
    ) -> Result<RgbImage, UpscaleError>;

    /// Drop transient accelerator memory. The orchestrator calls this
    /// between tiles to bound peak usage; backends without transient state
    /// need not override it.
    fn release_memory(&mut self) {}

    /// Output dimensions are rounded to a multiple of this before refining.
    /// Latent-space backbones typically need 8; pixel-space strategies 1.
    fn dimension_multiple(&self) -> u32 {
        1
    }

    /// The spatial conditioning grid this backend expects for a target size.
    fn conditioning_grid(&self, target_width: u32, target_height: u32) -> (usize, usize) {
        latent_patch_grid(target_width, target_height)
    }
}

/// Non-diffusion refinement: plain bicubic interpolation.
///
/// Ignores the diffusion parameters and any conditioning; exists so the
/// orchestrator can run the identical tiled path without a diffusion
/// backbone.
pub struct BicubicRefiner;

impl DiffusionRefiner for BicubicRefiner {
    fn refine(
        &mut self,
        tile: &RgbImage,
        target_width: u32,
        target_height: u32,
        _request: &RefineRequest<'_>,
    ) -> Result<RgbImage, UpscaleError> {
        if target_width == 0 || target_height == 0 {
            return Err(UpscaleError::invalid_parameter(
                "target",
                format!("dimensions must be positive, got {target_width}x{target_height}"),
            ));
        }
        let data = resize_bicubic(
            &tile.data,
            tile.width as usize,
            tile.height as usize,
            target_width as usize,
            target_height as usize,
        );
        RgbImage::from_raw(data, target_width, target_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RefineRequest<'static> {
        RefineRequest {
            denoise: 0.2,
            steps: 4,
            guidance: 3.5,
            seed: 0,
            prompt: "",
            sampler: "euler",
            scheduler: "normal",
            conditioning: None,
            conditioning_strength: 0.5,
        }
    }

    #[test]
    fn bicubic_refiner_hits_requested_dimensions() {
        let tile = RgbImage::solid(128, 96, [10, 20, 30]);
        let refined = BicubicRefiner
            .refine(&tile, 256, 192, &request())
            .unwrap();
        assert_eq!(refined.width, 256);
        assert_eq!(refined.height, 192);
    }

    #[test]
    fn bicubic_refiner_preserves_constant_fields() {
        let tile = RgbImage::solid(64, 64, [90, 140, 200]);
        let refined = BicubicRefiner
            .refine(&tile, 128, 128, &request())
            .unwrap();
        assert!(refined
            .data
            .chunks_exact(3)
            .all(|px| px == [90, 140, 200]));
    }

    #[test]
    fn bicubic_refiner_rejects_zero_target() {
        let tile = RgbImage::solid(8, 8, [0, 0, 0]);
        assert!(BicubicRefiner.refine(&tile, 0, 16, &request()).is_err());
    }

    #[test]
    fn pixel_space_strategy_needs_no_dimension_rounding() {
        assert_eq!(BicubicRefiner.dimension_multiple(), 1);
    }

    #[test]
    fn default_conditioning_grid_follows_latent_layout() {
        assert_eq!(BicubicRefiner.conditioning_grid(512, 512), (32, 32));
    }
}
