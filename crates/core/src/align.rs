//! Semantic feature alignment: resampling a patch-embedding grid to a
//! different spatial grid, e.g. to match a refinement stage's latent layout.

use ndarray::ArrayView3;

use crate::error::UpscaleError;
use crate::types::PatchEmbeddings;

/// VAE downsampling factor of latent-space diffusion backbones.
const VAE_SCALE_FACTOR: u32 = 8;
/// Patch edge within the latent grid.
const LATENT_PATCH: u32 = 2;

/// Spatial resampling mode for embedding grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMode {
    #[default]
    Bilinear,
    Nearest,
}

impl ResampleMode {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "nn" => Self::Nearest,
            _ => Self::Bilinear,
        }
    }
}

/// Conditioning grid a latent-space refiner expects for a given pixel target.
pub fn latent_patch_grid(target_width: u32, target_height: u32) -> (usize, usize) {
    let grid_h = (target_height / VAE_SCALE_FACTOR / LATENT_PATCH).max(1);
    let grid_w = (target_width / VAE_SCALE_FACTOR / LATENT_PATCH).max(1);
    (grid_h as usize, grid_w as usize)
}

/// Resample a patch-embedding grid to `target` = `(grid_h, grid_w)`.
///
/// Returns the input unchanged when the grids already match. Otherwise the
/// flattened embedding list is treated as an `(H, W, D)` tensor and resampled
/// spatially. The source grid must be square; extractors here always produce
/// square grids, and a loud failure beats a silent misreshape.
pub fn align_patch_grid(
    source: &PatchEmbeddings,
    target: (usize, usize),
    mode: ResampleMode,
) -> Result<PatchEmbeddings, UpscaleError> {
    let (target_h, target_w) = target;
    if target_h == 0 || target_w == 0 {
        return Err(UpscaleError::invalid_parameter(
            "target_grid",
            format!("must be positive, got {target_h}x{target_w}"),
        ));
    }

    if (source.grid_h, source.grid_w) == (target_h, target_w) {
        return Ok(source.clone());
    }

    if !source.is_square() {
        return Err(UpscaleError::NonSquareGrid {
            patches: source.num_patches(),
        });
    }

    let src_h = source.grid_h;
    let src_w = source.grid_w;
    let dim = source.dim;
    let grid = ArrayView3::from_shape((src_h, src_w, dim), source.data.as_slice()).map_err(
        |_| UpscaleError::ShapeMismatch {
            expected: format!("{src_h}x{src_w}x{dim}"),
            actual: format!("{} floats", source.data.len()),
        },
    )?;

    let mut out = vec![0.0f32; target_h * target_w * dim];
    for ty in 0..target_h {
        for tx in 0..target_w {
            let dst = (ty * target_w + tx) * dim;
            match mode {
                ResampleMode::Nearest => {
                    let sy = (((ty as f64 + 0.5) * src_h as f64 / target_h as f64) as usize)
                        .min(src_h - 1);
                    let sx = (((tx as f64 + 0.5) * src_w as f64 / target_w as f64) as usize)
                        .min(src_w - 1);
                    for d in 0..dim {
                        out[dst + d] = grid[[sy, sx, d]];
                    }
                }
                ResampleMode::Bilinear => {
                    // Pixel-center mapping, edges clamped.
                    let src_yf = (ty as f64 + 0.5) * src_h as f64 / target_h as f64 - 0.5;
                    let y0 = src_yf.floor().max(0.0) as usize;
                    let y1 = (y0 + 1).min(src_h - 1);
                    let fy = (src_yf - y0 as f64).clamp(0.0, 1.0);

                    let src_xf = (tx as f64 + 0.5) * src_w as f64 / target_w as f64 - 0.5;
                    let x0 = src_xf.floor().max(0.0) as usize;
                    let x1 = (x0 + 1).min(src_w - 1);
                    let fx = (src_xf - x0 as f64).clamp(0.0, 1.0);

                    for d in 0..dim {
                        let p00 = grid[[y0, x0, d]] as f64;
                        let p10 = grid[[y0, x1, d]] as f64;
                        let p01 = grid[[y1, x0, d]] as f64;
                        let p11 = grid[[y1, x1, d]] as f64;
                        let top = p00 * (1.0 - fx) + p10 * fx;
                        let bottom = p01 * (1.0 - fx) + p11 * fx;
                        out[dst + d] = (top * (1.0 - fy) + bottom * fy) as f32;
                    }
                }
            }
        }
    }

    PatchEmbeddings::new(out, target_h, target_w, dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_grid(edge: usize, dim: usize) -> PatchEmbeddings {
        let data = (0..edge * edge * dim).map(|i| i as f32).collect();
        PatchEmbeddings::new(data, edge, edge, dim).unwrap()
    }

    #[test]
    fn aligning_to_own_grid_is_a_noop() {
        let grid = square_grid(4, 8);
        let aligned = align_patch_grid(&grid, (4, 4), ResampleMode::Bilinear).unwrap();
        assert_eq!(aligned, grid);
    }

    #[test]
    fn aligning_n_squared_yields_m_squared_vectors() {
        let grid = square_grid(4, 16);
        let aligned = align_patch_grid(&grid, (6, 6), ResampleMode::Bilinear).unwrap();
        assert_eq!(aligned.num_patches(), 36);
        assert_eq!(aligned.dim, 16);
        assert_eq!(aligned.data.len(), 36 * 16);
    }

    #[test]
    fn non_square_source_is_rejected() {
        let grid = PatchEmbeddings::new(vec![0.0; 2 * 3 * 4], 2, 3, 4).unwrap();
        let result = align_patch_grid(&grid, (4, 4), ResampleMode::Bilinear);
        assert!(matches!(
            result,
            Err(UpscaleError::NonSquareGrid { patches: 6 })
        ));
    }

    #[test]
    fn non_square_noop_still_passes_through() {
        // The square precondition only applies when resampling is needed.
        let grid = PatchEmbeddings::new(vec![1.0; 2 * 3 * 4], 2, 3, 4).unwrap();
        let aligned = align_patch_grid(&grid, (2, 3), ResampleMode::Bilinear).unwrap();
        assert_eq!(aligned, grid);
    }

    #[test]
    fn bilinear_upsampling_interpolates_midpoints() {
        // One row: values 0 and 3 -> upsampled to [0, 1.5, 3] per row.
        let grid = PatchEmbeddings::new(vec![0.0, 3.0, 0.0, 3.0], 2, 2, 1).unwrap();
        let aligned = align_patch_grid(&grid, (2, 3), ResampleMode::Bilinear);
        // Source is square, target is not; 2x2 -> 2x3 widens each row.
        let aligned = aligned.unwrap();
        assert_eq!(aligned.data, vec![0.0, 1.5, 3.0, 0.0, 1.5, 3.0]);
    }

    #[test]
    fn constant_field_survives_resampling() {
        let grid = PatchEmbeddings::new(vec![7.5; 3 * 3 * 2], 3, 3, 2).unwrap();
        let aligned = align_patch_grid(&grid, (5, 5), ResampleMode::Bilinear).unwrap();
        assert!(aligned.data.iter().all(|&v| (v - 7.5).abs() < 1e-5));
    }

    #[test]
    fn nearest_mode_copies_closest_patch() {
        let grid = PatchEmbeddings::new(vec![1.0, 2.0, 3.0, 4.0], 2, 2, 1).unwrap();
        let aligned = align_patch_grid(&grid, (4, 4), ResampleMode::Nearest).unwrap();
        assert_eq!(aligned.data[0], 1.0);
        assert_eq!(aligned.data[3], 2.0);
        assert_eq!(aligned.data[15], 4.0);
    }

    #[test]
    fn latent_grid_matches_vae_and_patch_factors() {
        assert_eq!(latent_patch_grid(1024, 1024), (64, 64));
        assert_eq!(latent_patch_grid(1024, 768), (48, 64));
        // Tiny targets never collapse to a zero grid.
        assert_eq!(latent_patch_grid(8, 8), (1, 1));
    }

    #[test]
    fn resample_mode_parses_lossily() {
        assert_eq!(ResampleMode::from_str_lossy("nearest"), ResampleMode::Nearest);
        assert_eq!(ResampleMode::from_str_lossy("NN"), ResampleMode::Nearest);
        assert_eq!(ResampleMode::from_str_lossy("bilinear"), ResampleMode::Bilinear);
        assert_eq!(ResampleMode::from_str_lossy("bicubic"), ResampleMode::Bilinear);
    }
}
