//! Tile partitioning, blend masks, and seam-free stitching.
//!
//! An image larger than the refinement budget is decomposed into a grid of
//! overlapping tiles. Each refined tile is later accumulated into a canvas
//! weighted by a blend mask that fades inside the overlap margin, then the
//! canvas is normalized by the accumulated weight. Adjacent ramps are
//! complementary (they sum to one across a seam), so the overlap region is a
//! straight linear blend between neighbors.

use ndarray::{Array2, Array3};

use crate::error::UpscaleError;
use crate::types::{RgbImage, Tile, TileRegion};

/// Division guard for canvas regions no tile ever touched.
const WEIGHT_EPSILON: f32 = 1e-8;

/// Decompose `width x height` into overlapping tile regions.
///
/// Walks a grid of origins with stride `tile_size - overlap`, row-major.
/// Origins near the right/bottom edge are pulled back so every region keeps
/// the full `tile_size` extent on each axis (edge tiles then overlap their
/// neighbor by more than the nominal overlap); only when the whole image is
/// smaller than `tile_size` does a region span less.
///
/// The union of the returned regions covers every source pixel, and the
/// ordering is deterministic so per-tile seed derivation is reproducible.
pub fn partition_grid(
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
) -> Result<Vec<TileRegion>, UpscaleError> {
    if width == 0 || height == 0 {
        return Err(UpscaleError::invalid_parameter(
            "image",
            format!("dimensions must be positive, got {width}x{height}"),
        ));
    }
    if tile_size == 0 {
        return Err(UpscaleError::invalid_parameter(
            "tile_size",
            "must be positive",
        ));
    }
    if overlap >= tile_size {
        return Err(UpscaleError::invalid_parameter(
            "overlap",
            format!("must be smaller than tile_size, got {overlap} >= {tile_size}"),
        ));
    }

    let stride = tile_size - overlap;
    let mut regions = Vec::new();

    let mut y = 0u32;
    loop {
        let y_end = (y + tile_size).min(height);
        let y_start = y_end.saturating_sub(tile_size);

        let mut x = 0u32;
        loop {
            let x_end = (x + tile_size).min(width);
            let x_start = x_end.saturating_sub(tile_size);

            regions.push(TileRegion {
                x: x_start,
                y: y_start,
                width: x_end - x_start,
                height: y_end - y_start,
            });

            // Any further origin would clamp to this same edge tile.
            if x_end >= width {
                break;
            }
            x += stride;
        }

        if y_end >= height {
            break;
        }
        y += stride;
    }

    Ok(regions)
}

/// Partition an image and crop out the tile pixels for each region.
pub fn extract_tiles(
    image: &RgbImage,
    tile_size: u32,
    overlap: u32,
) -> Result<Vec<Tile>, UpscaleError> {
    let regions = partition_grid(image.width, image.height, tile_size, overlap)?;
    let mut tiles = Vec::with_capacity(regions.len());
    for region in regions {
        tiles.push(Tile {
            pixels: image.crop(&region)?,
            x: region.x,
            y: region.y,
        });
    }
    Ok(tiles)
}

/// Per-axis blend weights: 1.0 in the interior, ramping down toward both
/// ends over `overlap` entries.
///
/// The ramp value `overlap` entries from the edge is `overlap/(overlap+1)`
/// and the outermost entry is `1/(overlap+1)` — strictly positive, so a
/// pixel covered by a single tile normalizes back to its exact value, and
/// two facing ramps sum to one across a seam.
fn axis_weights(len: usize, overlap: usize) -> Vec<f32> {
    let mut weights = vec![1.0f32; len];
    if overlap == 0 {
        return weights;
    }

    let ramp = overlap.min(len);
    let denom = (overlap + 1) as f32;
    for i in 0..ramp {
        let fade = (i + 1) as f32 / denom;
        weights[i] *= fade;
        weights[len - 1 - i] *= fade;
    }
    weights
}

/// Blend mask for a tile of `height x width` pixels.
///
/// Row and column ramps are applied multiplicatively, so corners fall off as
/// the product of both ramps. Pure function of its arguments; callers must
/// recompute it whenever a tile's actual (clamped) size differs from the
/// nominal tile size.
pub fn blend_mask(height: usize, width: usize, overlap: usize) -> Array2<f32> {
    let rows = axis_weights(height, overlap);
    let cols = axis_weights(width, overlap);
    Array2::from_shape_fn((height, width), |(y, x)| rows[y] * cols[x])
}

/// Accumulates refined tiles into a weighted canvas and normalizes on
/// finalize. Buffers are local to one stitch pass.
pub struct TileStitcher {
    accum: Array3<f32>,
    weights: Array2<f32>,
    width: u32,
    height: u32,
    overlap: u32,
}

impl TileStitcher {
    pub fn new(width: u32, height: u32, overlap: u32) -> Self {
        Self {
            accum: Array3::zeros((height as usize, width as usize, 3)),
            weights: Array2::zeros((height as usize, width as usize)),
            width,
            height,
            overlap,
        }
    }

    /// Blend one tile's pixels into the canvas at `(x, y)`.
    ///
    /// Tiles that extend past the canvas (rounding drift between scaled
    /// origins and scaled dimensions) are clamped to the canvas edge; the
    /// blend mask is computed at the clamped size.
    pub fn accumulate(&mut self, pixels: &RgbImage, x: u32, y: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let tile_w = (pixels.width as usize).min((self.width - x) as usize);
        let tile_h = (pixels.height as usize).min((self.height - y) as usize);
        let mask = blend_mask(tile_h, tile_w, self.overlap as usize);

        let x0 = x as usize;
        let y0 = y as usize;
        let src_stride = pixels.width as usize * 3;
        for row in 0..tile_h {
            for col in 0..tile_w {
                let weight = mask[[row, col]];
                let src = row * src_stride + col * 3;
                for channel in 0..3 {
                    self.accum[[y0 + row, x0 + col, channel]] +=
                        pixels.data[src + channel] as f32 * weight;
                }
                self.weights[[y0 + row, x0 + col]] += weight;
            }
        }
    }

    /// Normalize by accumulated weight and quantize to 8-bit RGB.
    ///
    /// Canvas pixels no tile covered stay black; correct partitioning never
    /// produces them, but the epsilon guard keeps the division defined.
    pub fn finalize(self) -> RgbImage {
        let height = self.height as usize;
        let width = self.width as usize;
        let mut data = vec![0u8; width * height * 3];

        for row in 0..height {
            for col in 0..width {
                let weight = self.weights[[row, col]].max(WEIGHT_EPSILON);
                let dst = (row * width + col) * 3;
                for channel in 0..3 {
                    let value = self.accum[[row, col, channel]] / weight;
                    data[dst + channel] = value.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        RgbImage {
            data,
            width: self.width,
            height: self.height,
        }
    }
}
