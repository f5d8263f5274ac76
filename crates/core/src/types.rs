//! Pixel and embedding containers shared across the engine.

use crate::error::UpscaleError;

/// 8-bit interleaved RGB image.
///
/// The engine works on plain byte buffers internally; normalized float data
/// only exists at the host boundary (see [`crate::tensor`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbImage {
    /// Wrap an existing interleaved RGB buffer, validating its length.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32) -> Result<Self, UpscaleError> {
        if width == 0 || height == 0 {
            return Err(UpscaleError::invalid_parameter(
                "image",
                format!("dimensions must be positive, got {width}x{height}"),
            ));
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(UpscaleError::ShapeMismatch {
                expected: format!("{expected} bytes ({width}x{height}x3)"),
                actual: format!("{} bytes", data.len()),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Uniform-color image. Handy for fakes and boundary checks.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * 3];
        for pixel in data.chunks_exact_mut(3) {
            pixel.copy_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Copy out a sub-region. The region must lie inside the image.
    pub fn crop(&self, region: &TileRegion) -> Result<RgbImage, UpscaleError> {
        let x_end = region.x as usize + region.width as usize;
        let y_end = region.y as usize + region.height as usize;
        if x_end > self.width as usize || y_end > self.height as usize {
            return Err(UpscaleError::ShapeMismatch {
                expected: format!("region inside {}x{}", self.width, self.height),
                actual: format!(
                    "{}x{} at ({}, {})",
                    region.width, region.height, region.x, region.y
                ),
            });
        }

        let mut out = vec![0u8; region.width as usize * region.height as usize * 3];
        let src_stride = self.width as usize * 3;
        let dst_stride = region.width as usize * 3;
        for row in 0..region.height as usize {
            let src_start = (region.y as usize + row) * src_stride + region.x as usize * 3;
            let dst_start = row * dst_stride;
            out[dst_start..dst_start + dst_stride]
                .copy_from_slice(&self.data[src_start..src_start + dst_stride]);
        }
        RgbImage::from_raw(out, region.width, region.height)
    }
}

/// A rectangular sub-region of an image in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A cropped tile plus its origin in the source image.
#[derive(Debug, Clone)]
pub struct Tile {
    pub pixels: RgbImage,
    pub x: u32,
    pub y: u32,
}

/// A row-major `grid_h x grid_w` grid of `dim`-length patch feature vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchEmbeddings {
    pub data: Vec<f32>,
    pub grid_h: usize,
    pub grid_w: usize,
    pub dim: usize,
}

impl PatchEmbeddings {
    pub fn new(
        data: Vec<f32>,
        grid_h: usize,
        grid_w: usize,
        dim: usize,
    ) -> Result<Self, UpscaleError> {
        let expected = grid_h * grid_w * dim;
        if data.len() != expected {
            return Err(UpscaleError::ShapeMismatch {
                expected: format!("{expected} floats ({grid_h}x{grid_w}x{dim})"),
                actual: format!("{} floats", data.len()),
            });
        }
        Ok(Self {
            data,
            grid_h,
            grid_w,
            dim,
        })
    }

    pub fn num_patches(&self) -> usize {
        self.grid_h * self.grid_w
    }

    pub fn is_square(&self) -> bool {
        self.grid_h == self.grid_w
    }
}
