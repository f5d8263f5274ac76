//! Host tensor boundary.
//!
//! Images cross into and out of the engine as batch-first `[B, H, W, 3]`
//! float arrays with samples normalized to `[0, 1]`, matching the host's
//! image representation. The engine itself only ever consumes a single image
//! (batch index 0) and is agnostic to how the host batches.

use crate::error::UpscaleError;
use crate::types::RgbImage;

/// Batch-first normalized float image stack, layout `[B, H, W, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub data: Vec<f32>,
    pub batch: usize,
    pub height: u32,
    pub width: u32,
}

impl ImageTensor {
    pub fn from_raw(
        data: Vec<f32>,
        batch: usize,
        height: u32,
        width: u32,
    ) -> Result<Self, UpscaleError> {
        if batch == 0 || width == 0 || height == 0 {
            return Err(UpscaleError::invalid_parameter(
                "tensor",
                format!("dimensions must be positive, got [{batch}, {height}, {width}, 3]"),
            ));
        }
        let expected = batch * height as usize * width as usize * 3;
        if data.len() != expected {
            return Err(UpscaleError::ShapeMismatch {
                expected: format!("{expected} floats ([{batch}, {height}, {width}, 3])"),
                actual: format!("{} floats", data.len()),
            });
        }
        Ok(Self {
            data,
            batch,
            height,
            width,
        })
    }

    /// Wrap a single 8-bit image as a one-element batch, scaling to `[0, 1]`.
    pub fn from_rgb8(image: &RgbImage) -> Self {
        let data = image.data.iter().map(|&b| b as f32 / 255.0).collect();
        Self {
            data,
            batch: 1,
            height: image.height,
            width: image.width,
        }
    }

    /// Materialize one batch entry as 8-bit RGB.
    ///
    /// NaN samples are scrubbed to 0 and everything is clamped to `[0, 1]`
    /// before quantization, so a misbehaving upstream node cannot poison the
    /// byte image.
    pub fn to_rgb8(&self, batch_index: usize) -> Result<RgbImage, UpscaleError> {
        if batch_index >= self.batch {
            return Err(UpscaleError::invalid_parameter(
                "batch_index",
                format!("index {batch_index} out of range for batch of {}", self.batch),
            ));
        }

        let plane = self.height as usize * self.width as usize * 3;
        let start = batch_index * plane;
        let bytes = self.data[start..start + plane]
            .iter()
            .map(|&v| {
                let v = if v.is_nan() { 0.0 } else { v };
                (v.clamp(0.0, 1.0) * 255.0).round() as u8
            })
            .collect();
        RgbImage::from_raw(bytes, self.width, self.height)
    }
}
