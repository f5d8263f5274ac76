//! Semantic patch-feature extraction.
//!
//! A ViT-style encoder (DINOv2 family, exported to ONNX) turns an image
//! region into a square grid of fixed-dimension patch embeddings. The engine
//! only depends on the [`PatchFeatureExtractor`] trait; [`OrtPatchExtractor`]
//! is the ORT-backed implementation.

use std::path::Path;

use anyhow::{bail, Result};
use half::f16;
use half::slice::HalfFloatSliceExt;
use ndarray::ArrayD;
use ort::session::Session;
use tracing::debug;

use crate::backend::{build_session, InferenceBackend, SessionConfig};
use crate::error::UpscaleError;
use crate::resample::resize_bilinear;
use crate::types::{PatchEmbeddings, RgbImage};

/// Model input edge length used when none is configured.
pub const DEFAULT_INPUT_EDGE: u32 = 224;

/// ViT patch edge in pixels; the output grid is `input_edge / PATCH_SIZE`
/// per side.
pub const PATCH_SIZE: u32 = 14;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Produces a patch-embedding grid for an image region.
pub trait PatchFeatureExtractor {
    fn extract(&mut self, region: &RgbImage) -> Result<PatchEmbeddings, UpscaleError>;

    /// The `(grid_h, grid_w)` this extractor emits, fixed per instance.
    fn patch_grid(&self) -> (usize, usize);
}

/// ONNX ViT encoder driven through `ort`.
pub struct OrtPatchExtractor {
    session: Session,
    input_name: String,
    output_name: String,
    is_fp16_model: bool,
    input_edge: u32,
}

impl OrtPatchExtractor {
    /// Load the encoder and detect its IO names and precision.
    pub fn load(
        model_path: &Path,
        backend: &InferenceBackend,
        trt_cache_dir: Option<&Path>,
    ) -> Result<Self> {
        let config = SessionConfig {
            model_path,
            backend,
            trt_cache_dir,
        };
        let session = build_session(&config)?;

        let input_name = session.inputs()[0].name().to_string();
        let output_name = session.outputs()[0].name().to_string();
        let is_fp16 = match session.inputs()[0].dtype() {
            ort::value::ValueType::Tensor { ty, .. } => {
                *ty == ort::tensor::TensorElementType::Float16
            }
            _ => false,
        };

        debug!(
            model = %model_path.display(),
            %input_name, %output_name, is_fp16,
            "Loaded patch-feature encoder"
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            is_fp16_model: is_fp16,
            input_edge: DEFAULT_INPUT_EDGE,
        })
    }

    /// Override the model input edge (must be a positive multiple of the
    /// patch size).
    pub fn with_input_edge(mut self, edge: u32) -> Result<Self> {
        if edge == 0 || edge % PATCH_SIZE != 0 {
            bail!("input edge must be a positive multiple of {PATCH_SIZE}, got {edge}");
        }
        self.input_edge = edge;
        Ok(self)
    }

    fn run_inference(
        &mut self,
        input: Vec<f32>,
        shape: &[usize],
    ) -> Result<(Vec<f32>, Vec<usize>), UpscaleError> {
        if self.is_fp16_model {
            let mut fp16_data = vec![f16::ZERO; input.len()];
            fp16_data.convert_from_f32_slice(&input);
            let array = ArrayD::from_shape_vec(shape.to_vec(), fp16_data).map_err(|_| {
                UpscaleError::ShapeMismatch {
                    expected: format!("{shape:?}"),
                    actual: format!("{} values", input.len()),
                }
            })?;
            let tensor = ort::value::Tensor::from_array(array)
                .map_err(|source| UpscaleError::Inference { source })?;
            let outputs = self
                .session
                .run(ort::inputs![self.input_name.as_str() => &tensor])
                .map_err(|source| UpscaleError::Inference { source })?;
            let view = outputs[self.output_name.as_str()]
                .try_extract_array::<f16>()
                .map_err(|source| UpscaleError::Inference { source })?;
            let out_shape = view.shape().to_vec();
            let fp16_out: Vec<f16> = view.iter().copied().collect();
            let mut out = vec![0.0f32; fp16_out.len()];
            fp16_out.as_slice().convert_to_f32_slice(&mut out);
            Ok((out, out_shape))
        } else {
            let array = ArrayD::from_shape_vec(shape.to_vec(), input).map_err(|_| {
                UpscaleError::ShapeMismatch {
                    expected: format!("{shape:?}"),
                    actual: "mismatched input buffer".to_string(),
                }
            })?;
            let tensor = ort::value::Tensor::from_array(array)
                .map_err(|source| UpscaleError::Inference { source })?;
            let outputs = self
                .session
                .run(ort::inputs![self.input_name.as_str() => &tensor])
                .map_err(|source| UpscaleError::Inference { source })?;
            let view = outputs[self.output_name.as_str()]
                .try_extract_array::<f32>()
                .map_err(|source| UpscaleError::Inference { source })?;
            let out_shape = view.shape().to_vec();
            Ok((view.iter().copied().collect(), out_shape))
        }
    }
}

impl PatchFeatureExtractor for OrtPatchExtractor {
    fn patch_grid(&self) -> (usize, usize) {
        let edge = patch_grid_for_edge(self.input_edge);
        (edge, edge)
    }

    fn extract(&mut self, region: &RgbImage) -> Result<PatchEmbeddings, UpscaleError> {
        let edge = self.input_edge;
        let input = preprocess_nchw(region, edge);
        let shape = [1usize, 3, edge as usize, edge as usize];
        let (flat, out_shape) = self.run_inference(input, &shape)?;

        // Hidden state comes back as [1, tokens, dim].
        if out_shape.len() != 3 || out_shape[0] != 1 {
            return Err(UpscaleError::ShapeMismatch {
                expected: "[1, tokens, dim]".to_string(),
                actual: format!("{out_shape:?}"),
            });
        }
        let tokens = out_shape[1];
        let dim = out_shape[2];

        let grid = patch_grid_for_edge(edge);
        let expected = grid * grid;
        // Some exports keep the CLS token as row 0, some strip it.
        let patch_data = if tokens == expected + 1 {
            flat[dim..].to_vec()
        } else if tokens == expected {
            flat
        } else {
            return Err(UpscaleError::ShapeMismatch {
                expected: format!("{expected} or {} tokens", expected + 1),
                actual: format!("{tokens} tokens"),
            });
        };

        PatchEmbeddings::new(patch_data, grid, grid, dim)
    }
}

pub(crate) fn patch_grid_for_edge(edge: u32) -> usize {
    (edge / PATCH_SIZE) as usize
}

/// Resize a region to the model's square input and normalize to NCHW floats
/// with ImageNet statistics.
fn preprocess_nchw(region: &RgbImage, edge: u32) -> Vec<f32> {
    let edge = edge as usize;
    let resized = resize_bilinear(
        &region.data,
        region.width as usize,
        region.height as usize,
        edge,
        edge,
    );

    let plane = edge * edge;
    let mut nchw = vec![0.0f32; 3 * plane];
    for i in 0..plane {
        for c in 0..3 {
            let sample = resized[i * 3 + c] as f32 / 255.0;
            nchw[c * plane + i] = (sample - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    nchw
}
