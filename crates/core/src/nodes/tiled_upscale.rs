//! TiledUpscale node: semantic-aware tiled diffusion upscaling.
//!
//! The host-facing surface of the engine. Ports mirror the plugin's
//! parameter schema; pixels flow through [`ImageProcessor::process_image`]
//! against a caller-owned [`UpscaleSession`].

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::config::{RefinementMode, UpscaleConfig};
use crate::node::{ExecutionContext, ImageProcessor, Node, PortData, PortDefinition, PortType};
use crate::tensor::ImageTensor;
use crate::upscale::{Control, ProgressUpdate, TiledUpscaler, UpscaleSession};

pub struct TiledUpscaleNode {
    config: Option<UpscaleConfig>,
}

impl TiledUpscaleNode {
    pub fn new() -> Self {
        Self { config: None }
    }
}

impl Default for TiledUpscaleNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for TiledUpscaleNode {
    fn node_type(&self) -> &str {
        "TiledUpscale"
    }

    fn input_ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition {
                name: "scale_factor".to_string(),
                port_type: PortType::Float,
                required: false,
                default_value: Some(serde_json::json!(2.0)),
            },
            PortDefinition {
                name: "denoise".to_string(),
                port_type: PortType::Float,
                required: false,
                default_value: Some(serde_json::json!(0.2)),
            },
            PortDefinition {
                name: "steps".to_string(),
                port_type: PortType::Int,
                required: false,
                default_value: Some(serde_json::json!(4)),
            },
            PortDefinition {
                name: "tile_budget".to_string(),
                port_type: PortType::Int,
                required: false,
                default_value: Some(serde_json::json!(1024)),
            },
            PortDefinition {
                name: "mode".to_string(),
                port_type: PortType::Str,
                required: false,
                default_value: Some(serde_json::json!("diffusion")),
            },
            PortDefinition {
                name: "semantic_guidance".to_string(),
                port_type: PortType::Bool,
                required: false,
                default_value: Some(serde_json::json!(true)),
            },
            PortDefinition {
                name: "guidance_strength".to_string(),
                port_type: PortType::Float,
                required: false,
                default_value: Some(serde_json::json!(0.5)),
            },
            PortDefinition {
                name: "seed".to_string(),
                port_type: PortType::Int,
                required: false,
                default_value: Some(serde_json::json!(0)),
            },
            PortDefinition {
                name: "prompt".to_string(),
                port_type: PortType::Str,
                required: false,
                default_value: Some(serde_json::json!("high quality, detailed, sharp")),
            },
            PortDefinition {
                name: "sampler".to_string(),
                port_type: PortType::Str,
                required: false,
                default_value: Some(serde_json::json!("euler")),
            },
            PortDefinition {
                name: "scheduler".to_string(),
                port_type: PortType::Str,
                required: false,
                default_value: Some(serde_json::json!("normal")),
            },
        ]
    }

    fn output_ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition {
            name: "upscaled_image".to_string(),
            port_type: PortType::Image,
            required: false,
            default_value: None,
        }]
    }

    fn execute(
        &mut self,
        inputs: &HashMap<String, PortData>,
        _ctx: &ExecutionContext,
    ) -> Result<HashMap<String, PortData>> {
        let mut config = UpscaleConfig::default();

        if let Some(data) = inputs.get("scale_factor") {
            match data {
                PortData::Float(v) => config.scale_factor = *v,
                _ => bail!("scale_factor must be a Float"),
            }
        }

        if let Some(data) = inputs.get("denoise") {
            match data {
                PortData::Float(v) => config.denoise = *v as f32,
                _ => bail!("denoise must be a Float"),
            }
        }

        if let Some(data) = inputs.get("steps") {
            match data {
                PortData::Int(v) if *v >= 0 => config.steps = *v as u32,
                PortData::Int(v) => bail!("steps must be non-negative, got {v}"),
                _ => bail!("steps must be an Int"),
            }
        }

        if let Some(data) = inputs.get("tile_budget") {
            match data {
                PortData::Int(v) if *v >= 0 => config.tile_budget = *v as u32,
                PortData::Int(v) => bail!("tile_budget must be non-negative, got {v}"),
                _ => bail!("tile_budget must be an Int"),
            }
        }

        if let Some(PortData::Str(mode)) = inputs.get("mode") {
            config.mode = RefinementMode::from_str_lossy(mode);
        }

        if let Some(data) = inputs.get("semantic_guidance") {
            match data {
                PortData::Bool(v) => config.semantic_guidance = *v,
                _ => bail!("semantic_guidance must be a Bool"),
            }
        }

        if let Some(data) = inputs.get("guidance_strength") {
            match data {
                PortData::Float(v) => config.guidance_strength = *v as f32,
                _ => bail!("guidance_strength must be a Float"),
            }
        }

        if let Some(data) = inputs.get("seed") {
            match data {
                PortData::Int(v) if *v >= 0 => config.seed = *v as u64,
                PortData::Int(v) => bail!("seed must be non-negative, got {v}"),
                _ => bail!("seed must be an Int"),
            }
        }

        if let Some(PortData::Str(prompt)) = inputs.get("prompt") {
            config.prompt = prompt.clone();
        }

        if let Some(PortData::Str(sampler)) = inputs.get("sampler") {
            config.sampler = sampler.clone();
        }

        if let Some(PortData::Str(scheduler)) = inputs.get("scheduler") {
            config.scheduler = scheduler.clone();
        }

        config.validate()?;

        debug!(
            scale = config.scale_factor,
            mode = %config.mode,
            tile_budget = config.tile_budget,
            semantic = config.semantic_guidance,
            "TiledUpscale configured"
        );

        self.config = Some(config);
        Ok(HashMap::new())
    }
}

impl ImageProcessor for TiledUpscaleNode {
    fn process_image(
        &mut self,
        image: ImageTensor,
        session: &mut UpscaleSession,
        ctx: &ExecutionContext,
    ) -> Result<ImageTensor> {
        let config = self
            .config
            .clone()
            .context("TiledUpscale not configured — call execute() first")?;

        let input = image.to_rgb8(0)?;
        let mut callback = |_update: &ProgressUpdate| {
            if ctx.cancel_requested() {
                Control::Cancel
            } else {
                Control::Continue
            }
        };

        let result =
            TiledUpscaler::new(session).upscale(&input, &config, Some(&mut callback))?;
        Ok(ImageTensor::from_rgb8(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpscaleError;
    use std::sync::atomic::Ordering;

    fn direct_inputs() -> HashMap<String, PortData> {
        let mut inputs = HashMap::new();
        inputs.insert("mode".to_string(), PortData::Str("direct".to_string()));
        inputs.insert("semantic_guidance".to_string(), PortData::Bool(false));
        inputs.insert("tile_budget".to_string(), PortData::Int(512));
        inputs
    }

    #[test]
    fn test_node_ports() {
        let node = TiledUpscaleNode::new();
        assert_eq!(node.node_type(), "TiledUpscale");

        let inputs = node.input_ports();
        let names: Vec<&str> = inputs.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"scale_factor"));
        assert!(names.contains(&"denoise"));
        assert!(names.contains(&"seed"));
        assert!(names.contains(&"semantic_guidance"));
        assert!(inputs.iter().all(|p| !p.required));

        let outputs = node.output_ports();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].port_type, PortType::Image);
    }

    #[test]
    fn test_execute_with_defaults() {
        let mut node = TiledUpscaleNode::new();
        let ctx = ExecutionContext::default();
        node.execute(&HashMap::new(), &ctx).unwrap();
        assert_eq!(node.config, Some(UpscaleConfig::default()));
    }

    #[test]
    fn test_execute_applies_overrides() {
        let mut node = TiledUpscaleNode::new();
        let ctx = ExecutionContext::default();

        let mut inputs = direct_inputs();
        inputs.insert("scale_factor".to_string(), PortData::Float(3.0));
        inputs.insert("seed".to_string(), PortData::Int(99));
        node.execute(&inputs, &ctx).unwrap();

        let config = node.config.as_ref().unwrap();
        assert_eq!(config.scale_factor, 3.0);
        assert_eq!(config.seed, 99);
        assert_eq!(config.mode, RefinementMode::Direct);
        assert!(!config.semantic_guidance);
    }

    #[test]
    fn test_execute_rejects_out_of_range_config() {
        let mut node = TiledUpscaleNode::new();
        let ctx = ExecutionContext::default();

        let mut inputs = HashMap::new();
        inputs.insert("scale_factor".to_string(), PortData::Float(9.0));
        let err = node.execute(&inputs, &ctx).err().expect("should fail");
        assert!(err.to_string().contains("scale_factor"));
    }

    #[test]
    fn test_execute_rejects_wrong_port_type() {
        let mut node = TiledUpscaleNode::new();
        let ctx = ExecutionContext::default();

        let mut inputs = HashMap::new();
        inputs.insert("steps".to_string(), PortData::Str("four".to_string()));
        let err = node.execute(&inputs, &ctx).err().expect("should fail");
        assert!(err.to_string().contains("steps must be an Int"));
    }

    #[test]
    fn test_process_image_without_execute() {
        let mut node = TiledUpscaleNode::new();
        let ctx = ExecutionContext::default();
        let mut session = UpscaleSession::new();
        let tensor = ImageTensor::from_rgb8(&crate::types::RgbImage::solid(8, 8, [1, 2, 3]));

        let err = node
            .process_image(tensor, &mut session, &ctx)
            .err()
            .expect("should fail");
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_process_image_direct_mode_end_to_end() {
        let mut node = TiledUpscaleNode::new();
        let ctx = ExecutionContext::default();
        node.execute(&direct_inputs(), &ctx).unwrap();

        let mut session = UpscaleSession::new();
        let input = ImageTensor::from_rgb8(&crate::types::RgbImage::solid(64, 48, [90, 140, 200]));
        let output = node.process_image(input, &mut session, &ctx).unwrap();

        assert_eq!(output.width, 128);
        assert_eq!(output.height, 96);
        let rgb = output.to_rgb8(0).unwrap();
        assert_eq!(rgb.pixel(64, 48), [90, 140, 200]);
    }

    #[test]
    fn test_process_image_honors_cancel_flag() {
        let mut node = TiledUpscaleNode::new();
        let (ctx, flag) = ExecutionContext::cancellable();
        node.execute(&direct_inputs(), &ctx).unwrap();
        flag.store(true, Ordering::Relaxed);

        let mut session = UpscaleSession::new();
        let input = ImageTensor::from_rgb8(&crate::types::RgbImage::solid(64, 48, [0, 0, 0]));
        let err = node
            .process_image(input, &mut session, &ctx)
            .err()
            .expect("should cancel");

        let engine_error = err
            .downcast_ref::<UpscaleError>()
            .expect("engine error type");
        assert!(engine_error.is_cancellation());
    }
}
