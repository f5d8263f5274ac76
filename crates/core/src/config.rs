use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::UpscaleError;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "TESSERA_DATA_DIR";

/// Which refinement strategy the orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinementMode {
    /// A configured diffusion backbone refines each tile.
    #[default]
    Diffusion,
    /// Built-in bicubic interpolation; no model required.
    Direct,
}

impl RefinementMode {
    /// Parse from string (case-insensitive). Returns `Diffusion` for unknown
    /// values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "bicubic" | "none" => Self::Direct,
            _ => Self::Diffusion,
        }
    }
}

impl std::fmt::Display for RefinementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Diffusion => write!(f, "diffusion"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Parameters of one upscale call. Immutable for the call's duration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpscaleConfig {
    /// Output scale, 1.0–4.0.
    pub scale_factor: f64,
    /// Output tile edge length budget in pixels, 512–2048.
    pub tile_budget: u32,
    /// Fraction of the input tile edge shared with neighbors, 0.0–0.5.
    pub overlap_fraction: f64,
    pub mode: RefinementMode,
    /// Denoising strength, 0.0–1.0.
    pub denoise: f32,
    /// Sampling step count, 1–100.
    pub steps: u32,
    /// Classifier-free guidance scale.
    pub guidance: f32,
    pub sampler: String,
    pub scheduler: String,
    pub seed: u64,
    pub prompt: String,
    /// Extract per-tile patch embeddings and pass them to the refiner.
    pub semantic_guidance: bool,
    /// Conditioning strength for semantic guidance, 0.0–1.0.
    pub guidance_strength: f32,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            scale_factor: 2.0,
            tile_budget: 1024,
            overlap_fraction: 0.125,
            mode: RefinementMode::Diffusion,
            denoise: 0.2,
            steps: 4,
            guidance: 3.5,
            sampler: "euler".to_string(),
            scheduler: "normal".to_string(),
            seed: 0,
            prompt: "high quality, detailed, sharp".to_string(),
            semantic_guidance: true,
            guidance_strength: 0.5,
        }
    }
}

impl UpscaleConfig {
    /// Range-check every parameter; first violation wins.
    pub fn validate(&self) -> Result<(), UpscaleError> {
        if !(1.0..=4.0).contains(&self.scale_factor) {
            return Err(UpscaleError::invalid_parameter(
                "scale_factor",
                format!("must be within [1.0, 4.0], got {}", self.scale_factor),
            ));
        }
        if !(512..=2048).contains(&self.tile_budget) {
            return Err(UpscaleError::invalid_parameter(
                "tile_budget",
                format!("must be within [512, 2048], got {}", self.tile_budget),
            ));
        }
        if !(0.0..=0.5).contains(&self.overlap_fraction) {
            return Err(UpscaleError::invalid_parameter(
                "overlap_fraction",
                format!("must be within [0.0, 0.5], got {}", self.overlap_fraction),
            ));
        }
        if !(0.0..=1.0).contains(&self.denoise) {
            return Err(UpscaleError::invalid_parameter(
                "denoise",
                format!("must be within [0.0, 1.0], got {}", self.denoise),
            ));
        }
        if !(1..=100).contains(&self.steps) {
            return Err(UpscaleError::invalid_parameter(
                "steps",
                format!("must be within [1, 100], got {}", self.steps),
            ));
        }
        if self.guidance < 0.0 {
            return Err(UpscaleError::invalid_parameter(
                "guidance",
                format!("must be non-negative, got {}", self.guidance),
            ));
        }
        if !(0.0..=1.0).contains(&self.guidance_strength) {
            return Err(UpscaleError::invalid_parameter(
                "guidance_strength",
                format!("must be within [0.0, 1.0], got {}", self.guidance_strength),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub models: ModelsConfig,
    pub upscale: UpscaleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    /// ONNX ViT encoder for semantic guidance (DINOv2 family).
    pub encoder_model: Option<PathBuf>,
    /// Inference backend name ("cuda" or "tensorrt").
    pub backend: String,
    pub trt_cache_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig::default(),
            upscale: UpscaleConfig::default(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            encoder_model: None,
            backend: "cuda".to_string(),
            trt_cache_dir: PathBuf::from("trt_cache"),
        }
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. TESSERA_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

/// Returns the path to config.toml within the given data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Initialize the data directory structure on first run:
/// - Creates data_dir if missing
/// - Writes default config.toml only if file doesn't exist
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    }

    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        let default_cfg = AppConfig::default();
        default_cfg.save_to_path(&cfg_path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_upscale_config_is_valid() {
        let cfg = UpscaleConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.scale_factor, 2.0);
        assert_eq!(cfg.tile_budget, 1024);
        assert_eq!(cfg.steps, 4);
        assert_eq!(cfg.mode, RefinementMode::Diffusion);
        assert!(cfg.semantic_guidance);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut cfg = UpscaleConfig {
            scale_factor: 0.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg = UpscaleConfig {
            scale_factor: 4.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg = UpscaleConfig {
            tile_budget: 128,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg = UpscaleConfig {
            denoise: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg = UpscaleConfig {
            steps: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg = UpscaleConfig {
            steps: 101,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg = UpscaleConfig {
            guidance_strength: -0.1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg = UpscaleConfig {
            overlap_fraction: 0.75,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_errors_name_the_parameter() {
        let cfg = UpscaleConfig {
            steps: 0,
            ..Default::default()
        };
        let err = cfg.validate().err().expect("should fail");
        assert!(err.to_string().contains("steps"));
    }

    #[test]
    fn refinement_mode_parses_lossily() {
        assert_eq!(
            RefinementMode::from_str_lossy("direct"),
            RefinementMode::Direct
        );
        assert_eq!(
            RefinementMode::from_str_lossy("Bicubic"),
            RefinementMode::Direct
        );
        assert_eq!(
            RefinementMode::from_str_lossy("diffusion"),
            RefinementMode::Diffusion
        );
        assert_eq!(
            RefinementMode::from_str_lossy("unknown"),
            RefinementMode::Diffusion
        );
    }

    #[test]
    fn toml_roundtrip_preserves_values() {
        let mut original = AppConfig::default();
        original.models.encoder_model = Some(PathBuf::from("models/dinov2-base.onnx"));
        original.upscale.seed = 42;
        original.upscale.mode = RefinementMode::Direct;

        let encoded = toml::to_string_pretty(&original).expect("serialize config");
        let decoded: AppConfig = toml::from_str(&encoded).expect("deserialize config");
        assert_eq!(decoded, original);
    }

    #[test]
    fn load_from_nonexistent_file_returns_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("missing.toml");
        let loaded = AppConfig::load_from_path(&path).expect("load config");
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let result = data_dir(Some(Path::new("/custom")));
        assert_eq!(result, PathBuf::from("/custom"));
    }

    #[test]
    fn data_dir_uses_env_var_when_no_cli() {
        env::set_var(ENV_DATA_DIR, "/env/path");
        let result = data_dir(None);
        env::remove_var(ENV_DATA_DIR);
        assert_eq!(result, PathBuf::from("/env/path"));
    }

    #[test]
    fn config_path_is_data_dir_join_config_toml() {
        let result = config_path(Path::new("/data"));
        assert_eq!(result, PathBuf::from("/data/config.toml"));
    }

    #[test]
    fn initialize_creates_data_dir_and_config() {
        let temp = tempdir().expect("tempdir");
        let data = temp.path().join("data");
        initialize_data_dir(&data).expect("initialize data dir");

        assert!(data.exists());
        assert!(data.join("config.toml").exists());
    }

    #[test]
    fn initialize_preserves_existing_config() {
        let temp = tempdir().expect("tempdir");
        let cfg_path = temp.path().join("config.toml");
        let custom_content = "[models]\nbackend = \"tensorrt\"\n";
        fs::write(&cfg_path, custom_content).expect("write custom config");

        initialize_data_dir(temp.path()).expect("initialize data dir");

        let content = fs::read_to_string(&cfg_path).expect("read config");
        assert_eq!(content, custom_content);
    }
}
