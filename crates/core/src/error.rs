//! Typed errors for the tiled-upscale engine.
//!
//! Cancellation is modeled as its own variant rather than a failure: callers
//! can distinguish "the user stopped the run" from "the run broke" without
//! string matching.

use thiserror::Error;

/// Engine error taxonomy.
#[derive(Error, Debug)]
pub enum UpscaleError {
    /// A configuration value is outside its accepted range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Diffusion mode was requested but the session holds no refiner.
    #[error("diffusion refinement requested but no refiner is configured")]
    MissingRefiner,

    /// Semantic guidance was requested but the session holds no extractor.
    #[error("semantic guidance requested but no feature extractor is configured")]
    MissingExtractor,

    /// The aligner requires a square source patch grid.
    #[error("semantic embedding grid must be square, got {patches} patches")]
    NonSquareGrid { patches: usize },

    /// Buffer/tensor dimensions disagree with their declared shape.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Model inference failed.
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// A refinement backend failed for a reason other than resources.
    #[error("tile refinement failed: {source}")]
    Refinement {
        #[source]
        source: anyhow::Error,
    },

    /// Accelerator memory (or similar) was exhausted during refinement.
    #[error("accelerator resource exhausted: {0}")]
    Resource(String),

    /// The caller cancelled the run at a tile boundary. No output exists.
    #[error("upscale cancelled after {tiles_completed} tile(s); no output produced")]
    Cancelled { tiles_completed: usize },
}

impl UpscaleError {
    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the cooperative-cancellation signal, false for real failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, UpscaleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_a_failure() {
        let cancelled = UpscaleError::Cancelled { tiles_completed: 2 };
        assert!(cancelled.is_cancellation());

        let config = UpscaleError::invalid_parameter("scale_factor", "must be >= 1.0");
        assert!(!config.is_cancellation());
    }

    #[test]
    fn messages_carry_context() {
        let err = UpscaleError::invalid_parameter("steps", "must be within [1, 100], got 0");
        assert!(err.to_string().contains("steps"));
        assert!(err.to_string().contains("[1, 100]"));

        let err = UpscaleError::NonSquareGrid { patches: 12 };
        assert!(err.to_string().contains("12"));
    }
}
