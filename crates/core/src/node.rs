use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use serde::{Deserialize, Serialize};

use crate::tensor::ImageTensor;
use crate::upscale::UpscaleSession;

#[derive(Debug, Clone, PartialEq)]
pub struct PortDefinition {
    pub name: String,
    pub port_type: PortType,
    pub required: bool,
    pub default_value: Option<serde_json::Value>,
}

/// Port type identifier for connection validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Image,
    Int,
    Float,
    Str,
    Bool,
    Path,
}

impl PortType {
    pub fn is_compatible(&self, other: &PortType) -> bool {
        self == other
    }
}

/// Data types that can flow between node ports.
pub enum PortData {
    Image(ImageTensor),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Path(PathBuf),
}

/// Per-invocation execution state shared with nodes.
///
/// The cancel flag is set by the host (UI stop button, queue eviction) and
/// checked by long-running nodes at their internal work boundaries.
#[derive(Default, Clone)]
pub struct ExecutionContext {
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ExecutionContext {
    /// Context plus the flag the host flips to request cancellation.
    pub fn cancellable() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            Self {
                cancel: Some(flag.clone()),
            },
            flag,
        )
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Core node trait that all nodes implement.
pub trait Node: Send + Sync {
    fn node_type(&self) -> &str;
    fn input_ports(&self) -> Vec<PortDefinition>;
    fn output_ports(&self) -> Vec<PortDefinition>;
    fn execute(
        &mut self,
        inputs: &HashMap<String, PortData>,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, PortData>>;
}

/// Sub-trait for nodes that transform one host image tensor into another,
/// drawing capabilities from a caller-owned session.
pub trait ImageProcessor: Node {
    fn process_image(
        &mut self,
        image: ImageTensor,
        session: &mut UpscaleSession,
        ctx: &ExecutionContext,
    ) -> Result<ImageTensor>;
}
