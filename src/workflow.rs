use serde_json::{json, Map, Value};
use std::path::Path;

use crate::error::{ComfyError, Result};

/// Behavioral role of a node, recognized by class name and input keys rather
/// than by node ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Plain `CLIPTextEncode` with a `text` input. Variants such as
    /// `CLIPTextEncodeSDXLRefiner` are not prompt targets.
    TextEncoder,
    /// Any node whose class contains "sampler" (`KSampler`, `KSamplerAdvanced`, ...).
    Sampler,
    /// Image loader (`LoadImage`, ...) with an `image` input.
    ImageLoader,
}

impl NodeRole {
    /// Test a raw node value against this role.
    pub fn matches(self, node: &Value) -> bool {
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            return false;
        };
        let class = node
            .get("class_type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase();
        match self {
            NodeRole::TextEncoder => class == "cliptextencode" && inputs.contains_key("text"),
            NodeRole::Sampler => class.contains("sampler"),
            NodeRole::ImageLoader => class.contains("loadimage") && inputs.contains_key("image"),
        }
    }
}

/// Sampler inputs to overwrite. `None` leaves the input untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplerParams {
    pub seed: Option<u32>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
}

/// An API-format ComfyUI workflow: node ID → `{class_type, inputs}`.
///
/// Nodes keep the order they had in the source JSON, so every "first match"
/// lookup is deterministic for a given file. Clone it to get an independent
/// copy for each unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    nodes: Map<String, Value>,
}

impl Workflow {
    /// Wrap a parsed JSON value. UI-layout exports are rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(nodes) = value else {
            return Err(ComfyError::Config(
                "Workflow JSON must be an object keyed by node ID (API export required)".into(),
            ));
        };
        if nodes.get("nodes").map(Value::is_array).unwrap_or(false) {
            return Err(ComfyError::Config(
                "Workflow looks like a UI export; save it with \"Export (API)\" instead".into(),
            ));
        }
        Ok(Self { nodes })
    }

    /// Parse workflow JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            ComfyError::Config(format!("Workflow JSON parse error (API export required): {e}"))
        })?;
        Self::from_value(value)
    }

    /// Load a workflow file from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ComfyError::Config(format!(
                "Workflow file not found: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ComfyError::io(format!("Could not read workflow {}", path.display()), e))?;
        Self::from_json(&text)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Value> {
        self.nodes.get(id)
    }

    /// Input map of a node, if the node exists and has one.
    pub fn inputs(&self, id: &str) -> Option<&Map<String, Value>> {
        self.nodes.get(id)?.get("inputs")?.as_object()
    }

    fn inputs_mut(&mut self, id: &str) -> Option<&mut Map<String, Value>> {
        self.nodes.get_mut(id)?.get_mut("inputs")?.as_object_mut()
    }

    /// The document as a JSON value, ready for the `/prompt` envelope.
    pub fn to_value(&self) -> Value {
        Value::Object(self.nodes.clone())
    }

    /// ID of the first node playing `role`.
    pub fn find_first(&self, role: NodeRole) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, node)| role.matches(node))
            .map(|(id, _)| id.as_str())
    }

    /// IDs of all nodes playing `role`, in document order.
    pub fn find_all(&self, role: NodeRole) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, node)| role.matches(node))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    // ── Prompts ─────────────────────────────────────────────────────

    /// Write `text` into the first text encoder and return its node ID.
    pub fn inject_positive_prompt(&mut self, text: &str) -> Result<String> {
        let id = self
            .find_first(NodeRole::TextEncoder)
            .map(str::to_string)
            .ok_or_else(|| {
                ComfyError::Config("No compatible node: CLIPTextEncode with 'text' input".into())
            })?;
        if let Some(inputs) = self.inputs_mut(&id) {
            inputs.insert("text".into(), json!(text));
        }
        Ok(id)
    }

    /// Another text encoder besides `exclude_id`, when there are at least two.
    pub fn find_second_text_node(&self, exclude_id: &str) -> Option<String> {
        let encoders = self.find_all(NodeRole::TextEncoder);
        if encoders.len() < 2 {
            return None;
        }
        encoders
            .into_iter()
            .find(|id| *id != exclude_id)
            .map(str::to_string)
    }

    /// Whether the workflow has room for a negative prompt.
    pub fn has_second_text_node(&self) -> bool {
        self.nodes
            .values()
            .filter(|node| NodeRole::TextEncoder.matches(node))
            .nth(1)
            .is_some()
    }

    /// Write `text` into the given node. Returns false if the node is absent.
    pub fn inject_negative_prompt(&mut self, text: &str, node_id: &str) -> bool {
        match self.inputs_mut(node_id) {
            Some(inputs) => {
                inputs.insert("text".into(), json!(text));
                true
            }
            None => false,
        }
    }

    // ── Sampling ────────────────────────────────────────────────────

    /// Overwrite inputs on the first sampler-like node. Only keys the node
    /// already has are written; nothing is added. Returns the node ID.
    pub fn set_sampler_params(&mut self, params: &SamplerParams) -> Option<String> {
        let id = self.find_first(NodeRole::Sampler)?.to_string();
        let inputs = self.inputs_mut(&id)?;

        let mut set = |key: &str, value: Value| {
            if let Some(slot) = inputs.get_mut(key) {
                *slot = value;
            }
        };
        if let Some(seed) = params.seed {
            set("seed", json!(seed));
        }
        if let Some(steps) = params.steps {
            set("steps", json!(steps));
        }
        if let Some(cfg) = params.cfg {
            set("cfg", json!(cfg));
        }
        if let Some(sampler) = params.sampler.as_deref().filter(|s| !s.is_empty()) {
            set("sampler_name", json!(sampler));
        }
        if let Some(scheduler) = params.scheduler.as_deref().filter(|s| !s.is_empty()) {
            set("scheduler", json!(scheduler));
        }
        if let Some(denoise) = params.denoise {
            set("denoise", json!(denoise));
        }
        Some(id)
    }

    /// Set `width`/`height` on every node that has both. Returns touched IDs.
    pub fn apply_dimensions(&mut self, width: u32, height: u32) -> Vec<String> {
        let mut touched = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
                continue;
            };
            if inputs.contains_key("width") && inputs.contains_key("height") {
                inputs.insert("width".into(), json!(width));
                inputs.insert("height".into(), json!(height));
                touched.push(id.clone());
            }
        }
        touched
    }

    // ── Source image ────────────────────────────────────────────────

    /// Point the first image loader at an uploaded file.
    pub fn set_load_image(&mut self, filename: &str) -> Result<String> {
        let id = self
            .find_first(NodeRole::ImageLoader)
            .map(str::to_string)
            .ok_or_else(|| ComfyError::Config("No LoadImage node found in the workflow.".into()))?;
        if let Some(inputs) = self.inputs_mut(&id) {
            inputs.insert("image".into(), json!(filename));
        }
        Ok(id)
    }
}
