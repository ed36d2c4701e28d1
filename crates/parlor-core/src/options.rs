//! Per-conversation execution options.
//!
//! Options are stored as a JSON blob on the session record and merged with
//! updates via [`deep_merge`] — nested objects merge recursively, scalars
//! and arrays replace.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_true() -> bool {
    true
}

/// Options handed to the execution backend when building a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecOptions {
    /// Model override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Working directory for tool execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Backend permission mode (e.g. `default`, `acceptEdits`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    /// Tools the backend may use without prompting.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    /// Tools the backend must never use.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disallowed_tools: Vec<String>,
    /// Cap on assistant turns per round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Whether the backend should emit stream deltas. The server relies on
    /// these for live delivery, so this defaults on.
    #[serde(default = "default_true")]
    pub include_partial_messages: bool,
    /// Backend-specific passthrough keys.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            model: None,
            system_prompt: None,
            cwd: None,
            permission_mode: None,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            max_turns: None,
            include_partial_messages: true,
            extra: serde_json::Map::new(),
        }
    }
}

impl ExecOptions {
    /// Merge a JSON patch over these options.
    ///
    /// Unknown keys survive in `extra`, so a client can carry
    /// backend-specific settings the server does not model.
    #[must_use]
    pub fn merged_with(&self, patch: &Value) -> Self {
        let base = serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()));
        let merged = deep_merge(base, patch.clone());
        serde_json::from_value(merged).unwrap_or_else(|_| self.clone())
    }
}

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key-by-key; any other overlay value (scalar, array, null)
/// replaces the base value.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}
