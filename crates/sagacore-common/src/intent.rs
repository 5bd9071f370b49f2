//! Intent — the immutable user-facing request that a Plan is generated from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_intent_id: Option<String>,
    pub intent_type: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub raw_text: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Intent {
    pub fn new(id: impl Into<String>, intent_type: impl Into<String>, raw_text: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: id.into(),
            parent_intent_id: None,
            intent_type: intent_type.into(),
            parameters: HashMap::new(),
            raw_text: raw_text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: HashMap::new(),
            content_hash: None,
        }
    }

    pub fn supersedes(&self) -> Option<&str> {
        self.parent_intent_id.as_deref()
    }
}
