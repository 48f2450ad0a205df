//! JSON header block shared by requests and responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Known headers plus any custom entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Headers {
    #[serde(rename = "Content-Length", skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,

    #[serde(rename = "Content-Type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Comma-separated encoder names.
    #[serde(rename = "Encoding", skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    #[serde(rename = "Authorization", skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,

    #[serde(rename = "Exchange", skip_serializing_if = "std::ops::Not::not")]
    pub exchange: bool,

    #[serde(rename = "Files", skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(rename = "Errors", skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content length if present and non-zero.
    pub fn body_length(&self) -> Option<u64> {
        self.content_length.filter(|len| *len > 0)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(name.into(), value.into());
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a header block; blank input yields empty headers.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }
}
