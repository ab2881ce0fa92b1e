//! Metadata record carried at the head of a framed reply.
//!
//! The backend serializes a JSON object such as
//!
//! ```json
//! {"type": "metadata", "message": "...", "actions": [{"type": "show_card", "id": 3}],
//!  "session_id": "...", "student_id": "..."}
//! ```
//!
//! Only `message` and `actions` are meaningful to the client; the remaining keys are
//! kept when present. An empty body decodes to [`MetadataRecord::default`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::StreamResult;

/// Decoded content of the metadata frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Record tag (`"metadata"` in practice).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Human-readable reply text; also the text the avatar speaks.
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,

    /// Ordered action descriptors.
    #[serde(default, deserialize_with = "null_as_default")]
    pub actions: Vec<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
}

/// A typed action descriptor: a `type` tag plus arbitrary fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,

    /// Every key other than `type`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Action {
    /// Create an action with no extra fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// `null` decodes like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl MetadataRecord {
    /// Decode a metadata body.
    pub fn decode(body: &[u8]) -> StreamResult<Self> {
        if body.is_empty() {
            return Ok(Self::default());
        }
        let text = std::str::from_utf8(body)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to the JSON body carried in a metadata frame.
    pub fn to_body(&self) -> StreamResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Create a record with a message and no actions.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            kind: Some("metadata".to_string()),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Whether the record carries any actions.
    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }
}
