//! Finalize payload submitted by the client after review.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Keys every finalize payload must carry.
pub const REQUIRED_KEYS: [&str; 6] = [
    "datasetDescription",
    "readme",
    "participantsColumn",
    "subjects",
    "objects",
    "entityMappings",
];

/// Typed view of the finalize payload.
///
/// The snapshot on disk is the client's JSON verbatim; this type only
/// validates its shape and exposes a few counts.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinalizePayload {
    pub dataset_description: Map<String, Value>,
    pub readme: String,
    pub participants_column: Value,
    pub subjects: Vec<Value>,
    pub objects: Vec<Value>,
    pub entity_mappings: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FinalizePayload {
    /// Parse and validate a payload. The error names the offending key.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(map) = &value else {
            return Err("payload must be a JSON object".to_string());
        };
        if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !map.contains_key(**k)) {
            return Err(format!("missing required key '{}'", missing));
        }
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}
