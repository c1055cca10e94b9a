//! Typed decode of loosely-typed spec payloads
//!
//! Job and step specs travel as raw values (JSON in memory, YAML when
//! authored in workflow templates or read from the worker's job context
//! file). These helpers are the single seam where a raw payload becomes a
//! variant's strongly-typed spec, failing with a `Decode` error when the
//! payload does not match the schema.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{CoreError, Result};

/// Decodes a raw in-memory spec value into a typed spec.
pub fn decode_spec<T: DeserializeOwned>(raw: &Value) -> Result<T> {
    serde_json::from_value(raw.clone()).map_err(|e| CoreError::decode(e.to_string()))
}

/// Decodes a YAML-authored spec payload into a typed spec.
pub fn decode_yaml_spec<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_yaml::from_str(raw).map_err(|e| CoreError::decode(e.to_string()))
}

/// Re-encodes a typed spec back into the raw form stored on the job.
pub fn encode_spec<T: Serialize>(spec: &T) -> Result<Value> {
    serde_json::to_value(spec).map_err(|e| CoreError::decode(e.to_string()))
}
