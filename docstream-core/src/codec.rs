//! Record codec.
//!
//! Converts typed records to and from the schemaless dictionary shape that
//! document stores persist. The record identifier is spliced out on encode
//! and back in on decode: it lives in the document path, not in the payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A string-keyed document payload.
pub type Dictionary = Map<String, Value>;

/// Field name a record uses for its identifier.
pub const KEY_FIELD: &str = "key";

/// Errors raised while turning a record into a storable dictionary.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Record serialized to {0}, expected an object")]
    NotAnObject(&'static str),
}

/// A stored dictionary that does not fit the target record shape.
#[derive(Error, Debug)]
#[error("Failed to decode document '{key}': {source}")]
pub struct DecodeError {
    key: String,
    #[source]
    source: serde_json::Error,
}

impl DecodeError {
    pub fn new(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self {
            key: key.into(),
            source,
        }
    }

    /// Key of the document that failed to decode.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Serializes `record` into a dictionary without its `key` field.
pub fn encode<T: Serialize + ?Sized>(record: &T) -> Result<Dictionary, EncodeError> {
    match serde_json::to_value(record)? {
        Value::Object(mut dict) => {
            dict.remove(KEY_FIELD);
            Ok(dict)
        }
        other => Err(EncodeError::NotAnObject(kind_of(&other))),
    }
}

/// Rebuilds a record from a stored dictionary and its external key.
///
/// Returns `Ok(None)` when either the dictionary or the key is absent: a
/// missing document is a normal outcome. A dictionary that does not match
/// the shape of `T` once the key is put back is a [`DecodeError`].
pub fn decode<T: DeserializeOwned>(
    dict: Option<&Dictionary>,
    key: Option<&str>,
) -> Result<Option<T>, DecodeError> {
    let (Some(dict), Some(key)) = (dict, key) else {
        return Ok(None);
    };

    let mut with_key = dict.clone();
    with_key.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));

    serde_json::from_value(Value::Object(with_key))
        .map(Some)
        .map_err(|e| DecodeError::new(key, e))
}

/// Renders a dictionary as pretty-printed JSON bytes.
pub fn to_json_bytes(dict: &Dictionary) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec_pretty(dict)?)
}

/// Parses JSON bytes into a dictionary. `key` only labels the error.
pub fn from_json_bytes(bytes: &[u8], key: &str) -> Result<Dictionary, DecodeError> {
    serde_json::from_slice(bytes).map_err(|e| DecodeError::new(key, e))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
