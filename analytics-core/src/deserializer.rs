use serde_json::Value;
use std::fmt::Debug;

/// Transforms the raw bytes of one result row into the value handed to the caller.
///
/// Returning an error aborts the whole result stream with a
/// [`ErrorKind::Decode`](crate::ErrorKind::Decode) error.
pub trait Deserializer: Send + Sync + Debug {
    fn deserialize(&self, row: &[u8]) -> anyhow::Result<Value>;
}

/// Parses every row as JSON.
#[derive(Default, Debug, Clone, Copy)]
pub struct DefaultJsonDeserializer;

impl Deserializer for DefaultJsonDeserializer {
    fn deserialize(&self, row: &[u8]) -> anyhow::Result<Value> {
        Ok(serde_json::from_slice(row)?)
    }
}

/// Hands every row over untouched, as a JSON string containing the row text.
#[derive(Default, Debug, Clone, Copy)]
pub struct PassthroughDeserializer;

impl Deserializer for PassthroughDeserializer {
    fn deserialize(&self, row: &[u8]) -> anyhow::Result<Value> {
        Ok(Value::String(std::str::from_utf8(row)?.to_owned()))
    }
}
