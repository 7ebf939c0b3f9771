//! State serialization for workflow history payloads.
//!
//! Everything the framework persists into workflow history (state markers,
//! correlator markers, error markers, activity inputs and results) goes
//! through a [`StateSerializer`]. The default is plain JSON; a base64-wrapped
//! variant is provided for payloads that must survive transports that mangle
//! raw JSON. Implement the trait to plug in anything else.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Serializes state to and from the opaque strings stored in workflow history.
///
/// The trait is object-safe: implementations exchange `serde_json::Value`, and
/// the typed `serialize`/`deserialize` helpers on `dyn StateSerializer` do the
/// conversion to concrete types.
pub trait StateSerializer: Send + Sync {
    fn serialize_value(&self, value: &Value) -> CoreResult<String>;
    fn deserialize_value(&self, serialized: &str) -> CoreResult<Value>;
}

impl dyn StateSerializer {
    /// Serialize any serde-serializable value to its history representation.
    pub fn serialize<T: Serialize>(&self, state: &T) -> CoreResult<String> {
        self.serialize_value(&serde_json::to_value(state)?)
    }

    /// Deserialize a history payload into a concrete type.
    pub fn deserialize<T: DeserializeOwned>(&self, serialized: &str) -> CoreResult<T> {
        Ok(serde_json::from_value(self.deserialize_value(serialized)?)?)
    }
}

/// JSON serializer, the default for both user state and framework markers.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStateSerializer;

impl StateSerializer for JsonStateSerializer {
    fn serialize_value(&self, value: &Value) -> CoreResult<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize_value(&self, serialized: &str) -> CoreResult<Value> {
        Ok(serde_json::from_str(serialized)?)
    }
}

/// JSON wrapped in standard base64.
///
/// Useful when state payloads are relayed through systems that are not
/// 8-bit-clean or that choke on embedded quotes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64JsonStateSerializer;

impl StateSerializer for Base64JsonStateSerializer {
    fn serialize_value(&self, value: &Value) -> CoreResult<String> {
        let json = serde_json::to_vec(value)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    fn deserialize_value(&self, serialized: &str) -> CoreResult<Value> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(serialized.trim())
            .map_err(|e| CoreError::Encoding(format!("base64 decode: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        states: Vec<String>,
        count: u32,
    }

    #[test]
    fn test_json_round_trip() {
        let serializer: &dyn StateSerializer = &JsonStateSerializer;
        let data = TestData {
            states: vec!["start".to_string(), "working".to_string()],
            count: 3,
        };

        let serialized = serializer.serialize(&data).unwrap();
        let decoded: TestData = serializer.deserialize(&serialized).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_json_deserialize_garbage() {
        let serializer: &dyn StateSerializer = &JsonStateSerializer;
        let result: CoreResult<TestData> = serializer.deserialize("{not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_base64_round_trip() {
        let serializer: &dyn StateSerializer = &Base64JsonStateSerializer;
        let data = TestData {
            states: vec!["start".to_string()],
            count: 1,
        };

        let serialized = serializer.serialize(&data).unwrap();
        // the encoded form should not be raw JSON
        assert!(!serialized.starts_with('{'));

        let decoded: TestData = serializer.deserialize(&serialized).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_bad_payload() {
        let serializer: &dyn StateSerializer = &Base64JsonStateSerializer;
        let result: CoreResult<TestData> = serializer.deserialize("!!not-base64!!");
        assert!(matches!(result, Err(CoreError::Encoding(_))));
    }
}
