//! Payload and header serialization.
//!
//! The core is codec-agnostic: envelopes and the bus facade talk to a
//! [`Codec`] trait object. To stay object-safe the trait works at the
//! [`serde_json::Value`] level; the typed helpers layered on `dyn Codec`
//! restore the generic API (`encode`, `decode`, `parse_obj`).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::CodecError;

/// Byte-level serialization of loosely-typed values.
///
/// Implementations must round-trip any value of a schema and must treat an
/// empty byte string as the none value: `encode_value(Null) == b""` and
/// `decode_value(b"") == Null`.
pub trait Codec: Send + Sync {
    fn encode_value(&self, value: &Value) -> Result<Bytes, CodecError>;
    fn decode_value(&self, raw: &[u8]) -> Result<Value, CodecError>;
}

impl dyn Codec {
    /// Serialize a typed value to transport bytes.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        let value = serde_json::to_value(value).map_err(|err| CodecError::Encode {
            reason: err.to_string(),
        })?;
        self.encode_value(&value)
    }

    /// Deserialize transport bytes into a typed value.
    pub fn decode<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<T, CodecError> {
        let value = self.decode_value(raw)?;
        self.parse_obj(value)
    }

    /// Coerce a loosely-typed value (e.g. a header map) into a schema.
    pub fn parse_obj<T: DeserializeOwned>(&self, value: Value) -> Result<T, CodecError> {
        serde_json::from_value(value).map_err(|err| CodecError::Decode {
            reason: err.to_string(),
        })
    }
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_value(&self, value: &Value) -> Result<Bytes, CodecError> {
        if value.is_null() {
            return Ok(Bytes::new());
        }
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| CodecError::Encode {
                reason: err.to_string(),
            })
    }

    fn decode_value(&self, raw: &[u8]) -> Result<Value, CodecError> {
        if raw.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(raw).map_err(|err| CodecError::Decode {
            reason: err.to_string(),
        })
    }
}

/// Turn a metadata value into the string-keyed, string-valued header map
/// used at the transport layer. Scalars are stringified; nested values are
/// rejected. A none value yields the empty map.
pub fn headers_from_metadata<M: Serialize>(
    metadata: &M,
) -> Result<std::collections::HashMap<String, String>, CodecError> {
    let value = serde_json::to_value(metadata).map_err(|err| CodecError::Encode {
        reason: err.to_string(),
    })?;
    let mut headers = std::collections::HashMap::new();
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                let rendered = match value {
                    Value::String(s) => s,
                    Value::Bool(_) | Value::Number(_) => value.to_string(),
                    Value::Null => continue,
                    other => {
                        return Err(CodecError::Encode {
                            reason: format!("header '{key}' is not a scalar: {other}"),
                        });
                    }
                };
                headers.insert(key, rendered);
            }
        }
        other => {
            return Err(CodecError::Encode {
                reason: format!("metadata must serialize to a map, got: {other}"),
            });
        }
    }
    Ok(headers)
}
