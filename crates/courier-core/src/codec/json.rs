use super::{is_utf8, Codec, JSON_CODEC};
use crate::error::{CourierError, Result};
use serde_json::Value;

/// Structured-object codec over JSON.
///
/// An empty or whitespace-only body decodes as `null`, so `()` and
/// `Option<T>` targets accept `204 No Content` responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        JSON_CODEC
    }

    fn content_type(&self) -> &str {
        "application/json"
    }

    fn encode(&self, value: &Value, charset: &str) -> Result<Vec<u8>> {
        if !is_utf8(charset) {
            return Err(CourierError::Encoding {
                message: format!("Unsupported charset for JSON: {}", charset),
            });
        }
        serde_json::to_vec(value).map_err(|e| CourierError::Encoding {
            message: format!("Failed to encode JSON: {}", e),
        })
    }

    fn decode(&self, bytes: &[u8], charset: &str) -> Result<Value> {
        if !is_utf8(charset) {
            return Err(CourierError::Decoding {
                message: format!("Unsupported charset for JSON: {}", charset),
            });
        }
        let text = std::str::from_utf8(bytes).map_err(|e| CourierError::Decoding {
            message: format!("Response is not valid UTF-8: {}", e),
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(text).map_err(|e| CourierError::Decoding {
            message: format!("Failed to decode JSON: {}", e),
        })
    }
}
