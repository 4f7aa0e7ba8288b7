use super::{is_utf8, Codec, FORM_CODEC};
use crate::error::{CourierError, Result};
use serde_json::Value;

/// Flat key-value codec for `application/x-www-form-urlencoded` bodies.
///
/// Only objects of scalar values encode; `null` entries are skipped.
/// Decoding is not supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormCodec;

impl Codec for FormCodec {
    fn name(&self) -> &str {
        FORM_CODEC
    }

    fn content_type(&self) -> &str {
        "application/x-www-form-urlencoded"
    }

    fn encode(&self, value: &Value, charset: &str) -> Result<Vec<u8>> {
        if !is_utf8(charset) {
            return Err(CourierError::Encoding {
                message: format!("Unsupported charset for form bodies: {}", charset),
            });
        }

        let map = value.as_object().ok_or_else(|| CourierError::Encoding {
            message: "Form bodies must be flat objects".to_string(),
        })?;

        let mut pairs = Vec::with_capacity(map.len());
        for (key, field) in map {
            let text = match field {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(CourierError::Encoding {
                        message: format!("Form field '{}' is not a scalar", key),
                    })
                }
            };
            pairs.push((key.as_str(), text));
        }

        serde_urlencoded::to_string(&pairs)
            .map(String::into_bytes)
            .map_err(|e| CourierError::Encoding {
                message: format!("Failed to encode form body: {}", e),
            })
    }

    fn decode(&self, _bytes: &[u8], _charset: &str) -> Result<Value> {
        Err(CourierError::UnsupportedOperation {
            operation: "decoding form-encoded responses".to_string(),
        })
    }
}
