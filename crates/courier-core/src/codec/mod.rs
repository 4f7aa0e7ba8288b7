//! Body codecs.
//!
//! A codec converts between structured values and wire bytes and names the
//! content type it produces. Codecs are looked up by name through a
//! [`CodecRegistry`] so that a descriptor restored from the offline cache
//! still knows how to encode its body.

mod form;
mod json;

pub use form::FormCodec;
pub use json::JsonCodec;

use crate::error::{CourierError, Result};
use crate::request::RequestBody;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry name of the built-in JSON codec.
pub const JSON_CODEC: &str = "json";
/// Registry name of the built-in form codec.
pub const FORM_CODEC: &str = "form";

/// Encoder/decoder between structured values and bytes.
pub trait Codec: Send + Sync {
    /// Name the codec is registered under.
    fn name(&self) -> &str;

    /// Content type of the bytes produced by [`Codec::encode`].
    fn content_type(&self) -> &str;

    /// Encode a value using `charset`.
    fn encode(&self, value: &Value, charset: &str) -> Result<Vec<u8>>;

    /// Decode bytes written in `charset`.
    fn decode(&self, bytes: &[u8], charset: &str) -> Result<Value>;

    /// Encode a request body, leaving out its header-only fields.
    fn encode_body(&self, body: &RequestBody, charset: &str) -> Result<Vec<u8>> {
        self.encode(&body.payload(), charset)
    }
}

/// Named collection of codecs. Starts with `json` and `form`.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(FormCodec));
        registry
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with no codecs at all.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register a codec under its own name, replacing any previous one.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.name().to_string(), codec);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Registered codec names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.codecs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Encode `body` with its own codec. Returns the bytes and the codec's
    /// content type.
    pub fn encode_body(&self, body: &RequestBody, charset: &str) -> Result<(Vec<u8>, String)> {
        let codec = self.get(body.codec()).ok_or_else(|| CourierError::Encoding {
            message: format!("No codec registered under '{}'", body.codec()),
        })?;
        let bytes = codec.encode_body(body, charset)?;
        Ok((bytes, codec.content_type().to_string()))
    }

    /// Decode `bytes` with the named codec.
    pub fn decode(&self, codec: &str, bytes: &[u8], charset: &str) -> Result<Value> {
        let codec = self.get(codec).ok_or_else(|| CourierError::Decoding {
            message: format!("No codec registered under '{}'", codec),
        })?;
        codec.decode(bytes, charset)
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.names())
            .finish()
    }
}

/// Convert a decoded value into the caller's target type.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| CourierError::Decoding {
        message: format!("Response does not match the target type: {}", e),
    })
}

/// Whether `charset` names UTF-8, the only charset the built-in codecs
/// handle.
pub(crate) fn is_utf8(charset: &str) -> bool {
    let normalized = charset.trim().trim_matches('"').to_ascii_lowercase();
    normalized == "utf-8" || normalized == "utf8"
}

/// Pull the `charset=` parameter out of a Content-Type header value.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
