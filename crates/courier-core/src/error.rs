//! Error types for Courier.
//!
//! Every send terminates with exactly one of these categories. Transport-level
//! failures are always wrapped before they reach callers; nothing escapes
//! uncategorized.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the Courier library.
#[derive(Debug, Error)]
pub enum CourierError {
    // Delivery errors
    #[error("No connectivity: {required} is not reachable")]
    NoConnectivity {
        /// Human-readable form of the connectivity requirement that failed.
        required: String,
    },

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unexpected status code {status}")]
    UnexpectedStatus {
        status: u16,
        /// Raw response body as received.
        body: Vec<u8>,
    },

    // Codec errors
    #[error("Encoding error: {message}")]
    Encoding { message: String },

    #[error("Decoding error: {message}")]
    Decoding { message: String },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    // Future errors
    #[error("Timed out after {0:?} waiting for the response")]
    Timeout(Duration),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Result was already retrieved from this handle")]
    AlreadyRetrieved,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Persistence errors
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for Courier operations.
pub type Result<T> = std::result::Result<T, CourierError>;

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        CourierError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for CourierError {
    fn from(err: rusqlite::Error) -> Self {
        CourierError::Store {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for CourierError {
    fn from(err: reqwest::Error) -> Self {
        // Malformed URL or header: the request never left the process
        if err.is_builder() {
            return CourierError::Configuration {
                message: format!("Invalid request: {}", err),
            };
        }

        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };

        CourierError::Transport {
            message,
            source: Some(Box::new(err)),
        }
    }
}

impl CourierError {
    /// Create a transport error without an underlying cause.
    pub fn transport(message: impl Into<String>) -> Self {
        CourierError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        CourierError::Configuration {
            message: message.into(),
        }
    }

    /// Whether a cache-eligible request failing with this error should be
    /// persisted for a later retry.
    ///
    /// Only connectivity-shaped failures qualify. A server that answered with
    /// the wrong status, or a payload the codec rejected, would fail the
    /// same way again.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            CourierError::NoConnectivity { .. } | CourierError::Transport { .. }
        )
    }

    /// Whether this error ends the request for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CourierError::UnexpectedStatus { .. }
                | CourierError::Encoding { .. }
                | CourierError::Decoding { .. }
                | CourierError::UnsupportedOperation { .. }
                | CourierError::Configuration { .. }
        )
    }

    /// Status code carried by an `UnexpectedStatus` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            CourierError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CourierError::UnexpectedStatus {
            status: 404,
            body: b"missing".to_vec(),
        };
        assert_eq!(err.to_string(), "Unexpected status code 404");

        let err = CourierError::NoConnectivity {
            required: "wifi".into(),
        };
        assert_eq!(err.to_string(), "No connectivity: wifi is not reachable");
    }

    #[test]
    fn test_cacheable_errors() {
        assert!(CourierError::transport("reset by peer").is_cacheable());
        assert!(CourierError::NoConnectivity {
            required: "any".into()
        }
        .is_cacheable());

        assert!(!CourierError::UnexpectedStatus {
            status: 500,
            body: Vec::new()
        }
        .is_cacheable());
        assert!(!CourierError::Decoding {
            message: "bad json".into()
        }
        .is_cacheable());
        assert!(!CourierError::Timeout(Duration::from_secs(1)).is_cacheable());
    }

    #[test]
    fn test_reqwest_builder_error_is_not_cacheable() {
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert!(err.is_builder());

        let err = CourierError::from(err);
        assert!(matches!(err, CourierError::Configuration { .. }));
        assert!(!err.is_cacheable());
        assert!(err.is_terminal());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(CourierError::Encoding {
            message: "charset".into()
        }
        .is_terminal());
        assert!(!CourierError::transport("dns").is_terminal());
        assert!(!CourierError::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_accessor() {
        let err = CourierError::UnexpectedStatus {
            status: 409,
            body: Vec::new(),
        };
        assert_eq!(err.status(), Some(409));
        assert_eq!(CourierError::Cancelled.status(), None);
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: CourierError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CourierError::Json { .. }));
    }
}
