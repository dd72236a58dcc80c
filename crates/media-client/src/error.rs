//! Error types for the media client
//!
//! Every failure that leaves this crate is a single [`Error`] carrying a
//! numeric code. Transport-level failures and server-reported failures
//! arrive through [`RpcError`] and are normalized here.

use crate::transport::RpcError;
use thiserror::Error;

/// Result type alias for media client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Code reported for every transport/protocol failure
pub const TRANSPORT_ERROR_CODE: i32 = 30000;

/// Code reported when the connection pool stays at capacity past its wait bound
pub const RESOURCE_EXHAUSTED_CODE: i32 = 30001;

/// Code reported when no constructor/decoder is registered for a tag
pub const UNKNOWN_TYPE_CODE: i32 = 30002;

/// Code reported when an operation targets a locally released object
pub const RELEASED_CODE: i32 = 30003;

/// Code reported when an operation was abandoned before completing
pub const CANCELLED_CODE: i32 = 30004;

/// Code reported for invalid configuration
pub const CONFIG_ERROR_CODE: i32 = 30005;

/// Code reported when a command result cannot be decoded
pub const SERIALIZATION_ERROR_CODE: i32 = 30006;

/// Error types for media client operations
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure: broken connection, timeout, malformed response
    #[error("Transport error: {message}")]
    Transport {
        /// Human readable description
        message: String,
        /// Underlying transport failure
        #[source]
        source: RpcError,
    },

    /// Structured failure reported by the media server
    #[error("Media server error {code}: {message}")]
    Application {
        /// Message reported by the server
        message: String,
        /// Code reported by the server, passed through unchanged
        code: i32,
    },

    /// Connection pool at capacity beyond its wait bound
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// No proxy constructor registered for a remote object kind
    #[error("Unknown media object kind: {0}")]
    UnknownObjectKind(String),

    /// No result decoder registered for a command type, or the decoded
    /// result has a different type than requested
    #[error("Unknown command result type: {0}")]
    UnknownCommandType(String),

    /// Operation invoked on an object that was already released
    #[error("Media object {0} has been released")]
    Released(String),

    /// Operation dropped before it could complete
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Command result decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Numeric code carried by this error
    pub fn code(&self) -> i32 {
        match self {
            Error::Transport { .. } => TRANSPORT_ERROR_CODE,
            Error::Application { code, .. } => *code,
            Error::ResourceExhausted(_) => RESOURCE_EXHAUSTED_CODE,
            Error::UnknownObjectKind(_) | Error::UnknownCommandType(_) => UNKNOWN_TYPE_CODE,
            Error::Released(_) => RELEASED_CODE,
            Error::Cancelled(_) => CANCELLED_CODE,
            Error::ConfigError(_) => CONFIG_ERROR_CODE,
            Error::Serialization(_) => SERIALIZATION_ERROR_CODE,
        }
    }

    /// True for connection-level failures
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// True for failures reported by the media server
    pub fn is_application(&self) -> bool {
        matches!(self, Error::Application { .. })
    }

    /// True when the pool could not hand out a connection in time
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Error::ResourceExhausted(_))
    }
}

/// Error translation: server failures keep their code, everything else is
/// a transport failure with [`TRANSPORT_ERROR_CODE`].
impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Server { message, code } => Error::Application { message, code },
            other => Error::Transport {
                message: other.to_string(),
                source: other,
            },
        }
    }
}
