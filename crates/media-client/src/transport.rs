//! Transport abstraction for talking to the media server
//!
//! This crate knows nothing about the wire format. A transport crate
//! implements [`MediaServerConnector`] to open connections of two flavors:
//!
//! - [`MediaServerClient`]: blocking, occupies the calling thread until the
//!   server replies.
//! - [`AsyncMediaServerClient`]: non-blocking, completes on whatever
//!   execution context the transport uses for I/O.
//!
//! Both speak the same typed request/response vocabulary.
//!
//! # Architecture
//!
//! ```text
//! MediaObject ──acquire──> ConnectionPool ──connect──> MediaServerConnector
//!      │                         │
//!      └──── call(target, Request) ────> media server
//!                                │
//!      <──── Response | RpcError ┘
//! ```

use crate::command::Command;
use crate::reference::MediaObjectRef;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Result type for raw transport calls
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Failure reported by a transport call
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection-level I/O failure
    #[error("connection broken: {0}")]
    Broken(#[from] std::io::Error),

    /// Reply could not be decoded or did not match the request
    #[error("malformed response: {0}")]
    Protocol(String),

    /// No reply within the transport deadline
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Structured failure reported by the media server
    #[error("{message}")]
    Server {
        /// Server message
        message: String,
        /// Server error code
        code: i32,
    },
}

impl RpcError {
    /// Whether the connection that produced this error should be discarded
    ///
    /// Server-reported failures leave the connection usable.
    pub fn is_connection_fault(&self) -> bool {
        !matches!(self, RpcError::Server { .. })
    }
}

/// One remote call, addressed to a media object
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Free the object and all of its remote children
    Release,
    /// Subscribe to the object's events, delivered to the given address
    Subscribe {
        /// Address of the local event handler
        handler_address: String,
        /// Port of the local event handler
        handler_port: u16,
    },
    /// Cancel a subscription
    Unsubscribe {
        /// Token returned by the matching `Subscribe`
        token: String,
    },
    /// Dispatch a typed command
    SendCommand(Command),
    /// Reset the object's time-to-live on the server
    KeepAlive,
    /// Resolve the object's parent
    GetParent,
    /// Resolve the pipeline owning the object
    GetMediaPipeline,
}

impl Request {
    /// RPC name of this request
    pub fn name(&self) -> &'static str {
        match self {
            Request::Release => "release",
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
            Request::SendCommand(_) => "sendCommand",
            Request::KeepAlive => "keepAlive",
            Request::GetParent => "getParent",
            Request::GetMediaPipeline => "getMediaPipeline",
        }
    }
}

/// Successful reply to a [`Request`]
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// No payload (`release`, `unsubscribe`, `keepAlive`)
    Unit,
    /// Subscription token (`subscribe`)
    Token(String),
    /// Raw command result bytes (`sendCommand`)
    CommandResult(Bytes),
    /// Resolved reference; `None` when the object has no parent (`getParent`, `getMediaPipeline`)
    Reference(Option<MediaObjectRef>),
}

impl Response {
    /// Expect a unit reply
    pub fn into_unit(self, request: &'static str) -> RpcResult<()> {
        match self {
            Response::Unit => Ok(()),
            other => Err(unexpected(request, &other)),
        }
    }

    /// Expect a subscription token
    pub fn into_token(self, request: &'static str) -> RpcResult<String> {
        match self {
            Response::Token(token) => Ok(token),
            other => Err(unexpected(request, &other)),
        }
    }

    /// Expect raw command result bytes
    pub fn into_command_result(self, request: &'static str) -> RpcResult<Bytes> {
        match self {
            Response::CommandResult(bytes) => Ok(bytes),
            other => Err(unexpected(request, &other)),
        }
    }

    /// Expect an optional reference
    pub fn into_reference(self, request: &'static str) -> RpcResult<Option<MediaObjectRef>> {
        match self {
            Response::Reference(reference) => Ok(reference),
            other => Err(unexpected(request, &other)),
        }
    }
}

fn unexpected(request: &'static str, response: &Response) -> RpcError {
    RpcError::Protocol(format!("unexpected reply to {}: {:?}", request, response))
}

/// Blocking connection to the media server
///
/// A connection is leased to one caller at a time by the pool, so calls
/// take `&mut self`.
pub trait MediaServerClient: Send {
    /// Issue one call and wait for its reply
    fn call(&mut self, target: &MediaObjectRef, request: &Request) -> RpcResult<Response>;
}

/// Non-blocking connection to the media server
#[async_trait]
pub trait AsyncMediaServerClient: Send {
    /// Issue one call; the returned future completes when the server replies
    async fn call(&mut self, target: &MediaObjectRef, request: &Request) -> RpcResult<Response>;
}

/// Opens transport connections for the pool
///
/// # Thread Safety
///
/// Implementations must be Send + Sync; the pool opens replacement
/// connections from whichever thread or task needs one.
#[async_trait]
pub trait MediaServerConnector: Send + Sync {
    /// Open a blocking connection
    fn connect_blocking(&self) -> RpcResult<Box<dyn MediaServerClient>>;

    /// Open a non-blocking connection
    async fn connect(&self) -> RpcResult<Box<dyn AsyncMediaServerClient>>;
}
