//! RemoteMedia Media Client - typed proxies for remote media-server objects
//!
//! This crate is the client half of a distributed media API. Objects such as
//! pipelines and endpoints live in a remote media server; the application
//! holds local proxies and drives them through remote calls.
//!
//! # Architecture
//!
//! ```text
//! application
//!     │
//!     ▼
//! MediaObject / MediaPipeline ──> ConnectionPool ──> MediaServerConnector
//!     │   (blocking + _async)         (bounded,          (transport crate)
//!     │                                two flavors)
//!     ├──> ListenerRegistry   <── event-ingestion channel
//!     ├──> ObjectFactory      (kind -> proxy, live arena)
//!     └──> CommandResultFactory (command type -> decoder)
//! ```
//!
//! - Every operation exists as a blocking call and as a non-blocking call
//!   resolving a [`Continuation`].
//! - Connections are leased per call and always returned, on every path.
//! - Failures surface as [`Error`] with a numeric code: transport faults use
//!   [`error::TRANSPORT_ERROR_CODE`], server failures keep the server's code.
//!
//! The wire protocol, the event-ingestion channel and the concrete endpoint
//! kinds are provided by other crates through [`MediaServerConnector`],
//! [`MediaContext::dispatch_event`] and [`ObjectFactory::register`].
//!
//! # Example
//!
//! ```ignore
//! use remotemedia_media_client::{MediaApiConfig, MediaContext, KeepAliveScheduler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> remotemedia_media_client::Result<()> {
//!     remotemedia_media_client::init()?;
//!
//!     let config = MediaApiConfig::from_file("media.toml")?;
//!     let ctx = MediaContext::new(Arc::new(MyConnector::new()), config)?;
//!     let keepalive = KeepAliveScheduler::spawn(ctx.clone());
//!
//!     let pipeline = ctx.pipeline("pipeline-1")?;
//!     let (cont, rx) = Continuation::channel();
//!     pipeline.keep_alive_async(cont);
//!     rx.await.ok();
//!
//!     keepalive.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod config;
pub mod context;
pub mod continuation;
pub mod error;
pub mod factory;
pub mod keepalive;
pub mod listener;
pub mod object;
pub mod pool;
pub mod reference;
pub mod transport;

pub use command::{Command, CommandResult};
pub use config::MediaApiConfig;
pub use context::{MediaContext, MediaContextBuilder};
pub use continuation::Continuation;
pub use error::{Error, Result};
pub use factory::{CommandResultFactory, ObjectFactory, ProxyKinds};
pub use keepalive::{KeepAliveReport, KeepAliveScheduler};
pub use listener::{ListenerRegistry, MediaEvent, MediaEventListener, Subscription};
pub use object::{AsAny, MediaObject, MediaObjectProxy, MediaPipeline};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use reference::{MediaObjectRef, MEDIA_PIPELINE_KIND};
pub use transport::{
    AsyncMediaServerClient, MediaServerClient, MediaServerConnector, Request, Response, RpcError,
    RpcResult,
};

/// Initialize logging
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`.
///
/// # Errors
///
/// * `Error::ConfigError` - A global subscriber is already installed
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| Error::ConfigError(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!("RemoteMedia media client initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // Should not panic
        init().ok();
    }
}
