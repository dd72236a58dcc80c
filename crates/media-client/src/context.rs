//! Shared state for every proxy of one media server session
//!
//! The pool, listener registry and both factories are built once at startup
//! and handed to each proxy through a [`MediaContext`]. There is no global
//! instance; tests and multi-server applications build as many contexts as
//! they need.

use crate::config::MediaApiConfig;
use crate::factory::{CommandResultFactory, ObjectFactory, ProxyKinds};
use crate::listener::{ListenerRegistry, MediaEvent};
use crate::object::{MediaObjectProxy, MediaPipeline};
use crate::pool::ConnectionPool;
use crate::reference::MediaObjectRef;
use crate::transport::MediaServerConnector;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// Cheaply cloneable bundle of the shared client state
#[derive(Clone)]
pub struct MediaContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: MediaApiConfig,
    pool: ConnectionPool,
    listeners: Arc<ListenerRegistry>,
    objects: ObjectFactory,
    results: Arc<CommandResultFactory>,
    runtime: Handle,
}

impl MediaContext {
    /// Build a context with default factories on the current tokio runtime
    ///
    /// # Errors
    ///
    /// * `Error::ConfigError` - Invalid configuration, or not called from within a tokio runtime
    pub fn new(connector: Arc<dyn MediaServerConnector>, config: MediaApiConfig) -> Result<Self> {
        Self::builder(connector).config(config).build()
    }

    /// Start building a context
    pub fn builder(connector: Arc<dyn MediaServerConnector>) -> MediaContextBuilder {
        MediaContextBuilder {
            connector,
            config: MediaApiConfig::default(),
            listeners: None,
            kinds: None,
            results: None,
            runtime: None,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &MediaApiConfig {
        &self.inner.config
    }

    /// Connection pool
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Listener registry
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    /// Proxy factory and live arena
    pub fn objects(&self) -> &ObjectFactory {
        &self.inner.objects
    }

    /// Command result decoders
    pub fn results(&self) -> &CommandResultFactory {
        &self.inner.results
    }

    /// Runtime that completes non-blocking operations
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Resolve a reference to its live proxy
    pub fn resolve(&self, reference: MediaObjectRef) -> Result<Arc<dyn MediaObjectProxy>> {
        self.inner.objects.resolve(self, reference)
    }

    /// Resolve a reference to a proxy of type `P`
    pub fn resolve_as<P: MediaObjectProxy>(&self, reference: MediaObjectRef) -> Result<Arc<P>> {
        self.inner.objects.resolve_as::<P>(self, reference)
    }

    /// Resolve a pipeline by id
    pub fn pipeline(&self, id: impl Into<String>) -> Result<Arc<MediaPipeline>> {
        self.resolve_as::<MediaPipeline>(MediaObjectRef::pipeline(id))
    }

    /// Entry point for the event-ingestion channel
    ///
    /// Returns `false` when the event matched no registered subscription.
    pub fn dispatch_event(&self, source: &MediaObjectRef, token: &str, event: &MediaEvent) -> bool {
        self.inner.listeners.dispatch(source, token, event)
    }
}

impl fmt::Debug for MediaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaContext")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("listeners", &self.inner.listeners)
            .field("objects", &self.inner.objects)
            .finish()
    }
}

/// Builder for [`MediaContext`]
///
/// The listener registry, proxy kind table and result decoders may be
/// shared between contexts by passing the same `Arc` to several builders.
/// The arena of live proxies always belongs to the context being built.
pub struct MediaContextBuilder {
    connector: Arc<dyn MediaServerConnector>,
    config: MediaApiConfig,
    listeners: Option<Arc<ListenerRegistry>>,
    kinds: Option<Arc<ProxyKinds>>,
    results: Option<Arc<CommandResultFactory>>,
    runtime: Option<Handle>,
}

impl MediaContextBuilder {
    /// Set the configuration
    pub fn config(mut self, config: MediaApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing listener registry
    pub fn listeners(mut self, listeners: Arc<ListenerRegistry>) -> Self {
        self.listeners = Some(listeners);
        self
    }

    /// Use an existing proxy kind table
    pub fn kinds(mut self, kinds: Arc<ProxyKinds>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Use an existing command result factory
    pub fn results(mut self, results: Arc<CommandResultFactory>) -> Self {
        self.results = Some(results);
        self
    }

    /// Complete non-blocking operations on this runtime
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate the configuration and assemble the context
    pub fn build(self) -> Result<MediaContext> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                Error::ConfigError(format!(
                    "No runtime given and none is current: {}",
                    e
                ))
            })?,
        };

        info!(
            "Media context ready: {} connections per flavor, events to {}:{}",
            self.config.max_connections, self.config.handler_address, self.config.handler_port
        );

        Ok(MediaContext {
            inner: Arc::new(ContextInner {
                pool: ConnectionPool::new(self.connector, &self.config),
                config: self.config,
                listeners: self.listeners.unwrap_or_default(),
                objects: ObjectFactory::with_kinds(self.kinds.unwrap_or_default()),
                results: self.results.unwrap_or_default(),
                runtime,
            }),
        })
    }
}

impl fmt::Debug for MediaContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaContextBuilder")
            .field("config", &self.config)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}
