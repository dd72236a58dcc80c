//! Factories turning remote data into local values
//!
//! - [`ProxyKinds`] maps a remote object kind to the constructor of its
//!   typed proxy.
//! - [`ObjectFactory`] builds proxies for one context and tracks which are
//!   alive, so resolving the same reference twice yields the same instance.
//! - [`CommandResultFactory`] maps a command type tag to the decoder for its
//!   result payload.
//!
//! Both are populated at startup and shared through a
//! [`MediaContext`](crate::MediaContext).

use crate::command::CommandResult;
use crate::context::MediaContext;
use crate::object::{MediaObject, MediaObjectProxy, MediaPipeline};
use crate::reference::{MediaObjectRef, MEDIA_PIPELINE_KIND};
use crate::{Error, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

type ProxyConstructor = Arc<dyn Fn(MediaObject) -> Arc<dyn MediaObjectProxy> + Send + Sync>;

type ResultDecoder = Arc<dyn Fn(&Bytes) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// Kind tag to proxy constructor table
///
/// Holds no per-server state, so one table may back the object factories
/// of several contexts.
pub struct ProxyKinds {
    constructors: RwLock<HashMap<String, ProxyConstructor>>,
}

impl ProxyKinds {
    /// Create a table that already knows the `MediaPipeline` kind
    pub fn new() -> Self {
        let mut constructors: HashMap<String, ProxyConstructor> = HashMap::new();
        constructors.insert(
            MEDIA_PIPELINE_KIND.to_string(),
            Arc::new(|object: MediaObject| -> Arc<dyn MediaObjectProxy> {
                Arc::new(MediaPipeline::new(object))
            }),
        );
        Self {
            constructors: RwLock::new(constructors),
        }
    }

    /// Create a table with no registered kinds
    pub fn empty() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Register the proxy constructor for a remote kind
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if:
    /// - A constructor for `kind` is already registered
    /// - Failed to acquire write lock (lock poisoned)
    pub fn register<P, F>(&self, kind: impl Into<String>, constructor: F) -> Result<()>
    where
        P: MediaObjectProxy,
        F: Fn(MediaObject) -> P + Send + Sync + 'static,
    {
        let kind = kind.into();
        let mut constructors = self.constructors.write().map_err(|e| {
            Error::ConfigError(format!("Failed to acquire factory write lock: {}", e))
        })?;

        if constructors.contains_key(&kind) {
            return Err(Error::ConfigError(format!(
                "Proxy kind '{}' already registered",
                kind
            )));
        }

        debug!("Registered proxy kind '{}'", kind);
        constructors.insert(
            kind,
            Arc::new(move |object: MediaObject| -> Arc<dyn MediaObjectProxy> {
                Arc::new(constructor(object))
            }),
        );
        Ok(())
    }

    /// Registered kinds, in no particular order
    pub fn kinds(&self) -> Vec<String> {
        self.constructors
            .read()
            .ok()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn constructor(&self, reference: &MediaObjectRef) -> Result<ProxyConstructor> {
        self.constructors
            .read()
            .ok()
            .and_then(|guard| guard.get(reference.kind()).cloned())
            .ok_or_else(|| {
                Error::UnknownObjectKind(format!(
                    "no proxy registered for kind '{}' ({})",
                    reference.kind(),
                    reference
                ))
            })
    }
}

impl Default for ProxyKinds {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProxyKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyKinds")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Proxy construction plus the arena of live proxies of one context
///
/// # Thread Safety
///
/// The live arena is a sharded map of weak handles; a proxy stays in it
/// until it is released, dropped and swept, or forgotten. Proxies in the
/// arena are bound to the context that resolved them, so every context
/// owns its own factory; only the [`ProxyKinds`] table is shared.
///
/// Constructors run while the arena shard for their reference is locked
/// and must not resolve other references through the same factory.
pub struct ObjectFactory {
    kinds: Arc<ProxyKinds>,
    live: DashMap<MediaObjectRef, Weak<dyn MediaObjectProxy>>,
}

impl ObjectFactory {
    /// Create a factory that already knows the `MediaPipeline` kind
    pub fn new() -> Self {
        Self::with_kinds(Arc::new(ProxyKinds::new()))
    }

    /// Create a factory with no registered kinds
    pub fn empty() -> Self {
        Self::with_kinds(Arc::new(ProxyKinds::empty()))
    }

    /// Create a factory with an empty arena over a (possibly shared) kind table
    pub fn with_kinds(kinds: Arc<ProxyKinds>) -> Self {
        Self {
            kinds,
            live: DashMap::new(),
        }
    }

    /// Register the proxy constructor for a remote kind
    ///
    /// Registers into the kind table, so contexts sharing it see the kind too.
    pub fn register<P, F>(&self, kind: impl Into<String>, constructor: F) -> Result<()>
    where
        P: MediaObjectProxy,
        F: Fn(MediaObject) -> P + Send + Sync + 'static,
    {
        self.kinds.register(kind, constructor)
    }

    /// Registered kinds, in no particular order
    pub fn kinds(&self) -> Vec<String> {
        self.kinds.kinds()
    }

    /// Kind table backing this factory
    pub fn proxy_kinds(&self) -> &Arc<ProxyKinds> {
        &self.kinds
    }

    /// Resolve a reference to its live proxy, constructing it if needed
    ///
    /// # Errors
    ///
    /// * `Error::UnknownObjectKind` - No constructor registered for the reference's kind
    pub fn resolve(
        &self,
        ctx: &MediaContext,
        reference: MediaObjectRef,
    ) -> Result<Arc<dyn MediaObjectProxy>> {
        if let Some(existing) = self.lookup(&reference) {
            return Ok(existing);
        }

        let constructor = self.kinds.constructor(&reference)?;

        // Re-check under the shard lock: another thread may have won the race
        let proxy = match self.live.entry(reference.clone()) {
            Entry::Occupied(mut slot) => match slot.get().upgrade() {
                Some(existing) => existing,
                None => {
                    let proxy = constructor(MediaObject::new(reference, ctx.clone()));
                    slot.insert(Arc::downgrade(&proxy));
                    proxy
                }
            },
            Entry::Vacant(slot) => {
                let proxy = constructor(MediaObject::new(reference, ctx.clone()));
                slot.insert(Arc::downgrade(&proxy));
                proxy
            }
        };
        Ok(proxy)
    }

    /// Resolve a reference and downcast the proxy to `P`
    ///
    /// # Errors
    ///
    /// * `Error::UnknownObjectKind` - No constructor for the kind, or it builds a different type
    pub fn resolve_as<P: MediaObjectProxy>(
        &self,
        ctx: &MediaContext,
        reference: MediaObjectRef,
    ) -> Result<Arc<P>> {
        let label = reference.to_string();
        self.resolve(ctx, reference)?
            .into_any_arc()
            .downcast::<P>()
            .map_err(|_| {
                Error::UnknownObjectKind(format!(
                    "{} is not a {}",
                    label,
                    std::any::type_name::<P>()
                ))
            })
    }

    /// Live proxy for a reference, if one exists
    pub fn lookup(&self, reference: &MediaObjectRef) -> Option<Arc<dyn MediaObjectProxy>> {
        self.live.get(reference).and_then(|weak| weak.upgrade())
    }

    /// Drop the arena entry for a reference
    ///
    /// Returns `true` if an entry was present. Existing handles stay valid;
    /// the next `resolve` constructs a fresh proxy.
    pub fn forget(&self, reference: &MediaObjectRef) -> bool {
        self.live.remove(reference).is_some()
    }

    /// Remove entries whose proxies have been dropped, returning how many
    pub fn sweep(&self) -> usize {
        let before = self.live.len();
        self.live.retain(|_, weak| weak.strong_count() > 0);
        before.saturating_sub(self.live.len())
    }

    /// Strong handles to every live proxy
    pub fn live_objects(&self) -> Vec<Arc<dyn MediaObjectProxy>> {
        self.live
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    /// Number of arena entries (including ones not yet swept)
    pub fn tracked(&self) -> usize {
        self.live.len()
    }
}

impl Default for ObjectFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFactory")
            .field("kinds", &self.kinds())
            .field("tracked", &self.live.len())
            .finish()
    }
}

/// Decoders for command results, keyed by command type tag
pub struct CommandResultFactory {
    decoders: RwLock<HashMap<String, ResultDecoder>>,
}

impl CommandResultFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self {
            decoders: RwLock::new(HashMap::new()),
        }
    }

    /// Register a decoder for a command type
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if a decoder for `command_type` is
    /// already registered or the lock is poisoned.
    pub fn register<R, F>(&self, command_type: impl Into<String>, decoder: F) -> Result<()>
    where
        R: Any + Send + Sync,
        F: Fn(&Bytes) -> Result<R> + Send + Sync + 'static,
    {
        let command_type = command_type.into();
        let mut decoders = self.decoders.write().map_err(|e| {
            Error::ConfigError(format!("Failed to acquire factory write lock: {}", e))
        })?;

        if decoders.contains_key(&command_type) {
            return Err(Error::ConfigError(format!(
                "Command type '{}' already registered",
                command_type
            )));
        }

        decoders.insert(
            command_type,
            Arc::new(move |bytes: &Bytes| -> Result<Box<dyn Any + Send + Sync>> {
                Ok(Box::new(decoder(bytes)?))
            }),
        );
        Ok(())
    }

    /// Register a command whose result is JSON decoding to `R`
    pub fn register_json<R>(&self, command_type: impl Into<String>) -> Result<()>
    where
        R: DeserializeOwned + Any + Send + Sync,
    {
        self.register(command_type, |bytes: &Bytes| {
            serde_json::from_slice::<R>(bytes).map_err(Error::from)
        })
    }

    /// Register a command whose result is kept as raw bytes
    pub fn register_raw(&self, command_type: impl Into<String>) -> Result<()> {
        self.register(command_type, |bytes: &Bytes| Ok(bytes.clone()))
    }

    /// Whether a decoder exists for a command type
    pub fn contains(&self, command_type: &str) -> bool {
        self.decoders
            .read()
            .map(|guard| guard.contains_key(command_type))
            .unwrap_or(false)
    }

    /// Decode a raw result
    ///
    /// # Errors
    ///
    /// * `Error::UnknownCommandType` - No decoder registered for `command_type`
    /// * Any error the decoder returns (typically `Error::Serialization`)
    pub fn decode(&self, command_type: &str, bytes: &Bytes) -> Result<CommandResult> {
        let decoder = self
            .decoders
            .read()
            .ok()
            .and_then(|guard| guard.get(command_type).cloned())
            .ok_or_else(|| {
                Error::UnknownCommandType(format!(
                    "no result decoder registered for '{}'",
                    command_type
                ))
            })?;

        Ok(CommandResult::new(command_type, decoder(bytes)?))
    }
}

impl Default for CommandResultFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandResultFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<String> = self
            .decoders
            .read()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("CommandResultFactory")
            .field("command_types", &types)
            .finish()
    }
}
