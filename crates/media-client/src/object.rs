//! Client-side proxies for remote media objects
//!
//! A [`MediaObject`] is the local handle for one object living on the media
//! server. Every operation comes in two forms:
//!
//! - blocking (`release`, `add_listener`, ...): leases a blocking connection,
//!   waits for the reply, returns the outcome
//! - non-blocking (`release_async`, `add_listener_async`, ...): returns at
//!   once and resolves a [`Continuation`] exactly once from the runtime
//!   driving the context
//!
//! In both forms the connection is returned to the pool before any side
//! effect (cache fill, listener registration, arena deregistration) and
//! before the caller observes the outcome. A failed call has no local side
//! effects.
//!
//! # Typed proxies
//!
//! Remote kinds map to local types implementing [`MediaObjectProxy`]; the
//! [`ObjectFactory`](crate::ObjectFactory) builds them from a ready
//! `MediaObject`. [`MediaPipeline`] is the one kind this crate ships.
//!
//! # Example
//!
//! ```ignore
//! let player = ctx.resolve(MediaObjectRef::new("PlayerEndpoint", "p-1"))?;
//! let object = player.media_object();
//!
//! let subscription = object.add_listener(Arc::new(|source: &MediaObjectRef, event: &MediaEvent| {
//!     tracing::info!("{} raised {}", source, event.event_type);
//! }))?;
//!
//! let pipeline = object.get_media_pipeline()?;
//! object.remove_listener(&subscription)?;
//! object.release()?;
//! ```

use crate::command::{Command, CommandResult};
use crate::context::MediaContext;
use crate::continuation::Continuation;
use crate::listener::{MediaEventListener, Subscription};
use crate::reference::MediaObjectRef;
use crate::transport::{Request, Response, RpcError, RpcResult};
use crate::{Error, Result};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Type-erasure helpers every proxy gets for free
pub trait AsAny: Any + Send + Sync {
    /// Borrow as `Any`
    fn as_any(&self) -> &dyn Any;

    /// Convert a shared handle into a shared `Any`
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A typed local stand-in for a remote object kind
///
/// Two proxies are equal when they have the same concrete type and the
/// same remote reference; hashing is consistent with that.
pub trait MediaObjectProxy: AsAny {
    /// The generic handle backing this proxy
    fn media_object(&self) -> &MediaObject;
}

impl PartialEq for dyn MediaObjectProxy {
    fn eq(&self, other: &Self) -> bool {
        self.as_any().type_id() == other.as_any().type_id()
            && self.media_object().reference() == other.media_object().reference()
    }
}

impl Eq for dyn MediaObjectProxy {}

impl Hash for dyn MediaObjectProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.media_object().reference().hash(state);
    }
}

impl fmt::Debug for dyn MediaObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.media_object(), f)
    }
}

/// Handle to one remote media object
///
/// Cheap to clone; clones share the cached parent/pipeline and the
/// released flag.
#[derive(Clone)]
pub struct MediaObject {
    inner: Arc<ObjectInner>,
}

struct ObjectInner {
    reference: MediaObjectRef,
    ctx: MediaContext,
    parent: OnceLock<Option<MediaObjectRef>>,
    pipeline: OnceLock<MediaObjectRef>,
    released: AtomicBool,
}

impl MediaObject {
    pub(crate) fn new(reference: MediaObjectRef, ctx: MediaContext) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                reference,
                ctx,
                parent: OnceLock::new(),
                pipeline: OnceLock::new(),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Remote reference of this object
    pub fn reference(&self) -> &MediaObjectRef {
        &self.inner.reference
    }

    /// Context this object was resolved through
    pub fn context(&self) -> &MediaContext {
        &self.inner.ctx
    }

    /// Whether `release` has completed successfully on this object
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Free the remote object and all of its remote children
    ///
    /// On success the handle is marked released (further operations fail
    /// with `Error::Released`) and removed from the live arena.
    pub fn release(&self) -> Result<()> {
        self.inner.invoke(Request::Release, Response::into_unit)?;
        self.inner.mark_released();
        Ok(())
    }

    /// Non-blocking [`release`](Self::release)
    pub fn release_async(&self, cont: Continuation<()>) {
        let inner = Arc::clone(&self.inner);
        self.spawn(cont, async move {
            inner
                .invoke_async(Request::Release, Response::into_unit)
                .await?;
            inner.mark_released();
            Ok(())
        });
    }

    /// Subscribe `listener` to this object's events
    ///
    /// The listener is registered only after the server confirms the
    /// subscription; on failure nothing is registered.
    pub fn add_listener(&self, listener: Arc<dyn MediaEventListener>) -> Result<Subscription> {
        let token = self
            .inner
            .invoke(self.inner.subscribe_request(), Response::into_token)?;
        Ok(self.inner.register_listener(token, listener))
    }

    /// Non-blocking [`add_listener`](Self::add_listener)
    pub fn add_listener_async(
        &self,
        listener: Arc<dyn MediaEventListener>,
        cont: Continuation<Subscription>,
    ) {
        let inner = Arc::clone(&self.inner);
        self.spawn(cont, async move {
            let token = inner
                .invoke_async(inner.subscribe_request(), Response::into_token)
                .await?;
            Ok(inner.register_listener(token, listener))
        });
    }

    /// Cancel a subscription made through this object
    ///
    /// The registry entry is removed only after the server confirms; on
    /// failure the listener stays registered.
    pub fn remove_listener(&self, subscription: &Subscription) -> Result<()> {
        self.inner.invoke(
            Request::Unsubscribe {
                token: subscription.token().to_string(),
            },
            Response::into_unit,
        )?;
        self.inner.ctx.listeners().remove(subscription);
        Ok(())
    }

    /// Non-blocking [`remove_listener`](Self::remove_listener)
    pub fn remove_listener_async(&self, subscription: Subscription, cont: Continuation<()>) {
        let inner = Arc::clone(&self.inner);
        self.spawn(cont, async move {
            inner
                .invoke_async(
                    Request::Unsubscribe {
                        token: subscription.token().to_string(),
                    },
                    Response::into_unit,
                )
                .await?;
            inner.ctx.listeners().remove(&subscription);
            Ok(())
        });
    }

    /// Dispatch a command and decode its result
    ///
    /// # Errors
    ///
    /// * `Error::UnknownCommandType` - No result decoder registered for the command type
    /// * Transport and server failures as for every operation
    pub fn send_command(&self, command: &Command) -> Result<CommandResult> {
        let bytes = self.inner.invoke(
            Request::SendCommand(command.clone()),
            Response::into_command_result,
        )?;
        self.inner.ctx.results().decode(command.command_type(), &bytes)
    }

    /// Dispatch a command and take its result as an `R`
    pub fn send_command_as<R: Any>(&self, command: &Command) -> Result<R> {
        self.send_command(command)?.downcast::<R>()
    }

    /// Non-blocking [`send_command`](Self::send_command)
    pub fn send_command_async(&self, command: Command, cont: Continuation<CommandResult>) {
        let inner = Arc::clone(&self.inner);
        self.spawn(cont, async move {
            let command_type = command.command_type().to_string();
            let bytes = inner
                .invoke_async(Request::SendCommand(command), Response::into_command_result)
                .await?;
            inner.ctx.results().decode(&command_type, &bytes)
        });
    }

    /// Reset the object's time-to-live on the server
    pub fn keep_alive(&self) -> Result<()> {
        self.inner.invoke(Request::KeepAlive, Response::into_unit)
    }

    /// Non-blocking [`keep_alive`](Self::keep_alive)
    pub fn keep_alive_async(&self, cont: Continuation<()>) {
        let inner = Arc::clone(&self.inner);
        self.spawn(cont, async move {
            inner
                .invoke_async(Request::KeepAlive, Response::into_unit)
                .await
        });
    }

    /// Parent of this object, `None` for a root
    ///
    /// Resolved once through the server, then served from the cache.
    pub fn get_parent(&self) -> Result<Option<Arc<dyn MediaObjectProxy>>> {
        self.inner.ensure_live()?;
        if let Some(cached) = self.inner.parent.get() {
            return self.inner.resolve_optional(cached.clone());
        }

        let parent = self
            .inner
            .invoke(Request::GetParent, Response::into_reference)?;
        self.inner.settle_parent(parent)
    }

    /// Non-blocking [`get_parent`](Self::get_parent)
    pub fn get_parent_async(&self, cont: Continuation<Option<Arc<dyn MediaObjectProxy>>>) {
        let inner = Arc::clone(&self.inner);
        self.spawn(cont, async move {
            inner.ensure_live()?;
            if let Some(cached) = inner.parent.get() {
                return inner.resolve_optional(cached.clone());
            }

            let parent = inner
                .invoke_async(Request::GetParent, Response::into_reference)
                .await?;
            inner.settle_parent(parent)
        });
    }

    /// Pipeline owning this object
    ///
    /// A pipeline-kind object resolves to its own proxy without a remote
    /// call; any other object asks the server once and caches the answer.
    pub fn get_media_pipeline(&self) -> Result<Arc<MediaPipeline>> {
        if let Some(local) = self.inner.local_pipeline() {
            return local;
        }

        let pipeline = self
            .inner
            .invoke(Request::GetMediaPipeline, pipeline_reference)?;
        self.inner.settle_pipeline(pipeline)
    }

    /// Non-blocking [`get_media_pipeline`](Self::get_media_pipeline)
    pub fn get_media_pipeline_async(&self, cont: Continuation<Arc<MediaPipeline>>) {
        let inner = Arc::clone(&self.inner);
        self.spawn(cont, async move {
            if let Some(local) = inner.local_pipeline() {
                return local;
            }

            let pipeline = inner
                .invoke_async(Request::GetMediaPipeline, pipeline_reference)
                .await?;
            inner.settle_pipeline(pipeline)
        });
    }

    fn spawn<T, F>(&self, cont: Continuation<T>, operation: F)
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        // If the runtime drops the task, the continuation resolves as cancelled
        self.inner.ctx.runtime().spawn(async move {
            cont.resolve(operation.await);
        });
    }
}

impl ObjectInner {
    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::Released(format!(
                "{} has already been released",
                self.reference
            )));
        }
        Ok(())
    }

    /// Blocking call: lease, call, validate reply, return the lease, translate
    fn invoke<T, F>(&self, request: Request, extract: F) -> Result<T>
    where
        F: FnOnce(Response, &'static str) -> RpcResult<T>,
    {
        self.ensure_live()?;
        let name = request.name();
        debug!("Calling {} on {}", name, self.reference);

        let mut conn = self.ctx.pool().acquire_blocking()?;
        let outcome = conn
            .call(&self.reference, &request)
            .and_then(|response| extract(response, name));
        if let Err(e) = &outcome {
            if e.is_connection_fault() {
                conn.mark_broken();
            }
        }
        drop(conn);

        outcome.map_err(|e| self.translate(name, e))
    }

    /// Non-blocking counterpart of [`invoke`](Self::invoke)
    async fn invoke_async<T, F>(&self, request: Request, extract: F) -> Result<T>
    where
        F: FnOnce(Response, &'static str) -> RpcResult<T> + Send,
    {
        self.ensure_live()?;
        let name = request.name();
        debug!("Calling {} on {} (async)", name, self.reference);

        let mut conn = self.ctx.pool().acquire().await?;
        let outcome = conn
            .call(&self.reference, &request)
            .await
            .and_then(|response| extract(response, name));
        if let Err(e) = &outcome {
            if e.is_connection_fault() {
                conn.mark_broken();
            }
        }
        drop(conn);

        outcome.map_err(|e| self.translate(name, e))
    }

    fn translate(&self, name: &'static str, error: RpcError) -> Error {
        match &error {
            RpcError::Server { message, code } => {
                debug!(
                    "{} on {} rejected by server ({}): {}",
                    name, self.reference, code, message
                );
            }
            other => {
                warn!("{} on {} failed: {}", name, self.reference, other);
            }
        }
        Error::from(error)
    }

    fn subscribe_request(&self) -> Request {
        let config = self.ctx.config();
        Request::Subscribe {
            handler_address: config.handler_address.clone(),
            handler_port: config.handler_port,
        }
    }

    fn register_listener(
        &self,
        token: String,
        listener: Arc<dyn MediaEventListener>,
    ) -> Subscription {
        let subscription = Subscription::new(self.reference.clone(), token);
        self.ctx.listeners().add(subscription.clone(), listener);
        subscription
    }

    fn mark_released(&self) {
        self.released.store(true, Ordering::Release);
        self.ctx.objects().forget(&self.reference);
        debug!("Released {}", self.reference);
    }

    fn resolve_optional(
        &self,
        reference: Option<MediaObjectRef>,
    ) -> Result<Option<Arc<dyn MediaObjectProxy>>> {
        reference
            .map(|reference| self.ctx.resolve(reference))
            .transpose()
    }

    /// Cache a freshly fetched parent; the first successful fetch wins
    fn settle_parent(
        &self,
        parent: Option<MediaObjectRef>,
    ) -> Result<Option<Arc<dyn MediaObjectProxy>>> {
        // Resolve before caching so a factory failure leaves the cache empty
        let resolved = self.resolve_optional(parent.clone())?;
        if self.parent.get_or_init(|| parent.clone()) != &parent {
            return self.resolve_optional(self.parent.get().cloned().flatten());
        }
        Ok(resolved)
    }

    fn local_pipeline(&self) -> Option<Result<Arc<MediaPipeline>>> {
        if let Err(e) = self.ensure_live() {
            return Some(Err(e));
        }
        if self.reference.is_pipeline() {
            return Some(self.ctx.resolve_as::<MediaPipeline>(self.reference.clone()));
        }
        self.pipeline
            .get()
            .map(|cached| self.ctx.resolve_as::<MediaPipeline>(cached.clone()))
    }

    /// Cache a freshly fetched pipeline; the first successful fetch wins
    fn settle_pipeline(&self, pipeline: MediaObjectRef) -> Result<Arc<MediaPipeline>> {
        let resolved = self.ctx.resolve_as::<MediaPipeline>(pipeline.clone())?;
        let winner = self.pipeline.get_or_init(|| pipeline.clone());
        if winner != &pipeline {
            return self.ctx.resolve_as::<MediaPipeline>(winner.clone());
        }
        Ok(resolved)
    }
}

fn pipeline_reference(response: Response, request: &'static str) -> RpcResult<MediaObjectRef> {
    response.into_reference(request)?.ok_or_else(|| {
        RpcError::Protocol(format!("{} returned no pipeline", request))
    })
}

impl PartialEq for MediaObject {
    fn eq(&self, other: &Self) -> bool {
        self.inner.reference == other.inner.reference
    }
}

impl Eq for MediaObject {}

impl Hash for MediaObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.reference.hash(state);
    }
}

impl fmt::Debug for MediaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaObject")
            .field("reference", &self.inner.reference)
            .field("released", &self.is_released())
            .finish()
    }
}

impl fmt::Display for MediaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.reference, f)
    }
}

/// Proxy for the root container of a media graph
///
/// Derefs to its [`MediaObject`], so every generic operation is available.
#[derive(Debug)]
pub struct MediaPipeline {
    object: MediaObject,
}

impl MediaPipeline {
    /// Wrap a generic handle
    pub fn new(object: MediaObject) -> Self {
        Self { object }
    }

    /// A pipeline is its own pipeline; no remote call
    pub fn get_media_pipeline(self: &Arc<Self>) -> Result<Arc<MediaPipeline>> {
        self.object.inner.ensure_live()?;
        Ok(Arc::clone(self))
    }

    /// Non-blocking [`get_media_pipeline`](Self::get_media_pipeline)
    pub fn get_media_pipeline_async(self: &Arc<Self>, cont: Continuation<Arc<MediaPipeline>>) {
        let this = Arc::clone(self);
        self.object
            .spawn(cont, async move { this.get_media_pipeline() });
    }
}

impl MediaObjectProxy for MediaPipeline {
    fn media_object(&self) -> &MediaObject {
        &self.object
    }
}

impl Deref for MediaPipeline {
    type Target = MediaObject;

    fn deref(&self) -> &MediaObject {
        &self.object
    }
}
