//! Event listeners and the registry routing server-pushed events
//!
//! `MediaObject::add_listener` subscribes on the server and records the
//! returned token here; the event-ingestion channel (outside this crate)
//! calls [`ListenerRegistry::dispatch`] for every pushed event.
//!
//! # Known limitation
//!
//! `remove_listener` unsubscribes on the server before deregistering
//! locally, so no event is routed after deregistration returns. Whether the
//! server can still push an event that was in flight when it processed the
//! unsubscribe depends on the event channel's ordering; such events find no
//! entry and are dropped here.

use crate::reference::MediaObjectRef;
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Event pushed by the media server for one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEvent {
    /// Event type reported by the server (e.g. "EndOfStream")
    pub event_type: String,
    /// Opaque event payload
    pub payload: Bytes,
}

impl MediaEvent {
    /// Create an event
    pub fn new(event_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }
}

/// Application callback for media events
///
/// Invoked on whatever thread delivers the event; it may run concurrently
/// with registry mutations and with other listeners.
pub trait MediaEventListener: Send + Sync {
    /// Handle one event from `source`
    fn on_event(&self, source: &MediaObjectRef, event: &MediaEvent);
}

impl<F> MediaEventListener for F
where
    F: Fn(&MediaObjectRef, &MediaEvent) + Send + Sync,
{
    fn on_event(&self, source: &MediaObjectRef, event: &MediaEvent) {
        self(source, event)
    }
}

/// A confirmed server-side subscription
///
/// Returned by `add_listener`; pass it back to `remove_listener`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    object: MediaObjectRef,
    token: String,
}

impl Subscription {
    pub(crate) fn new(object: MediaObjectRef, token: String) -> Self {
        Self { object, token }
    }

    /// Object the subscription belongs to
    pub fn object(&self) -> &MediaObjectRef {
        &self.object
    }

    /// Server-issued token
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Registry of `(object, token) -> listener` entries
///
/// # Thread Safety
///
/// Backed by a sharded concurrent map. `add`, `remove` and `dispatch` may
/// run concurrently; listeners are invoked after their entry is cloned
/// out, without holding any shard lock.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: DashMap<Subscription, Arc<dyn MediaEventListener>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed subscription
    pub fn add(&self, subscription: Subscription, listener: Arc<dyn MediaEventListener>) {
        trace!(
            "Registering listener {} for {}",
            subscription.token,
            subscription.object
        );
        self.entries.insert(subscription, listener);
    }

    /// Remove a subscription, returning its listener if it was present
    pub fn remove(&self, subscription: &Subscription) -> Option<Arc<dyn MediaEventListener>> {
        self.entries.remove(subscription).map(|(_, listener)| listener)
    }

    /// Route one inbound event
    ///
    /// Returns `false` when no listener is registered for `(source, token)`;
    /// such events (stale or duplicate after a cancellation race) are
    /// dropped without side effects.
    pub fn dispatch(&self, source: &MediaObjectRef, token: &str, event: &MediaEvent) -> bool {
        let key = Subscription::new(source.clone(), token.to_string());
        let listener = self.entries.get(&key).map(|entry| Arc::clone(entry.value()));

        match listener {
            Some(listener) => {
                listener.on_event(source, event);
                true
            }
            None => {
                trace!(
                    "Dropping {} event for {} with unknown token {}",
                    event.event_type,
                    source,
                    token
                );
                false
            }
        }
    }

    /// Whether a subscription is registered
    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.entries.contains_key(subscription)
    }

    /// Subscriptions registered for one object
    pub fn subscriptions_of(&self, object: &MediaObjectRef) -> Vec<Subscription> {
        self.entries
            .iter()
            .filter(|entry| entry.key().object == *object)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered subscriptions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("subscriptions", &self.entries.len())
            .finish()
    }
}
