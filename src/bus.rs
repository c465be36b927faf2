//! Synchronous publish/subscribe over the canonical event vocabulary.
//!
//! Subscriptions are typed: `bus.on::<TranscriptUpdated>(|e| ...)` only ever sees
//! transcript payloads. Handlers run on the emitting thread, in registration order,
//! and may themselves emit or subscribe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use voice_session_types::{CanonicalEvent, Event, EventKind};

type Handler = Arc<dyn Fn(&CanonicalEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
    any: Vec<(SubscriptionId, Handler)>,
}

impl Registry {
    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    fn handlers_for(&self, kind: EventKind) -> Vec<Handler> {
        let mut handlers: Vec<&(SubscriptionId, Handler)> = self
            .by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .chain(self.any.iter())
            .collect();
        handlers.sort_by_key(|(id, _)| *id);
        handlers.into_iter().map(|(_, handler)| handler.clone()).collect()
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.len();
        self.any.retain(|(sub, _)| *sub != id);
        for handlers in self.by_kind.values_mut() {
            handlers.retain(|(sub, _)| *sub != id);
        }
        before != self.len()
    }

    fn len(&self) -> usize {
        self.any.len() + self.by_kind.values().map(Vec::len).sum::<usize>()
    }
}

/// Cloning yields another handle to the same set of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes to one event.
    pub fn on<E, F>(&self, handler: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |event: &CanonicalEvent| {
            if let Some(payload) = E::from_canonical(event) {
                handler(payload);
            }
        });
        let mut registry = self.registry();
        let id = registry.next_id();
        registry.by_kind.entry(E::KIND).or_default().push((id, handler));
        id
    }

    /// Subscribes to every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CanonicalEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = registry.next_id();
        registry.any.push((id, Arc::new(handler)));
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.registry().remove(id)
    }

    /// Forwards every event into a channel, for consumers living on a task. The
    /// subscription goes away at the first emit after the receiver is dropped.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<CanonicalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Weak, or the registry would own a handler owning the registry.
        let weak = Arc::downgrade(&self.registry);
        let mut registry = self.registry();
        let id = registry.next_id();
        let handler: Handler = Arc::new(move |event: &CanonicalEvent| {
            if tx.send(event.clone()).is_err() {
                if let Some(registry) = weak.upgrade() {
                    tracing::debug!("listener dropped, removing subscription {:?}", id);
                    EventBus { registry }.off(id);
                }
            }
        });
        registry.any.push((id, handler));
        rx
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let registry = self.registry();
        registry.by_kind.get(&kind).map_or(0, Vec::len) + registry.any.len()
    }

    pub fn emit(&self, event: impl Into<CanonicalEvent>) {
        let event = event.into();
        // Snapshot, then release the lock so handlers can reenter the bus.
        let handlers = self.registry().handlers_for(event.kind());
        tracing::trace!("emit {} to {} subscribers", event.kind().as_str(), handlers.len());
        for handler in handlers {
            handler(&event);
        }
    }
}
