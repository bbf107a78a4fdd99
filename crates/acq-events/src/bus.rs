use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::ListenerError;

/// Priority used when a listener registers without one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Receives events of type `E`.
///
/// Closures `Fn(&E) -> Result<(), ListenerError>` implement this trait, so
/// most listeners never need a named type.
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E) -> Result<(), ListenerError>;
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &E) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Handle returned by [`EventBus::register`], used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Outcome of one [`EventBus::publish`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Listeners the event was handed to.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failures: Vec<(ListenerId, ListenerError)>,
}

impl PublishReport {
    /// Returns `true` if every listener handled the event.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Registration<E> {
    id: ListenerId,
    priority: i32,
    listener: Arc<dyn Listener<E>>,
}

struct Registry<E> {
    /// Kept sorted by priority; ties stay in registration order.
    entries: Vec<Registration<E>>,
    next_id: u64,
}

/// Synchronous publish/subscribe with priority ordering.
///
/// - Lower priority values are delivered first; equal priorities are
///   delivered in registration order.
/// - `publish` runs every listener on the calling thread before returning.
/// - A listener that returns an error or panics is logged and skipped; the
///   rest still receive the event and `publish` itself never fails.
/// - The registry lock is released before listeners run, so a listener may
///   register, unregister, or publish without deadlocking. Changes made
///   during delivery apply from the next `publish`.
pub struct EventBus<E> {
    registry: RwLock<Registry<E>>,
}

impl<E> EventBus<E> {
    /// Create a bus with no listeners.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                entries: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Register a listener at the given priority.
    pub fn register(&self, listener: Arc<dyn Listener<E>>, priority: i32) -> ListenerId {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;

        let at = registry
            .entries
            .partition_point(|entry| entry.priority <= priority);
        registry.entries.insert(
            at,
            Registration {
                id,
                priority,
                listener,
            },
        );
        debug!(%id, priority, "listener registered");
        id
    }

    /// Register a listener at [`DEFAULT_PRIORITY`].
    pub fn register_default(&self, listener: Arc<dyn Listener<E>>) -> ListenerId {
        self.register(listener, DEFAULT_PRIORITY)
    }

    /// Remove a listener. Returns `false` if it was not registered; calling
    /// this twice is harmless.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let before = registry.entries.len();
        registry.entries.retain(|entry| entry.id != id);
        let removed = registry.entries.len() != before;
        if removed {
            debug!(%id, "listener unregistered");
        }
        removed
    }

    /// Deliver `event` to every registered listener, in priority order.
    pub fn publish(&self, event: &E) -> PublishReport {
        let snapshot: Vec<(ListenerId, Arc<dyn Listener<E>>)> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .entries
                .iter()
                .map(|entry| (entry.id, Arc::clone(&entry.listener)))
                .collect()
        };

        let mut report = PublishReport {
            delivered: snapshot.len(),
            failures: Vec::new(),
        };
        for (id, listener) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(payload) => ListenerError::Panicked(panic_message(payload.as_ref())),
            };
            warn!(%id, error = %failure, "event listener failed; continuing delivery");
            report.failures.push((id, failure));
        }
        report
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
