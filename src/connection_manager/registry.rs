use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::chat::RoomId;
use crate::error::TransportError;
use crate::websocket::ServerFrame;

use super::types::Disconnected;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered set of callbacks for one event class.
///
/// Dispatch follows registration order. The same closure registered twice
/// runs twice.
pub struct HandlerRegistry<T> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler<T>)>>,
}

impl<T: 'static> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler; the returned [`Subscription`] removes exactly this one
    pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(handler)));

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    fn remove(&self, id: u64) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Invoke every handler with `event`, returning how many ran.
    ///
    /// Handlers are snapshotted first, so they may subscribe or unsubscribe
    /// while being dispatched.
    pub fn emit(&self, event: &T) -> usize {
        let snapshot: Vec<Handler<T>> = self.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in &snapshot {
            handler(event);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Handler<T>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: 'static> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer returned by every `on_*` registration
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// The four event classes exposed by the connection manager
#[derive(Default)]
pub struct EventHandlers {
    pub(crate) message: Arc<HandlerRegistry<ServerFrame>>,
    pub(crate) connect: Arc<HandlerRegistry<RoomId>>,
    pub(crate) disconnect: Arc<HandlerRegistry<Disconnected>>,
    pub(crate) error: Arc<HandlerRegistry<TransportError>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = Arc::new(HandlerRegistry::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let _a = registry.subscribe(move |v| s1.lock().unwrap().push(("a", *v)));
        let s2 = seen.clone();
        let _b = registry.subscribe(move |v| s2.lock().unwrap().push(("b", *v)));

        assert_eq!(registry.emit(&7), 2);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let registry = Arc::new(HandlerRegistry::<()>::new());
        let first = counter();
        let second = counter();

        let f = first.clone();
        let sub_first = registry.subscribe(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        let _sub_second = registry.subscribe(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        sub_first.unsubscribe();
        registry.emit(&());

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_handler_twice_runs_twice() {
        let registry = Arc::new(HandlerRegistry::<()>::new());
        let calls = counter();
        let handler = {
            let calls = calls.clone();
            move |_: &()| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };

        let _a = registry.subscribe(handler.clone());
        let _b = registry.subscribe(handler);
        registry.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself_during_dispatch() {
        let registry = Arc::new(HandlerRegistry::<()>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner = slot.clone();
        let sub = registry.subscribe(move |_| {
            if let Some(sub) = inner.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        assert_eq!(registry.emit(&()), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = Arc::new(HandlerRegistry::<()>::new());
        let sub = registry.subscribe(|_| {});
        drop(registry);
        sub.unsubscribe();
    }
}
