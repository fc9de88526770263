//! Generic observer registry: non-blocking fan-out of a single upstream
//! source to many listeners, keyed by an observer id so independent watches
//! of the same thing share one upstream poll/subscription
//! (`spec.md` §4.6.1, §4.4.2).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::batch::RingBuffer;

/// Default per-listener buffer depth (`spec.md` §4.6.1: "Listener channels
/// are buffered (default 10)").
pub const DEFAULT_LISTENER_CAPACITY: usize = 10;

struct ListenerSlot<T> {
    buffer: Mutex<RingBuffer<T>>,
    notify: Notify,
}

/// A listener's handle; dropping it unregisters the listener. When the last
/// listener for an observer id is dropped, the source is torn down.
pub struct Listener<T> {
    id: u64,
    observer_id: Arc<str>,
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if let Some(entry) = registry.entries.get_mut(&self.observer_id) {
            entry.listeners.remove(&self.id);
            if entry.listeners.is_empty() {
                if let Some(entry) = registry.entries.remove(&self.observer_id) {
                    if let Some(cleanup) = entry.cleanup {
                        cleanup();
                    }
                }
            }
        }
    }
}

/// Receiving half of a [`Listener`]: pulls values out of that listener's own
/// bounded ring buffer, woken whenever [`Observer::emit`] pushes a new value.
/// A listener slower than its source silently drops the oldest buffered
/// value instead of blocking the emitter or growing without bound
/// (`spec.md` §4.4.2: "non-blocking sends; a slow listener drops events").
pub struct ObserverReceiver<T> {
    slot: Arc<ListenerSlot<T>>,
}

impl<T> ObserverReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(v) = self.slot.buffer.lock().pop() {
                return Some(v);
            }
            self.slot.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`ObserverReceiver::recv`]: `None` means
    /// nothing is buffered right now, not that the source is gone.
    pub fn try_recv(&mut self) -> Option<T> {
        self.slot.buffer.lock().pop()
    }
}

struct Entry<T> {
    listeners: HashMap<u64, Arc<ListenerSlot<T>>>,
    next_listener_id: u64,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Self {
            listeners: HashMap::new(),
            next_listener_id: 0,
            cleanup: None,
        }
    }
}

struct Registry<T> {
    entries: HashMap<Arc<str>, Entry<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

/// A process-wide (per watch kind) registry of observers, keyed by the
/// observer id described in `spec.md` §4.4.2. `T` is clonable because a
/// single upstream event fans out to every registered listener.
pub struct Observer<T: Clone> {
    registry: Arc<Mutex<Registry<T>>>,
    capacity: usize,
}

impl<T: Clone> Default for Observer<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: DEFAULT_LISTENER_CAPACITY,
        }
    }
}

impl<T: Clone + Send + 'static> Observer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an observer whose listener buffers hold `capacity` values
    /// instead of the default 10.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new listener for `observer_id`. `make_source` is invoked
    /// only if this is the *first* listener for that id; it should spawn the
    /// task that will call [`Observer::emit`] and return a cleanup closure
    /// run once the last listener detaches.
    pub fn subscribe(
        &self,
        observer_id: impl Into<Arc<str>>,
        make_source: impl FnOnce() -> Box<dyn FnOnce() + Send>,
    ) -> (Listener<T>, ObserverReceiver<T>) {
        let observer_id = observer_id.into();
        let slot = Arc::new(ListenerSlot {
            buffer: Mutex::new(RingBuffer::new(self.capacity)),
            notify: Notify::new(),
        });

        let listener_id = {
            let mut registry = self.registry.lock();
            let is_new = !registry.entries.contains_key(&observer_id);
            let entry = registry.entries.entry(observer_id.clone()).or_default();
            let id = entry.next_listener_id;
            entry.next_listener_id += 1;
            entry.listeners.insert(id, slot.clone());
            if is_new {
                entry.cleanup = Some(make_source());
            }
            id
        };

        (
            Listener {
                id: listener_id,
                observer_id,
                registry: self.registry.clone(),
            },
            ObserverReceiver { slot },
        )
    }

    /// Non-blocking fan-out to every listener currently registered for
    /// `observer_id`. Each listener's own ring buffer absorbs the value,
    /// dropping its oldest buffered entry if full — one slow consumer never
    /// blocks the others or the emitter.
    pub fn emit(&self, observer_id: &str, value: T) {
        let registry = self.registry.lock();
        if let Some(entry) = registry.entries.get(observer_id) {
            for slot in entry.listeners.values() {
                slot.buffer.lock().push(value.clone());
                slot.notify.notify_one();
            }
        }
    }

    /// Whether any listener is currently registered for `observer_id`.
    pub fn has_listeners(&self, observer_id: &str) -> bool {
        self.registry
            .lock()
            .entries
            .get(observer_id)
            .map(|e| !e.listeners.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_every_listener() {
        let observer: Observer<u64> = Observer::new();
        let (_l1, mut rx1) = observer.subscribe("k", || Box::new(|| {}));
        let (_l2, mut rx2) = observer.subscribe("k", || Box::new(|| {}));

        observer.emit("k", 42);

        assert_eq!(rx1.recv().await, Some(42));
        assert_eq!(rx2.recv().await, Some(42));
    }

    #[tokio::test]
    async fn source_is_built_once_and_cleaned_up_on_last_detach() {
        let observer: Observer<u64> = Observer::new();
        let built = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let cleaned = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let make_source = {
            let built = built.clone();
            let cleaned = cleaned.clone();
            move || {
                built.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let cleaned = cleaned.clone();
                Box::new(move || {
                    cleaned.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }) as Box<dyn FnOnce() + Send>
            }
        };

        let (l1, _rx1) = observer.subscribe("k", make_source.clone());
        let (l2, _rx2) = observer.subscribe("k", make_source);

        assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(observer.has_listeners("k"));

        drop(l1);
        assert_eq!(cleaned.load(std::sync::atomic::Ordering::SeqCst), 0);
        drop(l2);
        assert_eq!(cleaned.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!observer.has_listeners("k"));
    }

    #[tokio::test]
    async fn a_full_buffer_drops_the_oldest_value() {
        let observer: Observer<u64> = Observer::with_capacity(2);
        let (_l, mut rx) = observer.subscribe("k", || Box::new(|| {}));

        observer.emit("k", 1);
        observer.emit("k", 2);
        observer.emit("k", 3);

        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
        assert_eq!(rx.try_recv(), None);
    }
}
