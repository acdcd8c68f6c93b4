//! A narrow `on`/`once`/`off`/`emit` surface, standing in for a
//! multi-schema event-emitter inheritance hierarchy with one flat,
//! generic broadcast type.
//!
//! Each `transit` component that needs to notify listeners (the
//! connection controller's lifecycle/message/error events) owns one of
//! these rather than inheriting from a shared emitter base class. It is
//! deliberately small: no wildcard subscriptions, no per-event-name
//! dispatch table -- those concerns belong to `Emitter`'s channel
//! handler maps, not here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Handle returned by [`Observer::on`]/[`Observer::once`], usable with
/// [`Observer::off`] to remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum Slot<E> {
    Persistent(Box<dyn Fn(&E) + Send + Sync>),
    Once(Mutex<Option<Box<dyn FnOnce(&E) + Send>>>),
}

/// A single-event-type broadcast point with listener add/remove.
pub struct Observer<E> {
    listeners: Mutex<Vec<(ListenerId, Slot<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for Observer<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<E> Observer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a listener invoked on every future `emit`.
    pub fn on(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = self.allocate_id();
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, Slot::Persistent(Box::new(handler))));
        id
    }

    /// Registers a listener invoked at most once, then automatically
    /// removed.
    pub fn once(&self, handler: impl FnOnce(&E) + Send + 'static) -> ListenerId {
        let id = self.allocate_id();
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, Slot::Once(Mutex::new(Some(Box::new(handler))))));
        id
    }

    /// Removes a previously registered listener. No-op if already fired
    /// (for `once`) or already removed.
    pub fn off(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    /// Returns the number of listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Invokes every registered listener with `event`, in registration
    /// order, then drops any `once` listeners that fired.
    pub fn emit(&self, event: &E) {
        let mut guard = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut fired_once = Vec::new();
        for (id, slot) in guard.iter() {
            match slot {
                Slot::Persistent(f) => f(event),
                Slot::Once(cell) => {
                    let taken = cell
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .take();
                    if let Some(f) = taken {
                        f(event);
                        fired_once.push(*id);
                    }
                }
            }
        }
        if !fired_once.is_empty() {
            guard.retain(|(id, _)| !fired_once.contains(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn persistent_listener_fires_every_emit() {
        let observer: Observer<u32> = Observer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        observer.on(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        observer.emit(&1);
        observer.emit(&2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_listener_fires_exactly_once() {
        let observer: Observer<u32> = Observer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        observer.once(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        observer.emit(&1);
        observer.emit(&2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.listener_count(), 0);
    }

    #[test]
    fn off_removes_a_listener() {
        let observer: Observer<u32> = Observer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let id = observer.on(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        observer.off(id);
        observer.emit(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
