//! Scoped observer registration for variable events.
//!
//! A listener is registered with [`ListenerRegistry::subscribe`] and stays
//! registered for as long as the returned [`Subscription`] lives. Events are
//! delivered synchronously, after the registry lock has been released, so a
//! listener may subscribe or unsubscribe re-entrantly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::VariableKey;

/// Something that happened to a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableEvent {
    /// The variable's selected value changed
    ValueChanged(VariableKey),
    /// An update of the variable finished (successfully or not)
    UpdateSettled(VariableKey),
}

impl VariableEvent {
    /// Key of the variable the event is about.
    pub const fn key(&self) -> VariableKey {
        match self {
            Self::ValueChanged(key) | Self::UpdateSettled(key) => *key,
        }
    }
}

type Listener = Arc<dyn Fn(&VariableEvent) + Send + Sync>;

/// The listeners of one variable.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener` until the returned guard is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&VariableEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Deliver `event` to every current listener.
    pub fn emit(&self, event: &VariableEvent) {
        let snapshot: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Whether nobody listens.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry").field("listeners", &self.len()).finish()
    }
}

/// Guard that unregisters its listener on drop.
#[must_use = "dropping a subscription unregisters the listener"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscription_unregisters_on_drop() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let key = VariableKey::new();

        let counter = Arc::clone(&count);
        let subscription = registry.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.emit(&VariableEvent::ValueChanged(key));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(subscription);
        assert!(registry.is_empty());
        registry.emit(&VariableEvent::ValueChanged(key));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_reentrantly() {
        let registry = ListenerRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner_slot = Arc::clone(&slot);
        let subscription = registry.subscribe(move |_| {
            inner_slot.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(subscription);

        registry.emit(&VariableEvent::UpdateSettled(VariableKey::new()));
        assert!(registry.is_empty());
    }
}
