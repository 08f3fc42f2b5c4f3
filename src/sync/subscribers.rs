use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};

use super::message::{MessageKind, SyncMessage};

pub type MessageHandler = Arc<dyn Fn(&SyncMessage) + Send + Sync + 'static>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<MessageKind, Vec<(u64, MessageHandler)>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<MessageKind, Vec<(u64, MessageHandler)>>> {
        match self.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn remove(&self, kind: MessageKind, id: u64) {
        let mut handlers = self.lock();
        if let Some(list) = handlers.get_mut(&kind) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                handlers.remove(&kind);
            }
        }
    }
}

/// Per-kind handler lists, invoked in registration order.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Registry>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: MessageKind, handler: MessageHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .entry(kind)
            .or_default()
            .push((id, handler));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Calls every handler registered for the message's kind. The lock is
    /// released before any handler runs, so handlers may (un)subscribe.
    pub fn dispatch(&self, message: &SyncMessage) -> usize {
        let handlers: Vec<MessageHandler> = self
            .inner
            .lock()
            .get(&message.kind())
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    pub fn len(&self, kind: MessageKind) -> usize {
        self.inner.lock().get(&kind).map_or(0, Vec::len)
    }
}

/// Capability returned by `subscribe`; removes exactly its own registration.
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<Registry>,
    kind: MessageKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::message::{PingPayload, SyncPayload};
    use chrono::Utc;

    fn ping() -> SyncMessage {
        SyncMessage::new(SyncPayload::Ping(PingPayload {}), Utc::now(), None)
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> MessageHandler {
        let log = Arc::clone(log);
        Arc::new(move |_| log.lock().unwrap().push(tag))
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe(MessageKind::Ping, recorder(&log, "first"));
        registry.subscribe(MessageKind::Ping, recorder(&log, "second"));
        registry.subscribe(MessageKind::TimerUpdate, recorder(&log, "other"));

        assert_eq!(registry.dispatch(&ping()), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_targeted() {
        let registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = registry.subscribe(MessageKind::Ping, recorder(&log, "first"));
        registry.subscribe(MessageKind::Ping, recorder(&log, "second"));

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(registry.len(MessageKind::Ping), 1);

        registry.dispatch(&ping());
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let registry = SubscriberRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicU64::new(0));

        let handler: MessageHandler = {
            let slot = Arc::clone(&slot);
            let hits = Arc::clone(&hits);
            Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(subscription) = slot.lock().unwrap().as_ref() {
                    subscription.unsubscribe();
                }
            })
        };
        *slot.lock().unwrap() = Some(registry.subscribe(MessageKind::Ping, handler));

        registry.dispatch(&ping());
        registry.dispatch(&ping());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_harmless() {
        let registry = SubscriberRegistry::new();
        let subscription = registry.subscribe(MessageKind::Ping, Arc::new(|_| {}));
        drop(registry);
        subscription.unsubscribe();
    }
}
