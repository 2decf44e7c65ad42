use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

/// Trait implemented by payload types that can be carried on a topic.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Listener<E>)>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
    fn contains(&self, id: u64) -> bool;
}

impl<E: Event> Detach for Listeners<E> {
    fn detach(&self, id: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.read().iter().any(|(entry_id, _)| *entry_id == id)
    }
}

/// Synchronous typed publish/subscribe point owned by one entity.
///
/// Listeners run on the emitting thread, in subscription order. The listener
/// list is copied out before delivery, so a listener may subscribe,
/// unsubscribe or emit on the same topic without deadlocking.
pub struct Topic<E: Event> {
    inner: Arc<Listeners<E>>,
}

impl<E: Event> Default for Topic<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> std::fmt::Debug for Topic<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E: Event> Topic<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Listeners {
                next_id: AtomicU64::new(1),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.write().push((id, Arc::new(listener)));
        let topic: Weak<dyn Detach> = Arc::downgrade(&self.inner) as Weak<dyn Detach>;
        Subscription {
            id,
            topic,
            armed: true,
        }
    }

    /// Deliver `event` to every current listener. Returns how many ran.
    pub fn emit(&self, event: &E) -> usize {
        let listeners: Vec<Listener<E>> = self
            .inner
            .entries
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &listeners {
            listener(event);
        }
        trace!(listeners = listeners.len(), ?event, "topic emit");
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Bridge the topic into an async receiver for consumers that live in
    /// their own task. Events are cloned into an unbounded queue; the
    /// subscription ends when the handle is dropped.
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event: &E| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }
}

/// Handle returned by [`Topic::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    topic: Weak<dyn Detach>,
    armed: bool,
}

impl Subscription {
    /// Remove the listener now. Returns false if it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.armed = false;
        self.topic
            .upgrade()
            .map(|topic| topic.detach(self.id))
            .unwrap_or(false)
    }

    /// True while the topic exists and still holds this listener.
    pub fn is_active(&self) -> bool {
        self.topic
            .upgrade()
            .map(|topic| topic.contains(self.id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(topic) = self.topic.upgrade() {
            topic.detach(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn delivers_in_subscription_order() {
        let topic = Topic::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = Arc::clone(&seen);
            topic.subscribe(move |value| seen.lock().push(("first", *value)))
        };
        let second = {
            let seen = Arc::clone(&seen);
            topic.subscribe(move |value| seen.lock().push(("second", *value)))
        };

        assert_eq!(topic.emit(&7), 2);
        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
        drop((first, second));
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let topic = Topic::<u32>::new();
        let hits = Arc::new(AtomicU64::new(0));
        let sub = {
            let hits = Arc::clone(&hits);
            topic.subscribe(move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            })
        };
        topic.emit(&1);
        drop(sub);
        topic.emit(&2);

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(topic.listener_count(), 0);
    }

    #[test]
    fn explicit_unsubscribe_reports_removal() {
        let topic = Topic::<u32>::new();
        let sub = topic.subscribe(|_| {});
        assert!(sub.is_active());
        assert!(sub.unsubscribe());
        assert_eq!(topic.listener_count(), 0);
    }

    #[test]
    fn subscription_outliving_topic_is_inert() {
        let topic = Topic::<u32>::new();
        let sub = topic.subscribe(|_| {});
        drop(topic);
        assert!(!sub.is_active());
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn listener_may_reenter_topic() {
        let topic = Arc::new(Topic::<u32>::new());
        let nested = Arc::new(Mutex::new(None));
        let _sub = {
            let topic_ref = Arc::clone(&topic);
            let nested = Arc::clone(&nested);
            topic.subscribe(move |value| {
                if *value == 0 {
                    *nested.lock() = Some(topic_ref.subscribe(|_| {}));
                    topic_ref.emit(&1);
                }
            })
        };

        topic.emit(&0);
        assert_eq!(topic.listener_count(), 2);
    }

    #[tokio::test]
    async fn channel_forwards_events() {
        let topic = Topic::<String>::new();
        let (sub, mut rx) = topic.channel();
        topic.emit(&"reset".to_string());
        topic.emit(&"add".to_string());

        assert_eq!(rx.recv().await.as_deref(), Some("reset"));
        assert_eq!(rx.recv().await.as_deref(), Some("add"));
        drop(sub);
        topic.emit(&"ignored".to_string());
        assert!(rx.recv().await.is_none());
    }
}
