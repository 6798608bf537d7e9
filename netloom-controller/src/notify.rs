//! Process-wide notification hub.
//!
//! Every topology/state mutation is published here and fanned out to all
//! connected observers. Each subscriber owns a private bounded queue; a
//! slow subscriber loses its *oldest* pending events (freshness over
//! completeness) and never stalls the publisher or other subscribers.
//!
//! Subscribers are kept in an arena keyed by a generated id and removed
//! under a single mutation point; the handle unregisters itself on Drop,
//! which covers normal close, transport errors and task cancellation alike.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use netloom_shared::TopologyEvent;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Fan-out bus for topology events. Cheap to clone.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    subscribers: Mutex<HashMap<Uuid, Arc<SubscriberState>>>,
    capacity: usize,
}

struct SubscriberState {
    queue: Mutex<VecDeque<TopologyEvent>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Enqueue `event` for every registered subscriber. Never blocks: a full
    /// queue drops its oldest pending event instead. Delivery drops are a
    /// documented lossy-delivery property, not an error.
    pub fn publish(&self, event: TopologyEvent) {
        debug!(kind = event.kind(), "publishing event");
        let subscribers: Vec<Arc<SubscriberState>> =
            self.inner.subscribers.lock().values().cloned().collect();
        for subscriber in subscribers {
            {
                let mut queue = subscriber.queue.lock();
                if queue.len() >= self.inner.capacity {
                    queue.pop_front();
                    subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(event.clone());
            }
            subscriber.notify.notify_one();
        }
    }

    /// Register a new observer and return its queue handle.
    pub fn subscribe(&self) -> NotificationQueue {
        let id = Uuid::new_v4();
        let state = Arc::new(SubscriberState {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        self.inner.subscribers.lock().insert(id, state.clone());
        debug!(subscriber = %id, "observer subscribed");
        NotificationQueue {
            id,
            state,
            hub: self.inner.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl HubInner {
    fn unsubscribe(&self, id: Uuid) {
        // Idempotent: the handle may be dropped after the hub already
        // forgot the subscriber (e.g. during shutdown).
        if self.subscribers.lock().remove(&id).is_some() {
            debug!(subscriber = %id, "observer unsubscribed");
        }
    }
}

/// Per-subscriber bounded queue handle, owned by one transport task for
/// the lifetime of a connection.
pub struct NotificationQueue {
    id: Uuid,
    state: Arc<SubscriberState>,
    hub: Arc<HubInner>,
}

impl NotificationQueue {
    /// Wait up to `timeout` for the next event. Returns `None` as a
    /// heartbeat sentinel on expiry so transports can detect dead
    /// connections and keep streams alive.
    pub async fn recv(&self, timeout: Duration) -> Option<TopologyEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.state.queue.lock().pop_front() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = tokio::time::timeout(deadline - now, self.state.notify.notified());
            if wait.await.is_err() {
                // One last check: a publish may have raced the expiry.
                return self.state.queue.lock().pop_front();
            }
        }
    }

    /// Events dropped for this subscriber because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for NotificationQueue {
    fn drop(&mut self) {
        let dropped = self.dropped();
        if dropped > 0 {
            warn!(subscriber = %self.id, dropped, "slow observer lost events");
        }
        self.hub.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netloom_shared::topology::{ProjectInfo, ProjectStatus};

    fn sample_event(name: &str) -> TopologyEvent {
        let project_id = Uuid::nil();
        TopologyEvent::ProjectUpdated {
            project_id,
            payload: ProjectInfo {
                project_id,
                name: name.to_string(),
                status: ProjectStatus::Opened,
            },
        }
    }

    fn event_name(event: &TopologyEvent) -> String {
        match event {
            TopologyEvent::ProjectUpdated { payload, .. } => payload.name.clone(),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let hub = NotificationHub::new(DEFAULT_QUEUE_CAPACITY);
        let queue = hub.subscribe();
        hub.publish(sample_event("a"));
        hub.publish(sample_event("b"));

        let first = queue.recv(Duration::from_millis(100)).await.unwrap();
        let second = queue.recv(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event_name(&first), "a");
        assert_eq!(event_name(&second), "b");
    }

    #[tokio::test]
    async fn slow_subscriber_keeps_most_recent_events() {
        let hub = NotificationHub::new(2);
        let queue = hub.subscribe();
        for name in ["1", "2", "3", "4", "5"] {
            hub.publish(sample_event(name));
        }

        let first = queue.recv(Duration::from_millis(100)).await.unwrap();
        let second = queue.recv(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event_name(&first), "4");
        assert_eq!(event_name(&second), "5");
        assert_eq!(queue.dropped(), 3);
        // Nothing duplicated or left over.
        assert!(queue.recv(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn recv_times_out_with_heartbeat() {
        let hub = NotificationHub::new(DEFAULT_QUEUE_CAPACITY);
        let queue = hub.subscribe();
        let started = std::time::Instant::now();
        assert!(queue.recv(Duration::from_millis(20)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn recv_wakes_on_late_publish() {
        let hub = NotificationHub::new(DEFAULT_QUEUE_CAPACITY);
        let queue = hub.subscribe();
        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(sample_event("late"));
        });
        let event = queue.recv(Duration::from_secs(1)).await.unwrap();
        assert_eq!(event_name(&event), "late");
    }

    #[tokio::test]
    async fn drop_unsubscribes_exactly_once() {
        let hub = NotificationHub::new(DEFAULT_QUEUE_CAPACITY);
        let queue = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(queue);
        assert_eq!(hub.subscriber_count(), 0);
        // Publishing to an empty hub is a no-op.
        hub.publish(sample_event("x"));
    }

    #[tokio::test]
    async fn subscribers_do_not_share_queues() {
        let hub = NotificationHub::new(DEFAULT_QUEUE_CAPACITY);
        let first = hub.subscribe();
        let second = hub.subscribe();
        hub.publish(sample_event("a"));

        assert_eq!(
            event_name(&first.recv(Duration::from_millis(100)).await.unwrap()),
            "a"
        );
        assert_eq!(
            event_name(&second.recv(Duration::from_millis(100)).await.unwrap()),
            "a"
        );
    }
}
