//! Event Bus
//!
//! Central publish/subscribe broker for decoupled communication between the
//! ingestion side and its consumers (dashboard pages, log sinks, alerting).
//!
//! Publishes are enqueued onto a thread-safe channel and delivered by a single
//! dispatch task, so subscriber callbacks always run on one consuming context
//! regardless of which thread published. Within one publish, callbacks run in
//! registration order; across publishes delivery is FIFO.

pub mod topics;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};
use wildmatch::WildMatch;

/// Subscriber callback, invoked with the published payload
pub type Callback = Arc<dyn Fn(&serde_json::Value) + Send + Sync + 'static>;

/// A registered (id, callback) pair under one topic pattern
struct Subscriber {
    id: String,
    callback: Callback,
}

enum QueuedEvent {
    Publish {
        topic: String,
        payload: serde_json::Value,
    },
    Shutdown,
}

/// Topic-keyed publish/subscribe broker
///
/// Topic patterns may contain `*` wildcards (e.g. `sensor.*`), matched against
/// the published topic. Plain patterns match exactly.
pub struct EventBus {
    /// Topic pattern -> subscribers in registration order
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,

    /// Producer side of the dispatch queue, cloned into every publish call
    queue_tx: mpsc::UnboundedSender<QueuedEvent>,

    /// Consumer side, taken once by the dispatch loop
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            subscribers: Mutex::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        }
    }

    /// Subscribe a named callback to a topic pattern
    ///
    /// Subscribing the same id to the same pattern twice is a no-op, so a
    /// subscriber is invoked at most once per publish.
    pub fn subscribe<F>(&self, pattern: &str, id: &str, callback: F)
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let mut subs = self.subscribers.lock();
        let entries = subs.entry(pattern.to_string()).or_default();

        if entries.iter().any(|s| s.id == id) {
            trace!("Subscriber '{}' already registered for '{}'", id, pattern);
            return;
        }

        entries.push(Subscriber {
            id: id.to_string(),
            callback: Arc::new(callback),
        });
        debug!("New subscription '{}' to topic pattern '{}'", id, pattern);
    }

    /// Remove a subscription; returns false if it was not registered
    pub fn unsubscribe(&self, pattern: &str, id: &str) -> bool {
        let mut subs = self.subscribers.lock();
        let Some(entries) = subs.get_mut(pattern) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|s| s.id != id);
        before != entries.len()
    }

    /// Publish an event from any thread
    ///
    /// The payload is enqueued and delivered later on the dispatch context.
    pub fn publish(&self, topic: &str, payload: serde_json::Value) {
        let queued = QueuedEvent::Publish {
            topic: topic.to_string(),
            payload,
        };
        if self.queue_tx.send(queued).is_err() {
            trace!("Event bus closed, dropping publish to '{}'", topic);
        }
    }

    /// Publish with synchronous delivery
    ///
    /// The caller must already be on the consuming context; callbacks run
    /// before this returns.
    pub fn publish_sync(&self, topic: &str, payload: serde_json::Value) {
        self.deliver(topic, &payload);
    }

    /// Run the dispatch loop until [`EventBus::close`] is called
    ///
    /// Must be invoked at most once; this task is the consuming context on
    /// which every subscriber callback runs.
    pub async fn run(&self) {
        let Some(mut rx) = self.queue_rx.lock().take() else {
            warn!("Event bus dispatch loop already running");
            return;
        };

        debug!("Event bus dispatch loop started");
        while let Some(queued) = rx.recv().await {
            match queued {
                QueuedEvent::Publish { topic, payload } => self.deliver(&topic, &payload),
                QueuedEvent::Shutdown => break,
            }
        }
        debug!("Event bus dispatch loop stopped");
    }

    /// Spawn the dispatch loop on the current tokio runtime
    pub fn start_dispatch(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.run().await })
    }

    /// Stop the dispatch loop after draining already-queued events
    pub fn close(&self) {
        let _ = self.queue_tx.send(QueuedEvent::Shutdown);
    }

    /// Remove all subscribers from a topic pattern
    pub fn clear_topic(&self, pattern: &str) {
        self.subscribers.lock().remove(pattern);
    }

    /// Remove all subscribers from all topic patterns
    pub fn clear_all(&self) {
        self.subscribers.lock().clear();
    }

    /// List all registered topic patterns
    pub fn topics(&self) -> Vec<String> {
        self.subscribers.lock().keys().cloned().collect()
    }

    /// Number of subscribers registered under a topic pattern
    pub fn subscriber_count(&self, pattern: &str) -> usize {
        self.subscribers
            .lock()
            .get(pattern)
            .map(|e| e.len())
            .unwrap_or(0)
    }

    /// Deliver a payload to every subscriber whose pattern matches the topic
    ///
    /// A snapshot of the matching callbacks is taken under the lock and
    /// iterated outside it, so callbacks may subscribe or unsubscribe during
    /// their own invocation. Exact-pattern subscribers are delivered first,
    /// wildcard patterns after them in pattern order.
    fn deliver(&self, topic: &str, payload: &serde_json::Value) {
        let snapshot: Vec<(String, Callback)> = {
            let subs = self.subscribers.lock();

            let mut matching: Vec<(&String, &Vec<Subscriber>)> = subs
                .iter()
                .filter(|(pattern, _)| Self::topic_matches(topic, pattern))
                .collect();
            matching.sort_by_key(|(pattern, _)| (pattern.contains('*'), pattern.to_string()));

            matching
                .into_iter()
                .flat_map(|(_, entries)| entries.iter())
                .map(|s| (s.id.clone(), Arc::clone(&s.callback)))
                .collect()
        };

        for (id, callback) in snapshot {
            // A panicking subscriber must not break delivery to the others
            // nor take down the dispatch loop.
            let result = catch_unwind(AssertUnwindSafe(|| (*callback)(payload)));
            if result.is_err() {
                error!("Subscriber '{}' panicked handling topic '{}'", id, topic);
            }
        }
    }

    /// Check if a topic matches a subscription pattern
    fn topic_matches(topic: &str, pattern: &str) -> bool {
        if pattern.contains('*') {
            WildMatch::new(pattern).matches(topic)
        } else {
            topic == pattern
        }
    }
}
