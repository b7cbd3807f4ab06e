//! Fan-out hub actor.
//!
//! # Responsibilities
//! - Own the subscriber set (one task, no shared lock)
//! - Relay each broadcast to every live subscriber outbox
//! - Evict subscribers whose outbox is full
//!
//! # Design Decisions
//! - Register, unregister and broadcast share one FIFO queue, so a broadcast
//!   reaches exactly the subscribers registered before it was enqueued
//! - Publishers `try_send`; a full queue drops the message, never blocks
//! - Drop the slow subscriber, never drop for everyone

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::HubConfig;
use crate::hub::message::Message;
use crate::observability::metrics;

pub type SubscriberId = Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("fan-out hub is not running")]
    Closed,
}

enum HubEvent {
    Register {
        id: SubscriberId,
        outbox: mpsc::Sender<Arc<Message>>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        id: SubscriberId,
    },
    Broadcast(Arc<Message>),
}

#[derive(Debug, Default)]
struct Counters {
    subscribers: AtomicUsize,
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

/// Hub counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub subscribers: usize,
    pub delivered: u64,
    pub dropped_broadcasts: u64,
    pub evicted_subscribers: u64,
}

/// Publisher and membership handle. Cheap to clone.
#[derive(Clone)]
pub struct FanoutHub {
    events: mpsc::Sender<HubEvent>,
    counters: Arc<Counters>,
    outbox_capacity: usize,
}

/// The coordinating loop; owns the subscriber set.
pub struct HubRunner {
    events: mpsc::Receiver<HubEvent>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Arc<Message>>>,
    counters: Arc<Counters>,
}

/// A registered subscriber's end of its outbox.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    outbox: mpsc::Receiver<Arc<Message>>,
}

impl FanoutHub {
    /// Build a hub handle and its (not yet running) coordinator.
    pub fn new(config: &HubConfig) -> (Self, HubRunner) {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let counters = Arc::new(Counters::default());
        let hub = Self {
            events: tx,
            counters: counters.clone(),
            outbox_capacity: config.outbox_capacity.max(1),
        };
        let runner = HubRunner {
            events: rx,
            subscribers: HashMap::new(),
            counters,
        };
        (hub, runner)
    }

    /// Build a hub and run its coordinator until `shutdown` fires.
    pub fn spawn(config: &HubConfig, shutdown: broadcast::Receiver<()>) -> (Self, JoinHandle<()>) {
        let (hub, runner) = Self::new(config);
        let handle = tokio::spawn(runner.run(shutdown));
        (hub, handle)
    }

    /// Publish an event to every current subscriber. Best-effort: never
    /// blocks, never fails; drops the event when the hub queue is full.
    pub fn broadcast(&self, kind: &str, payload: impl Serialize, source: &str) {
        match serde_json::to_value(payload) {
            Ok(data) => self.publish(Message::new(kind, data, source)),
            Err(e) => tracing::warn!(kind, source, error = %e, "Unserializable broadcast payload dropped"),
        }
    }

    /// Enqueue an already-built message.
    pub fn publish(&self, message: Message) {
        let message = Arc::new(message);
        match self.events.try_send(HubEvent::Broadcast(message.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_hub_dropped();
                tracing::warn!(kind = message.kind(), source = message.source(), "Hub queue full, broadcast dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = message.kind(), "Hub stopped, broadcast dropped");
            }
        }
    }

    /// Register a new subscriber. Resolves once the hub has added it, so every
    /// broadcast published afterwards reaches it.
    pub async fn subscribe(&self) -> Result<Subscription, HubError> {
        let (outbox_tx, outbox_rx) = mpsc::channel(self.outbox_capacity);
        let (ack_tx, ack_rx) = oneshot::channel();
        let id = Uuid::new_v4();

        self.events
            .send(HubEvent::Register {
                id,
                outbox: outbox_tx,
                ack: ack_tx,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        ack_rx.await.map_err(|_| HubError::Closed)?;

        Ok(Subscription {
            id,
            outbox: outbox_rx,
        })
    }

    /// Remove a subscriber without waiting on the hub queue. Unknown ids and
    /// a stopped hub are ignored. When the queue is full the removal is left
    /// to the next broadcast, which drops outboxes whose receiver is gone.
    pub fn unsubscribe(&self, id: SubscriberId) {
        match self.events.try_send(HubEvent::Unregister { id }) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(subscriber = %id, "Hub queue full, removal deferred to next broadcast");
            }
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.counters.subscribers.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped_broadcasts: self.counters.dropped.load(Ordering::Relaxed),
            evicted_subscribers: self.counters.evicted.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FanoutHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutHub")
            .field("stats", &self.stats())
            .field("outbox_capacity", &self.outbox_capacity)
            .finish()
    }
}

impl HubRunner {
    /// Process hub events one at a time until shutdown or until every
    /// [`FanoutHub`] handle is dropped. Closes all outboxes on exit.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Fan-out hub started");
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Fan-out hub received shutdown signal");
                    break;
                }
            }
        }

        let remaining = self.subscribers.len();
        self.subscribers.clear();
        self.update_gauge();
        tracing::info!(closed_subscribers = remaining, "Fan-out hub stopped");
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register { id, outbox, ack } => {
                self.subscribers.insert(id, outbox);
                self.update_gauge();
                tracing::debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber registered");
                let _ = ack.send(());
            }
            HubEvent::Unregister { id } => {
                if self.subscribers.remove(&id).is_some() {
                    self.update_gauge();
                    tracing::debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber unregistered");
                }
            }
            HubEvent::Broadcast(message) => self.deliver(message),
        }
    }

    fn deliver(&mut self, message: Arc<Message>) {
        let mut gone = Vec::new();
        for (id, outbox) in &self.subscribers {
            match outbox.try_send(message.clone()) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = %id, kind = message.kind(), "Subscriber outbox full, evicting");
                    self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                    metrics::record_hub_eviction();
                    gone.push(*id);
                }
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        if !gone.is_empty() {
            for id in gone {
                self.subscribers.remove(&id);
            }
            self.update_gauge();
        }
    }

    fn update_gauge(&self) {
        let count = self.subscribers.len();
        self.counters.subscribers.store(count, Ordering::Relaxed);
        metrics::record_subscribers(count);
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message; `None` once the hub has closed this outbox.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.outbox.recv().await
    }

    /// A message already queued, if any.
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        match self.outbox.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use serde_json::json;
    use std::time::Duration;

    fn config(outbox_capacity: usize) -> HubConfig {
        HubConfig {
            outbox_capacity,
            ..HubConfig::default()
        }
    }

    async fn next(sub: &mut Subscription) -> Option<Arc<Message>> {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for message")
    }

    #[tokio::test]
    async fn broadcast_reaches_only_current_subscribers() {
        let shutdown = Shutdown::new();
        let (hub, _task) = FanoutHub::spawn(&config(16), shutdown.subscribe());

        let mut a = hub.subscribe().await.unwrap();
        let mut b = hub.subscribe().await.unwrap();
        hub.broadcast("order.created", json!({"id": 1}), "test");

        let mut late = hub.subscribe().await.unwrap();
        hub.broadcast("order.created", json!({"id": 2}), "test");

        for sub in [&mut a, &mut b] {
            assert_eq!(next(sub).await.unwrap().data()["id"], 1);
            assert_eq!(next(sub).await.unwrap().data()["id"], 2);
        }
        assert_eq!(next(&mut late).await.unwrap().data()["id"], 2);
        assert!(late.try_recv().is_none());
        assert_eq!(hub.stats().delivered, 5);
    }

    #[tokio::test]
    async fn saturated_subscriber_is_evicted_without_blocking_others() {
        let shutdown = Shutdown::new();
        let (hub, _task) = FanoutHub::spawn(&config(2), shutdown.subscribe());

        let mut slow = hub.subscribe().await.unwrap();
        let mut fast = hub.subscribe().await.unwrap();

        for i in 0..3 {
            hub.broadcast("tick", i, "test");
            assert_eq!(*next(&mut fast).await.unwrap().data(), json!(i));
        }

        // The slow outbox kept what fit, then was closed.
        assert_eq!(*next(&mut slow).await.unwrap().data(), json!(0));
        assert_eq!(*next(&mut slow).await.unwrap().data(), json!(1));
        assert!(next(&mut slow).await.is_none());

        let stats = hub.stats();
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.evicted_subscribers, 1);

        hub.broadcast("tick", 3, "test");
        assert_eq!(*next(&mut fast).await.unwrap().data(), json!(3));
    }

    #[tokio::test]
    async fn full_hub_queue_drops_instead_of_blocking() {
        let hub_config = HubConfig {
            event_buffer: 1,
            ..HubConfig::default()
        };
        // Coordinator deliberately not running.
        let (hub, _runner) = FanoutHub::new(&hub_config);

        hub.broadcast("a", 1, "test");
        hub.broadcast("b", 2, "test");
        hub.broadcast("c", 3, "test");

        assert_eq!(hub.stats().dropped_broadcasts, 2);
    }

    #[tokio::test]
    async fn unsubscribe_and_dropped_subscriptions_leave_the_set() {
        let shutdown = Shutdown::new();
        let (hub, _task) = FanoutHub::spawn(&config(4), shutdown.subscribe());

        let a = hub.subscribe().await.unwrap();
        let b = hub.subscribe().await.unwrap();
        assert_eq!(hub.stats().subscribers, 2);

        hub.unsubscribe(a.id());
        hub.unsubscribe(a.id());
        drop(b);
        hub.broadcast("ping", (), "test");

        // Membership changes are applied in order; wait for the queue to drain.
        let mut witness = hub.subscribe().await.unwrap();
        hub.broadcast("ping", (), "test");
        next(&mut witness).await.unwrap();

        assert_eq!(hub.stats().subscribers, 1);
        assert_eq!(hub.stats().evicted_subscribers, 0);
    }

    #[tokio::test]
    async fn unsubscribe_never_waits_on_a_full_queue() {
        let hub_config = HubConfig {
            event_buffer: 1,
            ..HubConfig::default()
        };
        let (hub, mut runner) = FanoutHub::new(&hub_config);

        let (outbox, receiver) = mpsc::channel(4);
        let (ack, _ack_rx) = oneshot::channel();
        let id = Uuid::new_v4();
        runner.handle(HubEvent::Register { id, outbox, ack });
        let subscription = Subscription { id, outbox: receiver };

        hub.broadcast("tick", 1, "test");
        // the queue is full; this must return at once
        hub.unsubscribe(subscription.id());
        drop(subscription);

        let shutdown = Shutdown::new();
        let task = tokio::spawn(runner.run(shutdown.subscribe()));
        let mut witness = hub.subscribe().await.unwrap();
        hub.broadcast("tick", 2, "test");
        next(&mut witness).await.unwrap();

        // the deferred removal happened when the first broadcast hit the closed outbox
        assert_eq!(hub.stats().subscribers, 1);
        assert_eq!(hub.stats().evicted_subscribers, 0);

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_every_outbox() {
        let shutdown = Shutdown::new();
        let (hub, task) = FanoutHub::spawn(&config(4), shutdown.subscribe());
        let mut sub = hub.subscribe().await.unwrap();

        shutdown.trigger();
        task.await.unwrap();

        assert!(next(&mut sub).await.is_none());
        assert_eq!(hub.subscribe().await.unwrap_err(), HubError::Closed);
        assert_eq!(hub.stats().subscribers, 0);
    }
}
