//! Per-run ordered event channels.

use crate::core::RunEvent;
use crate::errors::EventBusError;
use async_stream::stream;
use dashmap::DashMap;
use futures::Stream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Default per-run channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Counters for one channel.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    published: AtomicU64,
    backpressure_waits: AtomicU64,
}

impl ChannelMetrics {
    /// Events accepted onto the channel.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Publishes that found the channel full and had to wait.
    #[must_use]
    pub fn backpressure_waits(&self) -> u64 {
        self.backpressure_waits.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct PublishState {
    closed: bool,
}

/// The bounded, ordered event channel of one run.
///
/// Publishes are serialized; once a terminal event is accepted the channel
/// refuses further events. The receiver is handed to one subscriber at a
/// time; a later subscriber resumes from the first undelivered event.
#[derive(Debug)]
pub struct EventChannel {
    run_id: String,
    tx: mpsc::Sender<RunEvent>,
    rx: Arc<Mutex<mpsc::Receiver<RunEvent>>>,
    publish: Mutex<PublishState>,
    drained: AtomicBool,
    metrics: ChannelMetrics,
}

impl EventChannel {
    fn new(run_id: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            run_id: run_id.into(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            publish: Mutex::new(PublishState::default()),
            drained: AtomicBool::new(false),
            metrics: ChannelMetrics::default(),
        }
    }

    /// The run this channel belongs to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Channel counters.
    #[must_use]
    pub fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }

    /// Whether a terminal event has been accepted.
    pub async fn is_closed(&self) -> bool {
        self.publish.lock().await.closed
    }

    /// Whether a subscriber has already consumed the terminal event.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }

    /// Appends an event, waiting for capacity when the channel is full.
    ///
    /// Events are never dropped.
    pub async fn publish(
        &self,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<(), EventBusError> {
        let mut state = self.publish.lock().await;
        if state.closed {
            warn!(run_id = %self.run_id, event_type = %event_type, "publish after terminal event rejected");
            return Err(EventBusError::StreamClosed(self.run_id.clone()));
        }

        let event = RunEvent::new(event_type, data);
        let terminal = event.is_terminal();
        debug!(run_id = %self.run_id, event_type = %event_type, data = %event.data, "publish");

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.metrics.backpressure_waits.fetch_add(1, Ordering::Relaxed);
                warn!(run_id = %self.run_id, "event channel full, waiting for consumer");
                self.tx
                    .send(event)
                    .await
                    .map_err(|_| EventBusError::Disconnected(self.run_id.clone()))?;
            }
            Err(TrySendError::Closed(_)) => {
                return Err(EventBusError::Disconnected(self.run_id.clone()));
            }
        }

        self.metrics.published.fetch_add(1, Ordering::Relaxed);
        if terminal {
            state.closed = true;
        }
        Ok(())
    }

    /// Returns a stream of events in publish order, ending after the
    /// terminal event.
    ///
    /// The stream waits for exclusive access to the receiver, so a second
    /// concurrent subscriber only starts once the first is dropped.
    pub fn subscribe(self: &Arc<Self>) -> impl Stream<Item = RunEvent> + Send + 'static {
        let channel = Arc::clone(self);
        stream! {
            if !channel.is_drained() {
                let mut rx = Arc::clone(&channel.rx).lock_owned().await;
                if !channel.is_drained() {
                    while let Some(event) = rx.recv().await {
                        let terminal = event.is_terminal();
                        if terminal {
                            channel.drained.store(true, Ordering::SeqCst);
                        }
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Registry of per-run event channels.
#[derive(Debug)]
pub struct EventBus {
    channels: DashMap<String, Arc<EventChannel>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus whose channels hold up to `capacity` pending events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Per-channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the run's channel, creating it on first call.
    pub fn create_stream(&self, run_id: &str) -> Arc<EventChannel> {
        self.channels
            .entry(run_id.to_string())
            .or_insert_with(|| {
                debug!(run_id = %run_id, capacity = self.capacity, "event stream created");
                Arc::new(EventChannel::new(run_id, self.capacity))
            })
            .clone()
    }

    /// Returns the run's channel when it exists.
    #[must_use]
    pub fn get(&self, run_id: &str) -> Option<Arc<EventChannel>> {
        self.channels.get(run_id).map(|c| Arc::clone(&c))
    }

    /// Whether a channel exists for the run.
    #[must_use]
    pub fn contains(&self, run_id: &str) -> bool {
        self.channels.contains_key(run_id)
    }

    /// Publishes onto the run's channel, creating it when needed.
    pub async fn publish(
        &self,
        run_id: &str,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<(), EventBusError> {
        let channel = self.create_stream(run_id);
        channel.publish(event_type, data).await
    }

    /// Subscribes to the run's channel, creating it when needed.
    pub fn subscribe(&self, run_id: &str) -> impl Stream<Item = RunEvent> + Send + 'static {
        self.create_stream(run_id).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_types as types;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    async fn collect(bus: &EventBus, run_id: &str) -> Vec<String> {
        bus.subscribe(run_id)
            .map(|e| e.event_type)
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_create_stream_is_idempotent() {
        let bus = EventBus::default();
        let a = bus.create_stream("r1");
        let b = bus.create_stream("r1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_publish_before_subscribe_is_kept_in_order() {
        let bus = EventBus::default();
        bus.publish("r1", types::RUN_STARTED, json!({})).await.unwrap();
        bus.publish("r1", types::THOUGHT, json!({"n": 1})).await.unwrap();
        bus.publish("r1", types::RUN_COMPLETED, json!({})).await.unwrap();

        assert_eq!(
            collect(&bus, "r1").await,
            vec!["run_started", "thought", "run_completed"]
        );
    }

    #[tokio::test]
    async fn test_publish_after_terminal_rejected() {
        let bus = EventBus::default();
        bus.publish("r1", types::ERROR, json!({"message": "x"})).await.unwrap();
        let err = bus.publish("r1", types::THOUGHT, json!({})).await.unwrap_err();
        assert_eq!(err, EventBusError::StreamClosed("r1".into()));
        let err = bus.publish("r1", types::RUN_COMPLETED, json!({})).await.unwrap_err();
        assert!(matches!(err, EventBusError::StreamClosed(_)));
    }

    #[tokio::test]
    async fn test_subscribe_after_drain_ends_immediately() {
        let bus = EventBus::default();
        bus.publish("r1", types::RUN_COMPLETED, json!({})).await.unwrap();
        assert_eq!(collect(&bus, "r1").await, vec!["run_completed"]);
        assert!(collect(&bus, "r1").await.is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_suspends_until_events_arrive() {
        let bus = Arc::new(EventBus::default());
        let consumer = {
            let bus = bus.clone();
            tokio::spawn(async move { collect(&bus, "r1").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        for i in 0..5 {
            bus.publish("r1", types::THOUGHT, json!({"i": i})).await.unwrap();
        }
        bus.publish("r1", types::RUN_COMPLETED, json!({})).await.unwrap();

        let seen = consumer.await.unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last().map(String::as_str), Some("run_completed"));
    }

    #[tokio::test]
    async fn test_backpressure_blocks_instead_of_dropping() {
        let bus = Arc::new(EventBus::new(2));
        bus.publish("r1", types::THOUGHT, json!({"i": 0})).await.unwrap();
        bus.publish("r1", types::THOUGHT, json!({"i": 1})).await.unwrap();

        let blocked = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish("r1", types::RUN_COMPLETED, json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        let events: Vec<RunEvent> = bus.subscribe("r1").collect().await;
        blocked.await.unwrap().unwrap();

        let indices: Vec<_> = events.iter().filter_map(|e| e.data.get("i").cloned()).collect();
        assert_eq!(indices, vec![json!(0), json!(1)]);
        assert!(events.last().is_some_and(RunEvent::is_terminal));
        let channel = bus.get("r1").unwrap();
        assert_eq!(channel.metrics().published(), 3);
        assert_eq!(channel.metrics().backpressure_waits(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_without_loss_or_duplication() {
        let bus = EventBus::default();
        for i in 0..4 {
            bus.publish("r1", types::THOUGHT, json!({"i": i})).await.unwrap();
        }

        {
            let mut first = Box::pin(bus.subscribe("r1"));
            let e0 = first.next().await.unwrap();
            let e1 = first.next().await.unwrap();
            assert_eq!(e0.data["i"], 0);
            assert_eq!(e1.data["i"], 1);
        }

        bus.publish("r1", types::RUN_COMPLETED, json!({})).await.unwrap();
        let rest: Vec<RunEvent> = bus.subscribe("r1").collect().await;
        let kinds: Vec<_> = rest.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["thought", "thought", "run_completed"]);
        assert_eq!(rest[0].data["i"], 2);
    }

    #[tokio::test]
    async fn test_second_subscriber_waits_for_first() {
        let bus = Arc::new(EventBus::default());
        bus.publish("r1", types::THOUGHT, json!({"i": 0})).await.unwrap();

        let mut first = Box::pin(bus.subscribe("r1"));
        assert_eq!(first.next().await.unwrap().data["i"], 0);

        let second = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.subscribe("r1").collect::<Vec<_>>().await })
        };
        bus.publish("r1", types::THOUGHT, json!({"i": 1})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        drop(first);
        bus.publish("r1", types::RUN_COMPLETED, json!({})).await.unwrap();
        let seen = second.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].data["i"], 1);
    }
}
