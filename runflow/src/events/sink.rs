//! Event sink trait and implementations.

use super::EventBus;
use crate::errors::EventBusError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Producer side of a run's event stream.
///
/// Stages and the worker publish through this trait so they never depend
/// on the bus directly.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event, waiting under back-pressure.
    async fn emit(&self, event_type: &str, data: serde_json::Value) -> Result<(), EventBusError>;
}

/// Publishes onto one run's channel of an [`EventBus`].
#[derive(Debug, Clone)]
pub struct RunEmitter {
    bus: Arc<EventBus>,
    run_id: String,
}

impl RunEmitter {
    /// Creates an emitter bound to `run_id`.
    #[must_use]
    pub fn new(bus: Arc<EventBus>, run_id: impl Into<String>) -> Self {
        Self {
            bus,
            run_id: run_id.into(),
        }
    }

    /// The bound run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

#[async_trait]
impl EventSink for RunEmitter {
    async fn emit(&self, event_type: &str, data: serde_json::Value) -> Result<(), EventBusError> {
        self.bus.publish(&self.run_id, event_type, data).await
    }
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: serde_json::Value) -> Result<(), EventBusError> {
        Ok(())
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, serde_json::Value)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: serde_json::Value) -> Result<(), EventBusError> {
        self.events.write().push((event_type.to_string(), data));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_emitter_targets_its_run() {
        let bus = Arc::new(EventBus::default());
        let emitter = RunEmitter::new(bus.clone(), "r1");
        emitter.emit("thought", json!({"m": "hi"})).await.unwrap();
        emitter.emit("run_completed", json!({})).await.unwrap();

        let events: Vec<_> = bus.subscribe("r1").collect().await;
        assert_eq!(events.len(), 2);
        assert!(!bus.contains("r2"));
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());
        sink.emit("a", json!(1)).await.unwrap();
        sink.emit("b", json!(2)).await.unwrap();
        assert_eq!(sink.event_types(), vec!["a", "b"]);
        assert_eq!(sink.len(), 2);
    }
}
