//! Test doubles and helpers.
//!
//! Exposed publicly so downstream crates (the HTTP server included) can
//! exercise runs without a live generation endpoint.

mod mocks;
mod provider;

pub use mocks::{FailingStage, PanickingStage, RecordingStage};
pub use provider::{FailingRepository, ScriptedProvider};

use crate::core::RunEvent;
use futures::{Stream, StreamExt};
use std::time::Duration;

/// Drains a subscription, giving up after `limit`.
///
/// Returns whatever arrived before the deadline.
pub async fn collect_events<S>(stream: S, limit: Duration) -> Vec<RunEvent>
where
    S: Stream<Item = RunEvent>,
{
    let mut events = Vec::new();
    let mut stream = Box::pin(stream);
    let _ = tokio::time::timeout(limit, async {
        while let Some(event) = stream.next().await {
            events.push(event);
        }
    })
    .await;
    events
}

/// Event types of a list of events.
#[must_use]
pub fn event_types(events: &[RunEvent]) -> Vec<&str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}
