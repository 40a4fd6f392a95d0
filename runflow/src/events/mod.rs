//! Per-run event streams.
//!
//! The [`EventBus`] owns one bounded channel per run. Producers publish
//! through an [`EventSink`]; one consumer at a time drains a channel with
//! [`EventBus::subscribe`] until the terminal event.

mod bus;
mod sink;

pub use bus::{ChannelMetrics, EventBus, EventChannel, DEFAULT_CHANNEL_CAPACITY};
pub use sink::{CollectingEventSink, EventSink, NoOpEventSink, RunEmitter};
