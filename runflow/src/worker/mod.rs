//! Background execution of one run.
//!
//! A worker is the only writer of its run's record and the only publisher
//! of the run's terminal event.

mod runner;

pub use runner::{RunHandle, RunWorker, TimingObserver};
