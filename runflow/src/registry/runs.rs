//! Authoritative per-run lifecycle records.

use crate::core::{RunRecord, RunStatus};
use crate::utils::{generate_run_id, now};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

/// In-memory registry of run records.
///
/// Updates go through [`RunStatus::can_transition_to`]; anything else is
/// ignored. Updates for unknown run ids are no-ops so late callers after
/// external teardown never fail.
#[derive(Debug, Default)]
pub struct RunRegistry {
    records: DashMap<String, RunRecord>,
}

impl RunRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record under `suggested` when that id is free, otherwise
    /// under a freshly generated id. Returns the id used.
    pub(crate) fn insert_with_id<F>(&self, suggested: Option<&str>, factory: F) -> String
    where
        F: FnOnce(&str) -> RunRecord,
    {
        let mut factory = Some(factory);
        let mut candidate = suggested.map(str::to_string);
        loop {
            let id = candidate.take().unwrap_or_else(generate_run_id);
            match self.records.entry(id) {
                Entry::Vacant(slot) => {
                    let id = slot.key().clone();
                    if let Some(build) = factory.take() {
                        slot.insert(build(&id));
                    }
                    return id;
                }
                Entry::Occupied(slot) => {
                    debug!(run_id = %slot.key(), "run id already in use, generating another");
                }
            }
        }
    }

    /// Returns a snapshot of the record.
    #[must_use]
    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.records.get(run_id).map(|r| r.clone())
    }

    /// Whether the run id is known.
    #[must_use]
    pub fn contains(&self, run_id: &str) -> bool {
        self.records.contains_key(run_id)
    }

    /// `queued -> running`.
    pub fn mark_started(&self, run_id: &str) -> bool {
        self.transition(run_id, RunStatus::Running, |record| {
            record.started_at = Some(now());
        })
    }

    /// `running -> complete`.
    pub fn mark_completed(&self, run_id: &str) -> bool {
        self.transition(run_id, RunStatus::Complete, |record| {
            record.completed_at = Some(now());
        })
    }

    /// `running -> error`, recording the message.
    pub fn mark_error(&self, run_id: &str, message: impl Into<String>) -> bool {
        let message = message.into();
        self.transition(run_id, RunStatus::Error, |record| {
            record.completed_at = Some(now());
            record.error = Some(message);
        })
    }

    /// Records a stage duration on a running record.
    pub fn record_timing(&self, run_id: &str, stage: &str, duration_ms: f64) -> bool {
        let Some(mut record) = self.records.get_mut(run_id) else {
            return false;
        };
        if record.status.is_terminal() {
            warn!(run_id = %run_id, stage = %stage, "ignoring timing for terminal run");
            return false;
        }
        record.node_timings.insert(stage.to_string(), duration_ms);
        true
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn transition<F>(&self, run_id: &str, next: RunStatus, apply: F) -> bool
    where
        F: FnOnce(&mut RunRecord),
    {
        let Some(mut record) = self.records.get_mut(run_id) else {
            debug!(run_id = %run_id, status = %next, "status update for unknown run ignored");
            return false;
        };
        if !record.status.can_transition_to(next) {
            warn!(
                run_id = %run_id,
                from = %record.status,
                to = %next,
                "illegal status transition ignored"
            );
            return false;
        }
        record.status = next;
        apply(&mut record);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunControls, RunFlags, RunKey, Seed};

    fn insert(registry: &RunRegistry, suggested: Option<&str>) -> String {
        let key = RunKey::new("p1", "c1");
        registry.insert_with_id(suggested, |id| {
            RunRecord::queued(id, &key, Seed::default(), RunFlags::new(), RunControls::default())
        })
    }

    #[test]
    fn test_suggested_id_honored_when_free() {
        let registry = RunRegistry::new();
        assert_eq!(insert(&registry, Some("run_a")), "run_a");
        let second = insert(&registry, Some("run_a"));
        assert_ne!(second, "run_a");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let registry = RunRegistry::new();
        let id = insert(&registry, None);

        assert!(registry.mark_started(&id));
        assert!(registry.record_timing(&id, "spec", 12.5));
        assert!(registry.mark_completed(&id));

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, RunStatus::Complete);
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert_eq!(record.node_timings.get("spec"), Some(&12.5));
    }

    #[test]
    fn test_terminal_record_is_immutable() {
        let registry = RunRegistry::new();
        let id = insert(&registry, None);
        registry.mark_started(&id);
        registry.mark_error(&id, "boom");

        assert!(!registry.mark_completed(&id));
        assert!(!registry.mark_started(&id));
        assert!(!registry.mark_error(&id, "again"));
        assert!(!registry.record_timing(&id, "late", 1.0));

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.node_timings.is_empty());
    }

    #[test]
    fn test_cannot_skip_running() {
        let registry = RunRegistry::new();
        let id = insert(&registry, None);
        assert!(!registry.mark_completed(&id));
        assert_eq!(registry.get(&id).unwrap().status, RunStatus::Queued);
    }

    #[test]
    fn test_unknown_run_is_noop() {
        let registry = RunRegistry::new();
        assert!(!registry.mark_started("missing"));
        assert!(!registry.mark_completed("missing"));
        assert!(!registry.mark_error("missing", "x"));
        assert!(!registry.record_timing("missing", "spec", 1.0));
        assert!(registry.get("missing").is_none());
    }
}
