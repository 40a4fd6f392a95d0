//! Idempotent run admission keyed by `(project_id, chat_id)`.

use super::RunRegistry;
use crate::core::{RunKey, RunRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Outcome of [`IdempotencyIndex::resolve_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// The run id mapped to the key.
    pub run_id: String,
    /// Whether this call created the run.
    pub created: bool,
}

/// Maps idempotency keys to run ids.
///
/// The key's map entry stays locked while the run id is allocated and the
/// registry record inserted, so concurrent callers with the same key
/// serialize and exactly one of them observes `created == true`. Callers
/// with different keys only contend on shard locks.
#[derive(Debug, Default)]
pub struct IdempotencyIndex {
    keys: DashMap<RunKey, String>,
}

impl IdempotencyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the run mapped to `key`, creating it when absent.
    ///
    /// An existing mapping is returned untouched: the factory is not
    /// called and the registry is not modified.
    pub fn resolve_or_create<F>(
        &self,
        key: RunKey,
        suggested_run_id: Option<&str>,
        registry: &RunRegistry,
        factory: F,
    ) -> Admission
    where
        F: FnOnce(&str) -> RunRecord,
    {
        match self.keys.entry(key) {
            Entry::Occupied(existing) => {
                debug!(
                    project_id = %existing.key().project_id,
                    chat_id = %existing.key().chat_id,
                    run_id = %existing.get(),
                    "duplicate start collapsed into existing run"
                );
                Admission {
                    run_id: existing.get().clone(),
                    created: false,
                }
            }
            Entry::Vacant(slot) => {
                let run_id = registry.insert_with_id(suggested_run_id, factory);
                slot.insert(run_id.clone());
                Admission {
                    run_id,
                    created: true,
                }
            }
        }
    }

    /// Looks up the run mapped to `key`.
    #[must_use]
    pub fn lookup(&self, key: &RunKey) -> Option<String> {
        self.keys.get(key).map(|id| id.clone())
    }

    /// Number of mapped keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunControls, RunFlags, Seed};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn queued(key: &RunKey) -> impl FnOnce(&str) -> RunRecord + '_ {
        move |id| RunRecord::queued(id, key, Seed::default(), RunFlags::new(), RunControls::default())
    }

    #[test]
    fn test_duplicate_key_returns_existing_run() {
        let index = IdempotencyIndex::new();
        let registry = RunRegistry::new();
        let key = RunKey::new("p1", "c1");

        let first = index.resolve_or_create(key.clone(), Some("run_p1_c1"), &registry, queued(&key));
        assert!(first.created);
        assert_eq!(first.run_id, "run_p1_c1");

        let second = index.resolve_or_create(key.clone(), Some("run_other"), &registry, |_| {
            panic!("factory must not run for a known key")
        });
        assert!(!second.created);
        assert_eq!(second.run_id, first.run_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_get_distinct_runs() {
        let index = IdempotencyIndex::new();
        let registry = RunRegistry::new();
        let a = RunKey::new("p1", "c1");
        let b = RunKey::new("p1", "c2");

        let ra = index.resolve_or_create(a.clone(), None, &registry, queued(&a));
        let rb = index.resolve_or_create(b.clone(), None, &registry, queued(&b));
        assert_ne!(ra.run_id, rb.run_id);
        assert_eq!(index.lookup(&b), Some(rb.run_id));
    }

    #[test]
    fn test_suggested_id_collision_across_keys() {
        let index = IdempotencyIndex::new();
        let registry = RunRegistry::new();
        let a = RunKey::new("p1", "c1");
        let b = RunKey::new("p2", "c1");

        let ra = index.resolve_or_create(a.clone(), Some("shared"), &registry, queued(&a));
        let rb = index.resolve_or_create(b.clone(), Some("shared"), &registry, queued(&b));
        assert_eq!(ra.run_id, "shared");
        assert_ne!(rb.run_id, "shared");
        assert_eq!(registry.get("shared").unwrap().project_id, "p1");
    }

    #[test]
    fn test_concurrent_same_key_creates_once() {
        const CALLERS: usize = 16;
        let index = Arc::new(IdempotencyIndex::new());
        let registry = Arc::new(RunRegistry::new());
        let created = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let index = index.clone();
                let registry = registry.clone();
                let created = created.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let key = RunKey::new("p1", "c1");
                    barrier.wait();
                    let admission = index.resolve_or_create(key.clone(), None, &registry, |id| {
                        created.fetch_add(1, Ordering::SeqCst);
                        RunRecord::queued(id, &key, Seed::default(), RunFlags::new(), RunControls::default())
                    });
                    admission.run_id
                })
            })
            .collect();

        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }
}
