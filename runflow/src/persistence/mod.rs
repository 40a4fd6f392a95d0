//! Persistence capability for project documents.
//!
//! The core never owns a schema: documents are opaque JSON keyed by
//! project id. Durability lives behind [`ProjectRepository`].

use crate::errors::PersistenceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Storage for project documents.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Loads the project document, if any.
    async fn fetch(&self, project_id: &str) -> Result<Option<serde_json::Value>, PersistenceError>;

    /// Inserts or replaces the project document.
    async fn upsert(&self, project_id: &str, document: serde_json::Value) -> Result<(), PersistenceError>;
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryProjectRepository {
    documents: RwLock<HashMap<String, serde_json::Value>>,
    upserts: AtomicUsize,
}

impl InMemoryProjectRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of upserts served.
    #[must_use]
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Synchronous snapshot of a document.
    #[must_use]
    pub fn snapshot(&self, project_id: &str) -> Option<serde_json::Value> {
        self.documents.read().get(project_id).cloned()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn fetch(&self, project_id: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        Ok(self.snapshot(project_id))
    }

    async fn upsert(&self, project_id: &str, document: serde_json::Value) -> Result<(), PersistenceError> {
        self.documents.write().insert(project_id.to_string(), document);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_then_fetch() {
        let repo = InMemoryProjectRepository::new();
        assert!(repo.fetch("p1").await.unwrap().is_none());

        repo.upsert("p1", json!({"status": "generating"})).await.unwrap();
        repo.upsert("p1", json!({"status": "complete"})).await.unwrap();

        assert_eq!(repo.fetch("p1").await.unwrap(), Some(json!({"status": "complete"})));
        assert_eq!(repo.upsert_count(), 2);
    }
}
