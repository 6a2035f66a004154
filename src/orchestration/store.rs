//! In-memory stores for registered definitions and execution records

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::domain::execution::ExecutionRecord;
use crate::domain::ExecutionStatus;

/// Registered definitions keyed by id, listed in id order
pub struct DefinitionStore<T> {
    items: Arc<RwLock<BTreeMap<String, Arc<T>>>>,
}

impl<T> Clone for DefinitionStore<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> Default for DefinitionStore<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl<T> DefinitionStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when an existing definition was replaced
    pub async fn insert(&self, id: String, item: T) -> bool {
        self.items.write().await.insert(id, Arc::new(item)).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<T>> {
        self.items.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<T>> {
        self.items.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }
}

/// Shared record plus the token that stops its scheduler
pub struct ExecutionHandle<R> {
    pub record: Arc<RwLock<R>>,
    pub cancel: CancellationToken,
}

impl<R> Clone for ExecutionHandle<R> {
    fn clone(&self) -> Self {
        Self {
            record: self.record.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

pub struct ExecutionStore<R> {
    executions: Arc<RwLock<HashMap<String, ExecutionHandle<R>>>>,
}

impl<R> Clone for ExecutionStore<R> {
    fn clone(&self) -> Self {
        Self {
            executions: self.executions.clone(),
        }
    }
}

impl<R> Default for ExecutionStore<R> {
    fn default() -> Self {
        Self {
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<R: ExecutionRecord + Clone> ExecutionStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, record: R) -> ExecutionHandle<R> {
        let handle = ExecutionHandle {
            record: Arc::new(RwLock::new(record)),
            cancel: CancellationToken::new(),
        };
        let id = handle.record.read().await.execution_id().to_string();
        self.executions.write().await.insert(id, handle.clone());
        handle
    }

    pub async fn handle(&self, execution_id: &str) -> Option<ExecutionHandle<R>> {
        self.executions.read().await.get(execution_id).cloned()
    }

    pub async fn snapshot(&self, execution_id: &str) -> Option<R> {
        let handle = self.handle(execution_id).await?;
        let record = handle.record.read().await;
        Some(record.clone())
    }

    /// Flip a pending or running execution to `Cancelled` and stop its
    /// scheduler. `None` for unknown ids, `Some(false)` when already terminal.
    pub async fn cancel(&self, execution_id: &str) -> Option<bool> {
        let handle = self.handle(execution_id).await?;
        let mut record = handle.record.write().await;
        if record.status().is_terminal() {
            return Some(false);
        }
        record.finish(ExecutionStatus::Cancelled);
        handle.cancel.cancel();
        tracing::info!(execution_id, "Execution cancelled");
        Some(true)
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkflowExecution;

    #[tokio::test]
    async fn test_definition_store_replaces() {
        let store: DefinitionStore<String> = DefinitionStore::new();
        assert!(!store.insert("a".into(), "first".into()).await);
        assert!(store.insert("a".into(), "second".into()).await);
        assert_eq!(store.get("a").await.unwrap().as_str(), "second");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_only_non_terminal() {
        let store = ExecutionStore::new();
        let handle = store
            .create(WorkflowExecution::new("e1".into(), "w1".into()))
            .await;
        handle.record.write().await.finish(ExecutionStatus::Running);

        assert_eq!(store.cancel("e1").await, Some(true));
        assert!(handle.cancel.is_cancelled());
        assert_eq!(store.cancel("e1").await, Some(false));
        assert_eq!(store.cancel("missing").await, None);

        let snapshot = store.snapshot("e1").await.unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Cancelled);
        assert!(snapshot.completed_at.is_some());
    }
}
