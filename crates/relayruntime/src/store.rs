use relaycore::{OrchestratorError, StatusSnapshot, WorkflowId, WorkflowRecord};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory table of every workflow record.
///
/// Readers take snapshots; after insertion a record is written only by the
/// event processor through [`WorkflowStore::update`].
#[derive(Default)]
pub struct WorkflowStore {
    records: RwLock<HashMap<WorkflowId, WorkflowRecord>>,
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: WorkflowRecord) -> WorkflowId {
        let id = record.id;
        self.records.write().await.insert(id, record);
        id
    }

    pub async fn snapshot(&self, id: WorkflowId) -> Result<StatusSnapshot, OrchestratorError> {
        self.records
            .read()
            .await
            .get(&id)
            .map(WorkflowRecord::snapshot)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// Full copy of the record, for inspection
    pub async fn record(&self, id: WorkflowId) -> Result<WorkflowRecord, OrchestratorError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// Only the step results of the record
    pub async fn results(
        &self,
        id: WorkflowId,
    ) -> Result<HashMap<String, serde_json::Value>, OrchestratorError> {
        self.records
            .read()
            .await
            .get(&id)
            .map(|r| r.results.clone())
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// Whether the workflow has completed or halted in error
    pub async fn is_settled(&self, id: WorkflowId) -> Result<bool, OrchestratorError> {
        self.records
            .read()
            .await
            .get(&id)
            .map(WorkflowRecord::is_settled)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<StatusSnapshot> {
        let records = self.records.read().await;
        let mut snapshots: Vec<StatusSnapshot> =
            records.values().map(WorkflowRecord::snapshot).collect();
        snapshots.sort_by_key(|s| std::cmp::Reverse(s.elapsed_ms));
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub(crate) async fn remove(&self, id: WorkflowId) -> Option<WorkflowRecord> {
        self.records.write().await.remove(&id)
    }

    /// Apply `f` to one record under the write lock; `None` if the id is unknown
    pub(crate) async fn update<F, R>(&self, id: WorkflowId, f: F) -> Option<R>
    where
        F: FnOnce(&mut WorkflowRecord) -> R,
    {
        self.records.write().await.get_mut(&id).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore::{ExecutionOptions, WorkflowStatus, WorkflowType};
    use serde_json::json;
    use uuid::Uuid;

    fn record() -> WorkflowRecord {
        WorkflowRecord::new(
            WorkflowType::DataProcessing,
            json!({"source": "X"}),
            ExecutionOptions::default(),
            vec![],
        )
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = WorkflowStore::new();
        let err = store.snapshot(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
        assert!(store.record(Uuid::new_v4()).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn updates_are_visible_to_readers() {
        let store = WorkflowStore::new();
        let id = store.insert(record()).await;

        let applied = store
            .update(id, |r| {
                r.status = WorkflowStatus::Running;
                r.completed_step_labels.push("data.load_data".to_string());
            })
            .await;
        assert!(applied.is_some());
        assert!(store.update(Uuid::new_v4(), |_| ()).await.is_none());

        let snapshot = store.snapshot(id).await.unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Running);
        assert_eq!(snapshot.steps_completed, vec!["data.load_data"]);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn settled_check_follows_status() {
        let store = WorkflowStore::new();
        let id = store.insert(record()).await;
        assert!(!store.is_settled(id).await.unwrap());

        store
            .update(id, |r| {
                r.status = WorkflowStatus::Error;
                r.results.insert("data.load_data".to_string(), json!({"data": []}));
            })
            .await;
        assert!(store.is_settled(id).await.unwrap());
        assert_eq!(store.results(id).await.unwrap().len(), 1);
        assert!(matches!(
            store.is_settled(Uuid::new_v4()).await,
            Err(OrchestratorError::NotFound(_))
        ));

        assert!(store.remove(id).await.is_some());
        assert!(store.is_empty().await);
    }
}
