use async_trait::async_trait;
use bulkflow_types::{LogEntry, Stage, StageSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate log entry ID: {0}")]
    DuplicateId(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("store unavailable")]
    Unavailable,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAITS
// ═══════════════════════════════════════════════════════════════════════════

/// Append-only audit trail
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one entry; entries are never updated afterwards
    async fn append(&self, entry: &LogEntry) -> Result<(), StoreError>;

    /// Entries of an operation in append order
    async fn list_for_operation(&self, operation_id: &str) -> Result<Vec<LogEntry>, StoreError>;
}

/// Latest snapshot per (operation, stage)
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot for the snapshot's stage
    async fn save(&self, snapshot: &StageSnapshot) -> Result<(), StoreError>;

    async fn load(
        &self,
        operation_id: &str,
        stage: Stage,
    ) -> Result<Option<StageSnapshot>, StoreError>;

    /// Stages with a snapshot, in lifecycle order
    async fn list_stages(&self, operation_id: &str) -> Result<Vec<Stage>, StoreError>;

    /// Drop the snapshot of one stage, returning whether it existed
    async fn delete_stage(&self, operation_id: &str, stage: Stage) -> Result<bool, StoreError>;

    /// Drop every snapshot of an operation, returning how many were removed
    async fn delete_operation(&self, operation_id: &str) -> Result<usize, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct InMemoryStore {
    logs: Arc<RwLock<Vec<LogEntry>>>,
    snapshots: Arc<RwLock<HashMap<String, BTreeMap<Stage, StageSnapshot>>>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable` until reset, to
    /// exercise fallback paths
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of log entries across all operations
    pub fn log_count(&self) -> usize {
        self.read_logs().len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.read_snapshots().values().map(BTreeMap::len).sum()
    }

    /// Clear all data
    pub fn clear(&self) {
        self.write_logs().clear();
        self.write_snapshots().clear();
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn read_logs(&self) -> RwLockReadGuard<'_, Vec<LogEntry>> {
        self.logs.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_logs(&self) -> RwLockWriteGuard<'_, Vec<LogEntry>> {
        self.logs.write().unwrap_or_else(|p| p.into_inner())
    }

    fn read_snapshots(
        &self,
    ) -> RwLockReadGuard<'_, HashMap<String, BTreeMap<Stage, StageSnapshot>>> {
        self.snapshots.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_snapshots(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<String, BTreeMap<Stage, StageSnapshot>>> {
        self.snapshots.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl LogStore for InMemoryStore {
    async fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.check_available()?;
        let mut logs = self.write_logs();
        if logs.iter().any(|e| e.id == entry.id) {
            return Err(StoreError::DuplicateId(entry.id.to_string()));
        }
        logs.push(entry.clone());
        Ok(())
    }

    async fn list_for_operation(&self, operation_id: &str) -> Result<Vec<LogEntry>, StoreError> {
        self.check_available()?;
        Ok(self
            .read_logs()
            .iter()
            .filter(|e| e.operation_id() == operation_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn save(&self, snapshot: &StageSnapshot) -> Result<(), StoreError> {
        self.check_available()?;
        self.write_snapshots()
            .entry(snapshot.operation_id.clone())
            .or_default()
            .insert(snapshot.stage, snapshot.clone());
        Ok(())
    }

    async fn load(
        &self,
        operation_id: &str,
        stage: Stage,
    ) -> Result<Option<StageSnapshot>, StoreError> {
        self.check_available()?;
        Ok(self
            .read_snapshots()
            .get(operation_id)
            .and_then(|stages| stages.get(&stage))
            .cloned())
    }

    async fn list_stages(&self, operation_id: &str) -> Result<Vec<Stage>, StoreError> {
        self.check_available()?;
        Ok(self
            .read_snapshots()
            .get(operation_id)
            .map(|stages| stages.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn delete_stage(&self, operation_id: &str, stage: Stage) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .write_snapshots()
            .get_mut(operation_id)
            .and_then(|stages| stages.remove(&stage))
            .is_some())
    }

    async fn delete_operation(&self, operation_id: &str) -> Result<usize, StoreError> {
        self.check_available()?;
        Ok(self
            .write_snapshots()
            .remove(operation_id)
            .map(|stages| stages.len())
            .unwrap_or(0))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bulkflow_types::{
        ContextSummary, LogCategory, LogDetails, LogLevel, LogMetadata, StageEntry,
    };
    use chrono::Utc;

    pub(crate) fn entry(operation_id: &str, stage: Stage) -> LogEntry {
        LogEntry::new(
            LogLevel::Info,
            LogCategory::Operation,
            format!("Starting {stage}"),
            ContextSummary::new(operation_id),
            LogMetadata {
                operation_id: operation_id.to_string(),
                stage: Some(stage),
                ..Default::default()
            },
            LogDetails::StageStarted { stage },
        )
    }

    pub(crate) fn snapshot(operation_id: &str, stage: Stage, next_sequence: u64) -> StageSnapshot {
        StageSnapshot {
            operation_id: operation_id.to_string(),
            stage,
            resources: Vec::new(),
            entries: vec![StageEntry {
                stage,
                watermark: 0,
                entered_at: Utc::now(),
            }],
            next_sequence,
            taken_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_logs_filtered_by_operation_in_order() {
        let store = InMemoryStore::new();
        let first = entry("op-1", Stage::Validation);
        let second = entry("op-1", Stage::Preparation);

        store.append(&first).await.unwrap();
        store.append(&entry("op-2", Stage::Validation)).await.unwrap();
        store.append(&second).await.unwrap();

        let entries = store.list_for_operation("op-1").await.unwrap();
        assert_eq!(entries, vec![first, second]);
        assert_eq!(store.log_count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_entry_rejected() {
        let store = InMemoryStore::new();
        let e = entry("op-1", Stage::Validation);
        store.append(&e).await.unwrap();
        assert!(matches!(
            store.append(&e).await,
            Err(StoreError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_upsert_and_listing() {
        let store = InMemoryStore::new();
        store
            .save(&snapshot("op-1", Stage::CampaignCreation, 1))
            .await
            .unwrap();
        store
            .save(&snapshot("op-1", Stage::Validation, 0))
            .await
            .unwrap();
        store
            .save(&snapshot("op-1", Stage::CampaignCreation, 5))
            .await
            .unwrap();

        let latest = store
            .load("op-1", Stage::CampaignCreation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.next_sequence, 5);
        assert_eq!(
            store.list_stages("op-1").await.unwrap(),
            vec![Stage::Validation, Stage::CampaignCreation]
        );

        assert_eq!(store.delete_operation("op-1").await.unwrap(), 2);
        assert!(store.load("op-1", Stage::Validation).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.append(&entry("op-1", Stage::Validation)).await,
            Err(StoreError::Unavailable)
        ));

        store.set_unavailable(false);
        store.append(&entry("op-1", Stage::Validation)).await.unwrap();
    }
}
