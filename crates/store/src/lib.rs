//! Persistence for the audit trail and per-stage snapshots.
//!
//! Two backends implement the same traits: [`InMemoryStore`] for tests and
//! short-lived runs, [`SqliteStore`] for durable state that survives a
//! process restart and lets an interrupted operation resume.

pub mod sqlite;
pub mod store;

pub use sqlite::*;
pub use store::*;

use bulkflow_config::StoreConfig;
use std::sync::Arc;
use tracing::info;

/// Both store roles backed by the same configured backend
#[derive(Clone)]
pub struct StoreHandle {
    pub logs: Arc<dyn LogStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl StoreHandle {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: LogStore + SnapshotStore + 'static,
    {
        Self {
            logs: store.clone(),
            snapshots: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::new()))
    }
}

/// Open the backend selected by configuration
pub async fn connect(config: &StoreConfig) -> Result<StoreHandle, StoreError> {
    match config {
        StoreConfig::Memory => {
            info!(backend = "memory", "Opening store");
            Ok(StoreHandle::in_memory())
        }
        StoreConfig::Sqlite { url } => {
            info!(backend = "sqlite", url = %url, "Opening store");
            let store = SqliteStore::connect(url).await?;
            Ok(StoreHandle::from_store(Arc::new(store)))
        }
    }
}

#[cfg(test)]
mod handle_tests {
    use super::*;
    use bulkflow_types::Stage;

    #[tokio::test]
    async fn test_connect_memory_shares_backend() {
        let handle = connect(&StoreConfig::Memory).await.unwrap();
        handle
            .snapshots
            .save(&store::tests::snapshot("op-1", Stage::Validation, 0))
            .await
            .unwrap();
        handle
            .logs
            .append(&store::tests::entry("op-1", Stage::Validation))
            .await
            .unwrap();

        assert_eq!(handle.snapshots.list_stages("op-1").await.unwrap().len(), 1);
        assert_eq!(handle.logs.list_for_operation("op-1").await.unwrap().len(), 1);
    }
}
