//! Shared fixtures for the orchestrator unit tests

use async_trait::async_trait;
use bulkflow_config::QueueConfig;
use bulkflow_queue::RequestQueue;
use bulkflow_store::InMemoryStore;
use bulkflow_types::{ApiFailure, RecordedResource, Stage, StageGraph};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::recovery::{Incident, NotifyError, OperatorChannel};
use crate::state::{Compensator, StateManager};

/// Campaign lifecycle without the preparation step
pub fn campaign_graph() -> StageGraph {
    StageGraph::linear([
        Stage::Validation,
        Stage::CampaignCreation,
        Stage::AdGroupCreation,
        Stage::KeywordCreation,
        Stage::Verification,
        Stage::Completion,
    ])
    .unwrap()
}

pub fn state_manager(
    compensator: Arc<RecordingCompensator>,
) -> (Arc<StateManager>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let state = Arc::new(StateManager::new(store.clone(), compensator));
    (state, store)
}

/// Queue with no pacing and millisecond retry delays
pub fn fast_queue(retry_limit: u32) -> RequestQueue {
    RequestQueue::new(QueueConfig {
        minimum_delay_ms: 0,
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        retry_limit,
        ..Default::default()
    })
}

/// Remembers every compensated local key; fails for the configured ones
#[derive(Default)]
pub struct RecordingCompensator {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingCompensator {
    pub fn failing_on<const N: usize>(keys: [&str; N]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compensator for RecordingCompensator {
    async fn compensate(
        &self,
        _operation_id: &str,
        resource: &RecordedResource,
    ) -> Result<(), ApiFailure> {
        self.calls.lock().unwrap().push(resource.local_key.clone());
        if self.failing.contains(&resource.local_key) {
            return Err(ApiFailure::with_status(403, "delete forbidden"));
        }
        Ok(())
    }
}

/// Operator channel that keeps every incident it is told about
#[derive(Default)]
pub struct RecordingChannel {
    incidents: Mutex<Vec<Incident>>,
}

impl RecordingChannel {
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorChannel for RecordingChannel {
    async fn notify(&self, incident: &Incident) -> Result<(), NotifyError> {
        self.incidents.lock().unwrap().push(incident.clone());
        Ok(())
    }
}
