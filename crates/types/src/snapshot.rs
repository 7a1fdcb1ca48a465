use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RecordedResource, Stage};

/// Entry of an operation into a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    /// First resource sequence number handed out after entering the stage
    pub watermark: u64,
    pub entered_at: DateTime<Utc>,
}

/// Persisted in-memory state of one operation while it was at `stage`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub operation_id: String,
    pub stage: Stage,
    pub resources: Vec<RecordedResource>,
    pub entries: Vec<StageEntry>,
    pub next_sequence: u64,
    pub taken_at: DateTime<Utc>,
}
