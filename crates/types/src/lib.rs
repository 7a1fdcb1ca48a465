//! Core data model shared by every bulkflow crate: stages, resource mappings,
//! failure taxonomy, categorized errors, audit log entries and snapshots.

pub mod error;
pub mod failure;
pub mod log;
pub mod resource;
pub mod snapshot;
pub mod stage;

pub use error::*;
pub use failure::*;
pub use log::*;
pub use resource::*;
pub use snapshot::*;
pub use stage::*;
