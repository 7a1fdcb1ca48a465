use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of remote resource an operation creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Budget,
    Campaign,
    AdGroup,
    Keyword,
    Ad,
    Extension,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Budget => "budget",
            ResourceKind::Campaign => "campaign",
            ResourceKind::AdGroup => "ad_group",
            ResourceKind::Keyword => "keyword",
            ResourceKind::Ad => "ad",
            ResourceKind::Extension => "extension",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of a resource that exists on the remote side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Identifier assigned by the remote API
    pub remote_id: String,

    /// Display name, if the remote API returned one
    #[serde(default)]
    pub name: Option<String>,

    /// Remote id of the owning resource (campaign of an ad group, ...)
    #[serde(default)]
    pub parent_remote_id: Option<String>,

    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ResourceDescriptor {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            name: None,
            parent_remote_id: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent_remote_id: impl Into<String>) -> Self {
        self.parent_remote_id = Some(parent_remote_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// A resource mapping entry together with its creation sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResource {
    pub kind: ResourceKind,
    pub local_key: String,
    pub descriptor: ResourceDescriptor,
    /// Monotonic per-operation creation order
    pub sequence: u64,
}
