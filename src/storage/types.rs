//! Storage types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable reference to a committed object (its key within the bucket)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectReference(pub String);

impl ObjectReference {
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Temporary read URL for an object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBoxedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl TimeBoxedUrl {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// An object as held by the in-memory backend
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: bytes::Bytes,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}
