//! Marker records
//!
//! Markers are owned by the storage layer; resolution only reads them.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub id: String,
    /// Commit that was checked out when the marker was placed
    pub commit_hash_when_created: String,
    pub stream_id: String,
    pub file_path: String,
    pub content: String,
}

#[cfg(test)]
impl Marker {
    pub fn new(id: &str, commit_hash_when_created: &str, stream_id: &str) -> Self {
        Self {
            id: id.to_string(),
            commit_hash_when_created: commit_hash_when_created.to_string(),
            stream_id: stream_id.to_string(),
            file_path: String::new(),
            content: String::new(),
        }
    }
}
