//! Marker locations
//!
//! A location is a 1-based row/column range plus an optional metadata block.
//! Rows at or below zero mark a location as unset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker id -> location
pub type LocationMap = BTreeMap<String, Location>;

/// Side-channel flags produced by a coordinate transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationMeta {
    /// The start row fell inside a deleted span
    pub start_was_deleted: bool,
    /// The end row fell inside a deleted span
    pub end_was_deleted: bool,
}

impl LocationMeta {
    pub fn has_deleted_endpoint(&self) -> bool {
        self.start_was_deleted || self.end_was_deleted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub start_row: i64,
    pub start_col: i64,
    pub end_row: i64,
    pub end_col: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<LocationMeta>,
}

impl Location {
    pub fn new(start_row: i64, start_col: i64, end_row: i64, end_col: i64) -> Self {
        Self {
            start_row,
            start_col,
            end_row,
            end_col,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: LocationMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn is_valid(&self) -> bool {
        is_valid_location(Some(self))
    }

    /// True when the metadata flags an endpoint that landed in deleted text
    pub fn has_deleted_endpoint(&self) -> bool {
        self.meta.is_some_and(|m| m.has_deleted_endpoint())
    }

    /// Compares the four bounds, ignoring metadata
    pub fn same_bounds(&self, other: &Location) -> bool {
        self.start_row == other.start_row
            && self.start_col == other.start_col
            && self.end_row == other.end_row
            && self.end_col == other.end_col
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.same_bounds(other)
    }
}

impl Eq for Location {}

/// A missing location is never valid
pub fn is_valid_location(location: Option<&Location>) -> bool {
    location.is_some_and(|l| l.start_row > 0)
}
