//! Rendering of resolved markers
//!
//! Markdown for reading, JSON for editor integrations.

use crate::location::{Location, LocationMap};
use crate::marker::Marker;
use anyhow::Result;
use std::collections::BTreeMap;

fn range_label(location: Option<&Location>) -> String {
    match location {
        Some(l) if l.start_row == l.end_row => {
            format!("L{}:{}-{}", l.start_row, l.start_col, l.end_col)
        }
        Some(l) => format!("L{}:{}-L{}:{}", l.start_row, l.start_col, l.end_row, l.end_col),
        None => "orphaned".to_string(),
    }
}

/// Markers grouped by file with their current ranges
pub fn export_markdown(markers: &[Marker], locations: &LocationMap) -> String {
    if markers.is_empty() {
        return "# No markers found\n".to_string();
    }

    let mut by_file: BTreeMap<&str, Vec<&Marker>> = BTreeMap::new();
    for marker in markers {
        by_file.entry(marker.file_path.as_str()).or_default().push(marker);
    }

    let mut output = String::new();
    output.push_str("# Code Markers\n\n");

    for (file_path, file_markers) in by_file {
        output.push_str(&format!("## {}\n\n", file_path));

        for marker in file_markers {
            let location = locations.get(&marker.id);
            let flag = if location.is_some_and(Location::has_deleted_endpoint) {
                " (partly deleted)"
            } else {
                ""
            };

            output.push_str(&format!("### #{} {}{}\n\n", marker.id, range_label(location), flag));
            output.push_str(&marker.content);
            output.push_str("\n\n");

            let commit = &marker.commit_hash_when_created;
            output.push_str(&format!("_Created at: {}_\n\n", &commit[..7.min(commit.len())]));
        }
    }

    output
}

pub fn export_json(markers: &[Marker], locations: &LocationMap) -> Result<String> {
    #[derive(serde::Serialize)]
    struct ExportMarker<'a> {
        #[serde(flatten)]
        marker: &'a Marker,
        location: Option<&'a Location>,
    }

    let export: Vec<ExportMarker<'_>> = markers
        .iter()
        .map(|marker| ExportMarker {
            marker,
            location: locations.get(&marker.id),
        })
        .collect();

    serde_json::to_string_pretty(&export).map_err(Into::into)
}

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn export(markers: &[Marker], locations: &LocationMap, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Markdown => Ok(export_markdown(markers, locations)),
        ExportFormat::Json => export_json(markers, locations),
    }
}
