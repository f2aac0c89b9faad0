//! In-process coordinate transform
//!
//! Moves locations through an edit list. Rows before an edit are untouched,
//! rows after it shift by the net line change, and endpoints that land inside
//! a deleted span are snapped onto the replacement and flagged in the meta.

use crate::delta::Edit;
use crate::location::{Location, LocationMap, LocationMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Start,
    End,
}

struct Moved {
    row: i64,
    col: i64,
    deleted: bool,
}

/// Transforms every valid location; invalid ones are left out of the result
pub fn calculate_locations(locations: &LocationMap, edits: &[Edit]) -> LocationMap {
    locations
        .iter()
        .filter(|(_, location)| location.is_valid())
        .map(|(id, location)| (id.clone(), calculate_location(location, edits)))
        .collect()
}

pub fn calculate_location(location: &Location, edits: &[Edit]) -> Location {
    let start = move_point(location.start_row, location.start_col, edits, Endpoint::Start);
    let mut end = move_point(location.end_row, location.end_col, edits, Endpoint::End);

    if (end.row, end.col) < (start.row, start.col) {
        end.row = start.row;
        end.col = start.col;
    }

    let meta = LocationMeta {
        start_was_deleted: start.deleted,
        end_was_deleted: end.deleted,
    };

    let moved = Location::new(start.row, start.col, end.row, end.col);
    if meta.has_deleted_endpoint() {
        moved.with_meta(meta)
    } else {
        moved
    }
}

fn move_point(row: i64, col: i64, edits: &[Edit], endpoint: Endpoint) -> Moved {
    let mut shift: i64 = 0;

    for edit in edits {
        let del_start = i64::from(edit.del_start);
        let del_end = i64::from(edit.del_end());

        if row < del_start {
            break;
        }
        if row >= del_end {
            shift += i64::from(edit.add_length) - i64::from(edit.del_length);
            continue;
        }

        return snap_into_replacement(row - del_start, col, edit, endpoint);
    }

    Moved {
        row: row + shift,
        col,
        deleted: false,
    }
}

fn snap_into_replacement(offset: i64, col: i64, edit: &Edit, endpoint: Endpoint) -> Moved {
    let add_start = i64::from(edit.add_start);

    if let Some(line) = usize::try_from(offset).ok().and_then(|i| edit.adds.get(i)) {
        return Moved {
            row: add_start + offset,
            col: col.min(line_end_col(line)),
            deleted: true,
        };
    }

    match endpoint {
        Endpoint::Start => Moved {
            row: add_start + i64::from(edit.add_length),
            col: 1,
            deleted: true,
        },
        Endpoint::End => {
            let (row, col) = match edit.adds.last() {
                Some(line) => (add_start + i64::from(edit.add_length) - 1, line_end_col(line)),
                // Preceding line's text is not in the edit, so its length is unknown
                None => ((add_start - 1).max(1), 1),
            };
            Moved {
                row,
                col,
                deleted: true,
            }
        }
    }
}

/// Column just past the last character of a line
fn line_end_col(line: &str) -> i64 {
    line.chars().count() as i64 + 1
}
