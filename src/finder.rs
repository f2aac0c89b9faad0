//! Marker location resolution
//!
//! Works out where markers point now, given where they pointed when they were
//! created. Markers are batched by creation commit so each commit costs one
//! history lookup and one transform call. Transform failures degrade to "no
//! update" for that batch and never abort the whole resolution.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::delta::{reverse_edits, DeltaBuilder, Edit};
use crate::history::History;
use crate::location::{Location, LocationMap};
use crate::marker::Marker;
use crate::service::{LocationService, TransformRequest};

pub struct MarkerLocationFinder<H, S> {
    history: H,
    service: S,
    team_id: String,
    stream_id: String,
    file_path: PathBuf,
}

impl<H: History, S: LocationService> MarkerLocationFinder<H, S> {
    pub fn new(
        history: H,
        service: S,
        team_id: impl Into<String>,
        stream_id: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            history,
            service,
            team_id: team_id.into(),
            stream_id: stream_id.into(),
            file_path: file_path.into(),
        }
    }

    /// Moves `locations` from `old_text` to `new_text` without consulting history
    pub fn find_updated_locations(
        &self,
        locations: &LocationMap,
        file_path: &Path,
        old_text: &str,
        new_text: &str,
    ) -> Result<LocationMap> {
        let delta = DeltaBuilder::from_texts(old_text, new_text)
            .build()
            .with_context(|| format!("Failed to build delta for {}", file_path.display()))?;

        if delta.is_empty() {
            return Ok(locations.clone());
        }

        Ok(self.calculate_locations(locations, &delta.edits, None, None))
    }

    /// Resolves each marker's location at the checked-out commit.
    ///
    /// Markers whose creation commit is gone from history get no entry.
    pub fn find_locations_for_current_commit(&self, markers: &[Marker]) -> Result<LocationMap> {
        let current_commit = self.history.current_commit()?;

        let mut markers_by_commit: BTreeMap<&str, Vec<&Marker>> = BTreeMap::new();
        for marker in markers {
            markers_by_commit
                .entry(marker.commit_hash_when_created.as_str())
                .or_default()
                .push(marker);
        }

        let mut current_locations = LocationMap::new();

        for (commit, group) in markers_by_commit {
            if !self.history.ensure_commit_exists(commit)? {
                debug!(commit, markers = group.len(), "creation commit not in history, skipping");
                continue;
            }

            let known = self
                .service
                .fetch_historical_locations(&self.team_id, &self.stream_id, commit)
                .with_context(|| format!("Failed to fetch marker locations at {commit}"))?;

            let to_calculate: LocationMap = group
                .iter()
                .filter_map(|marker| {
                    known
                        .get(&marker.id)
                        .filter(|location| location.is_valid())
                        .map(|location| (marker.id.clone(), location.clone()))
                })
                .collect();

            let delta = self
                .history
                .delta_between_commits(commit, &current_commit, &self.file_path)?;

            if delta.is_empty() || to_calculate.is_empty() {
                debug!(commit, count = to_calculate.len(), "nothing to recalculate");
                current_locations.extend(to_calculate);
            } else {
                let calculated = self.calculate_locations(
                    &to_calculate,
                    &delta.edits,
                    Some(commit),
                    Some(&current_commit),
                );
                current_locations.extend(calculated);
            }
        }

        Ok(current_locations)
    }

    /// Carries committed locations forward onto an unsaved buffer
    pub fn find_locations_for_uncommitted_changes(
        &self,
        commit_locations: &LocationMap,
        buffer_text: &str,
    ) -> Result<LocationMap> {
        let current_commit = self.history.current_commit()?;
        let delta = self
            .history
            .delta_for_uncommitted_changes(&self.file_path, buffer_text)?;

        let mut locations = commit_locations.clone();

        if !delta.is_empty() && !locations.is_empty() {
            let moved = self.calculate_locations(
                commit_locations,
                &delta.edits,
                Some(&current_commit),
                None,
            );
            locations.extend(moved);
        }

        Ok(locations)
    }

    /// Maps ranges picked in an unsaved buffer back onto the checked-out commit
    pub fn backtrack_locations_at_current_commit(
        &self,
        dirty_locations: &LocationMap,
        buffer_text: &str,
    ) -> Result<LocationMap> {
        let current_commit = self.history.current_commit()?;
        let delta = self
            .history
            .delta_for_uncommitted_changes(&self.file_path, buffer_text)?;

        if delta.is_empty() {
            return Ok(dirty_locations.clone());
        }

        let reversed = reverse_edits(&delta.edits);
        Ok(self.calculate_locations(dirty_locations, &reversed, Some(&current_commit), None))
    }

    /// One transform call. Failures are logged and yield an empty map.
    fn calculate_locations(
        &self,
        locations: &LocationMap,
        edits: &[Edit],
        original_commit_hash: Option<&str>,
        new_commit_hash: Option<&str>,
    ) -> LocationMap {
        let valid: LocationMap = locations
            .iter()
            .filter(|(_, location)| location.is_valid())
            .map(|(id, location)| (id.clone(), location.clone()))
            .collect();

        if valid.is_empty() {
            return LocationMap::new();
        }

        let has_uncommitted_location = locations.values().any(Location::has_deleted_endpoint);

        let request = TransformRequest {
            team_id: self.team_id.clone(),
            stream_id: self.stream_id.clone(),
            original_commit_hash: original_commit_hash.map(String::from),
            new_commit_hash: if has_uncommitted_location {
                None
            } else {
                new_commit_hash.map(String::from)
            },
            edits: edits.to_vec(),
            locations: valid,
        };

        match self.service.transform_locations(&request) {
            Ok(locations) => locations,
            Err(error) => {
                warn!(
                    stream = %self.stream_id,
                    original_commit = ?original_commit_hash,
                    error = %format!("{error:#}"),
                    "location transform failed"
                );
                LocationMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculate;
    use crate::delta::{delta_between, Delta};
    use crate::location::LocationMeta;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    const CURRENT: &str = "c-current";

    #[derive(Default)]
    struct StubHistory {
        existing: HashSet<String>,
        /// Keyed by the `from` commit
        commit_deltas: HashMap<String, Delta>,
        uncommitted: Delta,
    }

    impl StubHistory {
        fn with_commit(mut self, commit: &str, delta: Delta) -> Self {
            self.existing.insert(commit.to_string());
            self.commit_deltas.insert(commit.to_string(), delta);
            self
        }

        fn with_uncommitted(mut self, delta: Delta) -> Self {
            self.uncommitted = delta;
            self
        }
    }

    impl History for StubHistory {
        fn current_commit(&self) -> Result<String> {
            Ok(CURRENT.to_string())
        }

        fn ensure_commit_exists(&self, commit: &str) -> Result<bool> {
            Ok(self.existing.contains(commit))
        }

        fn delta_between_commits(&self, from: &str, to: &str, _file_path: &Path) -> Result<Delta> {
            assert_eq!(to, CURRENT);
            Ok(self.commit_deltas.get(from).cloned().unwrap_or_default())
        }

        fn delta_for_uncommitted_changes(&self, _file_path: &Path, _buffer_text: &str) -> Result<Delta> {
            Ok(self.uncommitted.clone())
        }
    }

    /// Shifts locations through the edits it is given and records every call
    #[derive(Default)]
    struct StubService {
        historical: HashMap<String, LocationMap>,
        failing_commits: HashSet<String>,
        calls: RefCell<Vec<TransformRequest>>,
    }

    impl StubService {
        fn with_locations(mut self, commit: &str, locations: &[(&str, Location)]) -> Self {
            let map = locations
                .iter()
                .map(|(id, location)| (id.to_string(), location.clone()))
                .collect();
            self.historical.insert(commit.to_string(), map);
            self
        }

        fn failing_for(mut self, commit: &str) -> Self {
            self.failing_commits.insert(commit.to_string());
            self
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl LocationService for StubService {
        fn fetch_historical_locations(
            &self,
            _team_id: &str,
            _stream_id: &str,
            commit_hash: &str,
        ) -> Result<LocationMap> {
            Ok(self.historical.get(commit_hash).cloned().unwrap_or_default())
        }

        fn transform_locations(&self, request: &TransformRequest) -> Result<LocationMap> {
            self.calls.borrow_mut().push(request.clone());
            if let Some(commit) = &request.original_commit_hash {
                if self.failing_commits.contains(commit) {
                    anyhow::bail!("transform service unavailable");
                }
            }
            Ok(calculate::calculate_locations(&request.locations, &request.edits))
        }
    }

    fn finder<'a>(
        history: &'a StubHistory,
        service: &'a StubService,
    ) -> MarkerLocationFinder<&'a StubHistory, &'a StubService> {
        MarkerLocationFinder::new(history, service, "team", "stream", "src/lib.rs")
    }

    /// Three lines inserted at the top of the file
    fn insert_three_at_top() -> Delta {
        delta_between("a\nb\nc", "x\ny\nz\na\nb\nc").unwrap()
    }

    fn map(entries: &[(&str, Location)]) -> LocationMap {
        entries
            .iter()
            .map(|(id, location)| (id.to_string(), location.clone()))
            .collect()
    }

    #[test]
    fn test_empty_delta_passes_locations_through() {
        let history = StubHistory::default().with_commit("c1", Delta::default());
        let service = StubService::default().with_locations(
            "c1",
            &[
                ("m1", Location::new(4, 1, 5, 2)),
                ("m2", Location::new(0, 0, 0, 0)),
            ],
        );
        let markers = vec![Marker::new("m1", "c1", "stream"), Marker::new("m2", "c1", "stream")];

        let result = finder(&history, &service)
            .find_locations_for_current_commit(&markers)
            .unwrap();

        assert_eq!(result, map(&[("m1", Location::new(4, 1, 5, 2))]));
        assert_eq!(service.call_count(), 0);
    }

    #[test]
    fn test_markers_sharing_a_commit_make_one_call() {
        let history = StubHistory::default().with_commit("c1", insert_three_at_top());
        let service = StubService::default().with_locations(
            "c1",
            &[
                ("m1", Location::new(1, 1, 1, 3)),
                ("m2", Location::new(2, 1, 3, 1)),
                ("m3", Location::new(3, 2, 3, 4)),
            ],
        );
        let markers = vec![
            Marker::new("m1", "c1", "stream"),
            Marker::new("m2", "c1", "stream"),
            Marker::new("m3", "c1", "stream"),
        ];

        let result = finder(&history, &service)
            .find_locations_for_current_commit(&markers)
            .unwrap();

        assert_eq!(service.call_count(), 1);
        let call = &service.calls.borrow()[0];
        assert_eq!(call.locations.len(), 3);
        assert_eq!(call.original_commit_hash.as_deref(), Some("c1"));
        assert_eq!(call.new_commit_hash.as_deref(), Some(CURRENT));
        assert_eq!(call.team_id, "team");
        assert_eq!(call.stream_id, "stream");

        assert_eq!(
            result,
            map(&[
                ("m1", Location::new(4, 1, 4, 3)),
                ("m2", Location::new(5, 1, 6, 1)),
                ("m3", Location::new(6, 2, 6, 4)),
            ])
        );
    }

    #[test]
    fn test_one_call_per_creation_commit() {
        let history = StubHistory::default()
            .with_commit("c1", insert_three_at_top())
            .with_commit("c2", insert_three_at_top())
            .with_commit("c3", Delta::default());
        let service = StubService::default()
            .with_locations("c1", &[("m1", Location::new(1, 1, 1, 1))])
            .with_locations("c2", &[("m2", Location::new(2, 1, 2, 1))])
            .with_locations("c3", &[("m3", Location::new(3, 1, 3, 1))]);
        let markers = vec![
            Marker::new("m1", "c1", "stream"),
            Marker::new("m2", "c2", "stream"),
            Marker::new("m3", "c3", "stream"),
        ];

        let result = finder(&history, &service)
            .find_locations_for_current_commit(&markers)
            .unwrap();

        assert_eq!(service.call_count(), 2);
        assert_eq!(result.len(), 3);
        assert_eq!(result["m3"], Location::new(3, 1, 3, 1));
    }

    #[test]
    fn test_unreachable_commit_yields_no_entry() {
        let history = StubHistory::default();
        let service = StubService::default().with_locations("gone", &[("m1", Location::new(1, 1, 1, 1))]);

        let result = finder(&history, &service)
            .find_locations_for_current_commit(&[Marker::new("m1", "gone", "stream")])
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(service.call_count(), 0);
    }

    #[test]
    fn test_mixed_reachability() {
        let history = StubHistory::default().with_commit("C2", insert_three_at_top());
        let service = StubService::default()
            .with_locations(
                "C1",
                &[
                    ("m1", Location::new(1, 1, 1, 1)),
                    ("m2", Location::new(2, 1, 2, 1)),
                ],
            )
            .with_locations("C2", &[("m3", Location::new(2, 1, 2, 5))]);
        let markers = vec![
            Marker::new("m1", "C1", "stream"),
            Marker::new("m2", "C1", "stream"),
            Marker::new("m3", "C2", "stream"),
        ];

        let result = finder(&history, &service)
            .find_locations_for_current_commit(&markers)
            .unwrap();

        assert_eq!(result, map(&[("m3", Location::new(5, 1, 5, 5))]));
        assert_eq!(service.call_count(), 1);
        assert_eq!(
            service.calls.borrow()[0].original_commit_hash.as_deref(),
            Some("C2")
        );
    }

    #[test]
    fn test_failed_group_does_not_abort_siblings() {
        let history = StubHistory::default()
            .with_commit("c1", insert_three_at_top())
            .with_commit("c2", insert_three_at_top());
        let service = StubService::default()
            .with_locations("c1", &[("m1", Location::new(1, 1, 1, 1))])
            .with_locations("c2", &[("m2", Location::new(1, 1, 1, 1))])
            .failing_for("c1");
        let markers = vec![Marker::new("m1", "c1", "stream"), Marker::new("m2", "c2", "stream")];

        let result = finder(&history, &service)
            .find_locations_for_current_commit(&markers)
            .unwrap();

        assert_eq!(service.call_count(), 2);
        assert_eq!(result, map(&[("m2", Location::new(4, 1, 4, 1))]));
    }

    #[test]
    fn test_deleted_endpoint_drops_new_commit_hash() {
        let flagged = Location::new(2, 1, 2, 3).with_meta(LocationMeta {
            start_was_deleted: false,
            end_was_deleted: true,
        });
        let history = StubHistory::default().with_commit("c1", insert_three_at_top());
        let service = StubService::default().with_locations(
            "c1",
            &[("m1", flagged), ("m2", Location::new(1, 1, 1, 1))],
        );
        let markers = vec![Marker::new("m1", "c1", "stream"), Marker::new("m2", "c1", "stream")];

        finder(&history, &service)
            .find_locations_for_current_commit(&markers)
            .unwrap();

        let call = &service.calls.borrow()[0];
        assert_eq!(call.original_commit_hash.as_deref(), Some("c1"));
        assert_eq!(call.new_commit_hash, None);
    }

    #[test]
    fn test_uncommitted_without_changes_is_identity() {
        let history = StubHistory::default();
        let service = StubService::default();
        let locations = map(&[("m1", Location::new(2, 1, 2, 1))]);

        let result = finder(&history, &service)
            .find_locations_for_uncommitted_changes(&locations, "buffer")
            .unwrap();

        assert_eq!(result, locations);
        assert_eq!(service.call_count(), 0);
    }

    #[test]
    fn test_uncommitted_overlays_transformed_locations() {
        let history = StubHistory::default().with_uncommitted(insert_three_at_top());
        let service = StubService::default();
        let locations = map(&[
            ("m1", Location::new(2, 1, 2, 1)),
            ("unset", Location::new(0, 0, 0, 0)),
        ]);

        let result = finder(&history, &service)
            .find_locations_for_uncommitted_changes(&locations, "buffer")
            .unwrap();

        assert_eq!(
            result,
            map(&[
                ("m1", Location::new(5, 1, 5, 1)),
                ("unset", Location::new(0, 0, 0, 0)),
            ])
        );
        let call = &service.calls.borrow()[0];
        assert_eq!(call.original_commit_hash.as_deref(), Some(CURRENT));
        assert_eq!(call.new_commit_hash, None);
        assert!(!call.locations.contains_key("unset"));
    }

    #[test]
    fn test_uncommitted_failure_keeps_commit_locations() {
        let history = StubHistory::default().with_uncommitted(insert_three_at_top());
        let service = StubService::default().failing_for(CURRENT);
        let locations = map(&[("m1", Location::new(2, 1, 2, 1))]);

        let result = finder(&history, &service)
            .find_locations_for_uncommitted_changes(&locations, "buffer")
            .unwrap();

        assert_eq!(result, locations);
    }

    #[test]
    fn test_backtrack_sends_reversed_edits() {
        let row = 7;
        let buffer_delta = Delta {
            edits: vec![Edit {
                del_start: row,
                del_length: 0,
                add_start: row,
                add_length: 3,
                dels: vec![],
                adds: vec!["x".into(), "y".into(), "z".into()],
            }],
        };
        let history = StubHistory::default().with_uncommitted(buffer_delta.clone());
        let service = StubService::default();
        let dirty = map(&[("new", Location::new(i64::from(row) + 3, 1, i64::from(row) + 3, 6))]);

        let result = finder(&history, &service)
            .backtrack_locations_at_current_commit(&dirty, "buffer")
            .unwrap();

        assert_eq!(service.call_count(), 1);
        assert_eq!(service.calls.borrow()[0].edits, reverse_edits(&buffer_delta.edits));
        assert_eq!(
            result,
            map(&[("new", Location::new(i64::from(row), 1, i64::from(row), 6))])
        );
    }

    #[test]
    fn test_backtrack_without_changes_is_identity() {
        let history = StubHistory::default();
        let service = StubService::default();
        let dirty = map(&[("new", Location::new(3, 1, 3, 9))]);

        let result = finder(&history, &service)
            .backtrack_locations_at_current_commit(&dirty, "buffer")
            .unwrap();

        assert_eq!(result, dirty);
        assert_eq!(service.call_count(), 0);
    }

    #[test]
    fn test_backtrack_failure_is_empty() {
        let history = StubHistory::default().with_uncommitted(insert_three_at_top());
        let service = StubService::default().failing_for(CURRENT);
        let dirty = map(&[("new", Location::new(5, 1, 5, 2))]);

        let result = finder(&history, &service)
            .backtrack_locations_at_current_commit(&dirty, "buffer")
            .unwrap();

        assert!(result.is_empty());
    }

    #[test]
    fn test_updated_locations_between_texts() {
        let history = StubHistory::default();
        let service = StubService::default();
        let finder = finder(&history, &service);
        let locations = map(&[("m1", Location::new(2, 1, 2, 2))]);

        let unchanged = finder
            .find_updated_locations(&locations, Path::new("f.rs"), "a\r\nb\r\n", "a\nb")
            .unwrap();
        assert_eq!(unchanged, locations);
        assert_eq!(service.call_count(), 0);

        let moved = finder
            .find_updated_locations(&locations, Path::new("f.rs"), "a\nb", "a\nnew\nb")
            .unwrap();
        assert_eq!(moved, map(&[("m1", Location::new(3, 1, 3, 2))]));
        let call = &service.calls.borrow()[0];
        assert_eq!(call.original_commit_hash, None);
        assert_eq!(call.new_commit_hash, None);
    }

    mod with_git {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::history::fixture::commit_file;
        use crate::history::GitHistory;
        use crate::service::StoreLocationService;
        use crate::storage::Storage;
        use git2::Repository;
        use tempfile::tempdir;

        #[test]
        fn test_resolves_across_commits_and_buffer() {
            let dir = tempdir().unwrap();
            let repo = Repository::init(dir.path()).unwrap();
            let created = commit_file(&repo, "lib.rs", "fn a() {}\nfn b() {}\n");
            let current = commit_file(&repo, "lib.rs", "// header\n\nfn a() {}\nfn b() {}\n");

            let storage = Storage::open(&dir.path().join("markers.db")).unwrap();
            let id = storage.add_marker("team", "lib.rs", "lib.rs", &created, "check b").unwrap();
            storage
                .save_locations("team", "lib.rs", &created, &map(&[(id.as_str(), Location::new(2, 1, 2, 10))]))
                .unwrap();

            let history = GitHistory::discover(dir.path()).unwrap();
            let service = StoreLocationService::new(&storage);
            let finder = MarkerLocationFinder::new(&history, service, "team", "lib.rs", "lib.rs");

            let markers = storage.list_markers("team", Some("lib.rs")).unwrap();
            let at_commit = finder.find_locations_for_current_commit(&markers).unwrap();
            assert_eq!(at_commit[&id], Location::new(4, 1, 4, 10));
            assert_eq!(
                storage.locations_at("team", "lib.rs", &current).unwrap()[&id],
                Location::new(4, 1, 4, 10)
            );

            let buffer = "// header\n\nfn a() {}\n\nfn b() {}\n";
            let in_buffer = finder
                .find_locations_for_uncommitted_changes(&at_commit, buffer)
                .unwrap();
            assert_eq!(in_buffer[&id], Location::new(5, 1, 5, 10));

            let back = finder
                .backtrack_locations_at_current_commit(&in_buffer, buffer)
                .unwrap();
            assert_eq!(back[&id], Location::new(4, 1, 4, 10));
        }
    }
}
