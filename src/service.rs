//! Location service: historical locations and the coordinate transform
//!
//! The finder only talks to [`LocationService`]. [`StoreLocationService`] is
//! the local implementation, backed by [`Storage`] and the arithmetic in
//! [`crate::calculate`].

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::calculate::calculate_locations;
use crate::delta::Edit;
use crate::location::LocationMap;
use crate::storage::Storage;

/// Body of a transform call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub team_id: String,
    pub stream_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_commit_hash: Option<String>,
    pub edits: Vec<Edit>,
    pub locations: LocationMap,
}

pub trait LocationService {
    /// Last locations recorded for a stream at a commit
    fn fetch_historical_locations(
        &self,
        team_id: &str,
        stream_id: &str,
        commit_hash: &str,
    ) -> Result<LocationMap>;

    fn transform_locations(&self, request: &TransformRequest) -> Result<LocationMap>;
}

impl<T: LocationService + ?Sized> LocationService for &T {
    fn fetch_historical_locations(
        &self,
        team_id: &str,
        stream_id: &str,
        commit_hash: &str,
    ) -> Result<LocationMap> {
        (**self).fetch_historical_locations(team_id, stream_id, commit_hash)
    }

    fn transform_locations(&self, request: &TransformRequest) -> Result<LocationMap> {
        (**self).transform_locations(request)
    }
}

pub struct StoreLocationService<'a> {
    storage: &'a Storage,
}

impl<'a> StoreLocationService<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }
}

impl LocationService for StoreLocationService<'_> {
    fn fetch_historical_locations(
        &self,
        team_id: &str,
        stream_id: &str,
        commit_hash: &str,
    ) -> Result<LocationMap> {
        self.storage.locations_at(team_id, stream_id, commit_hash)
    }

    /// Results bound to a new commit are remembered for that commit
    fn transform_locations(&self, request: &TransformRequest) -> Result<LocationMap> {
        let locations = calculate_locations(&request.locations, &request.edits);

        if let Some(commit) = &request.new_commit_hash {
            debug!(commit = %commit, count = locations.len(), "caching transformed locations");
            self.storage
                .save_locations(&request.team_id, &request.stream_id, commit, &locations)?;
        }

        Ok(locations)
    }
}
