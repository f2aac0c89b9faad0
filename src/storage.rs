//! SQLite storage for markers and their per-commit locations
//!
//! Uses WAL mode so the CLI and an editor integration can share the file.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;

use crate::location::{Location, LocationMap, LocationMeta};
use crate::marker::Marker;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS markers (
    id INTEGER PRIMARY KEY,
    team_id TEXT NOT NULL,
    stream_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    commit_hash_when_created TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS marker_locations (
    team_id TEXT NOT NULL,
    stream_id TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    marker_id TEXT NOT NULL,
    start_row INTEGER NOT NULL,
    start_col INTEGER NOT NULL,
    end_row INTEGER NOT NULL,
    end_col INTEGER NOT NULL,
    meta TEXT,
    PRIMARY KEY (team_id, stream_id, commit_hash, marker_id)
);

CREATE INDEX IF NOT EXISTS idx_markers_file ON markers(team_id, file_path);
"#;

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Opens or creates the database at the default location
    pub fn open_default() -> Result<Self> {
        let data_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("markloc");

        std::fs::create_dir_all(&data_dir).context("Failed to create config directory")?;

        Self::open(&data_dir.join("markers.db"))
    }

    /// Opens or creates the database at the specified path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;

        Ok(Self { conn })
    }

    /// Adds a marker and returns its id
    pub fn add_marker(
        &self,
        team_id: &str,
        stream_id: &str,
        file_path: &str,
        commit_hash_when_created: &str,
        content: &str,
    ) -> Result<String> {
        self.conn.execute(
            r#"
            INSERT INTO markers (team_id, stream_id, file_path, commit_hash_when_created, content)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![team_id, stream_id, file_path, commit_hash_when_created, content],
        )?;

        Ok(self.conn.last_insert_rowid().to_string())
    }

    /// Lists a team's markers, optionally filtered by file
    pub fn list_markers(&self, team_id: &str, file_path: Option<&str>) -> Result<Vec<Marker>> {
        let mut sql = String::from(
            r#"
            SELECT id, commit_hash_when_created, stream_id, file_path, content
            FROM markers
            WHERE team_id = ?1
            "#,
        );

        if file_path.is_some() {
            sql.push_str(" AND file_path = ?2");
        }

        sql.push_str(" ORDER BY file_path, id");

        let mut stmt = self.conn.prepare(&sql)?;

        let rows = if let Some(fp) = file_path {
            stmt.query_map(params![team_id, fp], Self::row_to_marker)?
        } else {
            stmt.query_map(params![team_id], Self::row_to_marker)?
        };

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to fetch markers")
    }

    /// Deletes a marker together with every stored location for it
    pub fn delete_marker(&self, team_id: &str, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute(
            "DELETE FROM markers WHERE team_id = ?1 AND id = ?2",
            params![team_id, id],
        )?;
        tx.execute(
            "DELETE FROM marker_locations WHERE team_id = ?1 AND marker_id = ?2",
            params![team_id, id],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Upserts locations of a stream at one commit
    pub fn save_locations(
        &self,
        team_id: &str,
        stream_id: &str,
        commit_hash: &str,
        locations: &LocationMap,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare(
            r#"
            INSERT OR REPLACE INTO marker_locations (
                team_id, stream_id, commit_hash, marker_id,
                start_row, start_col, end_row, end_col, meta
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )?;

        for (marker_id, location) in locations {
            let meta = location
                .meta
                .map(|m| serde_json::to_string(&m))
                .transpose()?;
            stmt.execute(params![
                team_id,
                stream_id,
                commit_hash,
                marker_id,
                location.start_row,
                location.start_col,
                location.end_row,
                location.end_col,
                meta,
            ])?;
        }

        Ok(())
    }

    /// Locations of a stream recorded at one commit
    pub fn locations_at(
        &self,
        team_id: &str,
        stream_id: &str,
        commit_hash: &str,
    ) -> Result<LocationMap> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT marker_id, start_row, start_col, end_row, end_col, meta
            FROM marker_locations
            WHERE team_id = ?1 AND stream_id = ?2 AND commit_hash = ?3
            "#,
        )?;

        let rows = stmt.query_map(params![team_id, stream_id, commit_hash], |row| {
            let meta: Option<String> = row.get(5)?;
            let location = Location {
                start_row: row.get(1)?,
                start_col: row.get(2)?,
                end_row: row.get(3)?,
                end_col: row.get(4)?,
                // A corrupt meta blob only loses the flags, not the location
                meta: meta.and_then(|m| serde_json::from_str::<LocationMeta>(&m).ok()),
            };
            Ok((row.get::<_, String>(0)?, location))
        })?;

        rows.collect::<Result<LocationMap, _>>()
            .context("Failed to fetch marker locations")
    }

    fn row_to_marker(row: &rusqlite::Row) -> rusqlite::Result<Marker> {
        Ok(Marker {
            id: row.get::<_, i64>(0)?.to_string(),
            commit_hash_when_created: row.get(1)?,
            stream_id: row.get(2)?,
            file_path: row.get(3)?,
            content: row.get(4)?,
        })
    }
}
