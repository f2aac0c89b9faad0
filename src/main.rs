//! markloc - keeps inline code markers anchored across commits and unsaved edits
//!
//! Markers are stored with the range they covered at the commit where they
//! were created. Every read re-resolves that range against the checked-out
//! commit and, optionally, against an unsaved editor buffer.

mod calculate;
mod config;
mod delta;
mod export;
mod finder;
mod history;
mod location;
mod logging;
mod marker;
mod service;
mod storage;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::export::{export, ExportFormat};
use crate::finder::MarkerLocationFinder;
use crate::history::{GitHistory, History};
use crate::location::{Location, LocationMap};
use crate::marker::Marker;
use crate::service::StoreLocationService;
use crate::storage::Storage;

#[derive(Parser)]
#[command(name = "markloc")]
#[command(about = "Inline code markers that follow your edits")]
#[command(version)]
struct Cli {
    /// Team id (overrides config)
    #[arg(long, global = true)]
    team: Option<String>,

    /// Marker database path (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    InitConfig,

    /// Add a marker at the current commit
    Add {
        /// File path (relative to repo root)
        #[arg(short, long)]
        file: String,

        #[arg(long)]
        start_row: i64,

        #[arg(long, default_value_t = 1)]
        start_col: i64,

        /// Defaults to the start row
        #[arg(long)]
        end_row: Option<i64>,

        #[arg(long, default_value_t = 1)]
        end_col: i64,

        /// Unsaved buffer the range was picked in
        #[arg(short, long)]
        buffer: Option<PathBuf>,

        /// Marker content
        content: String,
    },

    /// List markers with their current locations
    List {
        /// Filter by file path
        #[arg(short, long)]
        file: Option<String>,

        /// Follow unsaved edits in this buffer file
        #[arg(short, long, requires = "file")]
        buffer: Option<PathBuf>,

        /// Output format: markdown (md) or json
        #[arg(long, default_value = "markdown")]
        format: String,
    },

    /// Move locations between two versions of a file
    Remap {
        #[arg(short, long)]
        file: String,

        /// Old version of the file
        #[arg(long)]
        old: PathBuf,

        /// New version of the file
        #[arg(long)]
        new: PathBuf,

        /// JSON object of marker id -> location
        #[arg(long)]
        locations: String,
    },

    /// Delete a marker
    Delete { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Commands::InitConfig = cli.command {
        let path = Config::create_default()?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let config = Config::load()?.with_overrides(cli.team, cli.database);
    let storage = match &config.database {
        Some(path) => Storage::open(path)?,
        None => Storage::open_default()?,
    };

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let history = GitHistory::discover(&cwd)?;
    let team = config.team_id.as_str();

    match cli.command {
        Commands::InitConfig => {}
        Commands::Add {
            file,
            start_row,
            start_col,
            end_row,
            end_col,
            buffer,
            content,
        } => {
            let location = Location::new(start_row, start_col, end_row.unwrap_or(start_row), end_col);
            cmd_add(&storage, &history, team, &file, location, buffer.as_deref(), &content)?;
        }
        Commands::List { file, buffer, format } => {
            cmd_list(&storage, &history, team, file.as_deref(), buffer.as_deref(), &format)?;
        }
        Commands::Remap {
            file,
            old,
            new,
            locations,
        } => {
            cmd_remap(&storage, &history, team, &file, &old, &new, &locations)?;
        }
        Commands::Delete { id } => {
            if storage.delete_marker(team, &id)? {
                println!("Deleted marker #{}", id);
            } else {
                bail!("No marker #{}", id);
            }
        }
    }

    Ok(())
}

/// Stream id and stored path of a file: its path relative to the repo root
fn stream_for(history: &GitHistory, file: &str) -> Result<String> {
    let relative = history.relative_path(Path::new(file))?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

fn read_buffer(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn cmd_add(
    storage: &Storage,
    history: &GitHistory,
    team: &str,
    file: &str,
    mut location: Location,
    buffer: Option<&Path>,
    content: &str,
) -> Result<()> {
    if !location.is_valid() {
        bail!("Rows are 1-based; got start row {}", location.start_row);
    }

    let stream = stream_for(history, file)?;
    let commit = history.current_commit()?;

    if let Some(buffer) = buffer {
        let text = read_buffer(buffer)?;
        let finder = MarkerLocationFinder::new(
            history,
            StoreLocationService::new(storage),
            team,
            stream.as_str(),
            stream.as_str(),
        );

        let mut dirty = LocationMap::new();
        dirty.insert("new".to_string(), location);
        location = finder
            .backtrack_locations_at_current_commit(&dirty, &text)?
            .remove("new")
            .context("Could not map the buffer range onto the current commit")?;
    }

    let id = storage.add_marker(team, &stream, &stream, &commit, content)?;
    let mut locations = LocationMap::new();
    locations.insert(id.clone(), location.clone());
    storage.save_locations(team, &stream, &commit, &locations)?;

    println!(
        "Added marker #{} at {}:{}:{}",
        id, stream, location.start_row, location.start_col
    );
    Ok(())
}

fn cmd_list(
    storage: &Storage,
    history: &GitHistory,
    team: &str,
    file: Option<&str>,
    buffer: Option<&Path>,
    format: &str,
) -> Result<()> {
    let format = ExportFormat::from_str(format)
        .context("Invalid format. Use: markdown (md) or json")?;

    let stream_filter = file.map(|f| stream_for(history, f)).transpose()?;
    let markers = storage.list_markers(team, stream_filter.as_deref())?;
    let buffer_text = buffer.map(read_buffer).transpose()?;

    let mut by_file: BTreeMap<&str, Vec<Marker>> = BTreeMap::new();
    for marker in &markers {
        by_file
            .entry(marker.file_path.as_str())
            .or_default()
            .push(marker.clone());
    }

    let mut resolved = LocationMap::new();
    for (path, group) in by_file {
        let finder = MarkerLocationFinder::new(
            history,
            StoreLocationService::new(storage),
            team,
            path,
            path,
        );

        let mut locations = finder.find_locations_for_current_commit(&group)?;
        if let Some(text) = &buffer_text {
            locations = finder.find_locations_for_uncommitted_changes(&locations, text)?;
        }
        resolved.extend(locations);
    }

    print!("{}", export(&markers, &resolved, format)?);
    Ok(())
}

fn cmd_remap(
    storage: &Storage,
    history: &GitHistory,
    team: &str,
    file: &str,
    old: &Path,
    new: &Path,
    locations: &str,
) -> Result<()> {
    let locations: LocationMap =
        serde_json::from_str(locations).context("--locations must be a JSON object of locations")?;
    let old_text = read_buffer(old)?;
    let new_text = read_buffer(new)?;

    let stream = stream_for(history, file)?;
    let finder = MarkerLocationFinder::new(
        history,
        StoreLocationService::new(storage),
        team,
        stream.as_str(),
        stream.as_str(),
    );

    let updated = finder.find_updated_locations(&locations, Path::new(&stream), &old_text, &new_text)?;
    println!("{}", serde_json::to_string_pretty(&updated)?);
    Ok(())
}
