//! On-disk CSV caches for expensive intermediate tables.
//!
//! A cache is a fixed path. It is reused unless the caller asks for a
//! rebuild; a cache that fails to read back is rebuilt, not fatal.
//! Single-writer: concurrent runs must not share a cache directory.

use crate::{
    error::BuildResult,
    event::{BuildEvent, Stage},
};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::Path;

pub fn read_cached<T: DeserializeOwned>(path: &Path) -> BuildResult<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
    Ok(rows)
}

pub fn write_cached<T: Serialize>(path: &Path, rows: &[T]) -> BuildResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Return the cached table at `path`, or run `build`, persist its output,
/// and return it.
pub fn load_or_build<T, F>(
    path: &Path,
    rebuild: bool,
    stage: Stage,
    events: &mut Vec<BuildEvent>,
    build: F,
) -> BuildResult<Vec<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut Vec<BuildEvent>) -> BuildResult<Vec<T>>,
{
    if !rebuild && path.exists() {
        match read_cached::<T>(path) {
            Ok(rows) => {
                log::info!("[{}] using cache {} ({} rows)", stage.as_str(), path.display(), rows.len());
                events.push(BuildEvent::CacheHit {
                    stage,
                    path: path.display().to_string(),
                    rows: rows.len(),
                });
                return Ok(rows);
            }
            Err(e) => {
                log::warn!("[{}] cache {} unreadable, rebuilding: {e}", stage.as_str(), path.display());
            }
        }
    }

    let rows = build(events)?;
    write_cached(path, &rows)?;
    log::debug!("[{}] wrote cache {}", stage.as_str(), path.display());
    Ok(rows)
}
