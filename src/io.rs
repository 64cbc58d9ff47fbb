//! File helpers for events, reports and Millepede binaries.
//!
//! - `load_events`: read a JSON array of [`EventHits`].
//! - `create_mille_file`: open a buffered [`MilleWriter`] on disk.
//! - `write_json_file`: pretty-print a serializable value to disk.
use crate::event::EventHits;
use crate::mille::MilleWriter;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// Load a list of events written as a JSON array.
pub fn load_events(path: &Path) -> Result<Vec<EventHits>, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read events {}: {e}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse events {}: {e}", path.display()))
}

/// Create (or truncate) a Millepede binary at `path`.
pub fn create_mille_file(path: &Path) -> Result<MilleWriter<BufWriter<File>>, String> {
    ensure_parent_dir(path)?;
    let file =
        File::create(path).map_err(|e| format!("Failed to create {}: {e}", path.display()))?;
    Ok(MilleWriter::new(BufWriter::new(file)))
}

/// Serialize a value as pretty JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize JSON for {}: {e}", path.display()))?;
    fs::write(path, json).map_err(|e| format!("Failed to write JSON {}: {e}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
    }
    Ok(())
}
