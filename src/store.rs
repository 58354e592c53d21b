//! On-disk snapshot store: raw and processed snapshots are one file per
//! polled timestamp, named `<epoch>.json`, in flat directories.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::feed::{self, RawSnapshot};
use crate::snapshot::ProcessedSnapshot;

/// Lists timestamped snapshot files under `dir`, sorted by timestamp.
///
/// Downstream stages assume non-decreasing timestamp order, so ordering is
/// established here rather than trusting directory enumeration. Files whose
/// stem is not an epoch timestamp are skipped with a warning.
pub fn list_snapshot_files(dir: impl AsRef<Path>) -> Result<Vec<(i64, PathBuf)>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("reading snapshot directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        match parse_timestamp(&path) {
            Some(ts) => files.push((ts, path)),
            None => warn!(path = %path.display(), "skipping file without a timestamp name"),
        }
    }

    files.sort_by_key(|(ts, _)| *ts);
    Ok(files)
}

/// Extracts the epoch timestamp from a `<epoch>.<ext>` file name.
fn parse_timestamp(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.split('.').next()?;
    stem.parse().ok()
}

/// Loads and decodes one raw snapshot payload.
pub fn load_raw_snapshot(path: impl AsRef<Path>) -> Result<RawSnapshot> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    feed::parse_snapshot(&bytes).with_context(|| format!("parsing snapshot {}", path.display()))
}

/// Path of the processed snapshot for `timestamp` under `dir`.
pub fn processed_path(dir: impl AsRef<Path>, timestamp: i64) -> PathBuf {
    dir.as_ref().join(format!("{timestamp}.json"))
}

/// Writes one processed snapshot. Snapshots are immutable once written.
pub fn write_processed_snapshot(
    dir: impl AsRef<Path>,
    timestamp: i64,
    snapshot: &ProcessedSnapshot,
) -> Result<()> {
    let path = processed_path(dir, timestamp);
    let content = serde_json::to_string(snapshot)?;
    fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Loads every processed snapshot under `dir`, sorted by timestamp.
///
/// # Errors
///
/// Fails when the directory holds no snapshots at all; an empty input set
/// would otherwise flow through as an empty analysis.
pub fn load_processed_snapshots(dir: impl AsRef<Path>) -> Result<Vec<(i64, ProcessedSnapshot)>> {
    let dir = dir.as_ref();
    let files = list_snapshot_files(dir)?;
    if files.is_empty() {
        bail!("no snapshot files found in {}", dir.display());
    }

    let mut snapshots = Vec::with_capacity(files.len());
    for (ts, path) in files {
        let content =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let snapshot: ProcessedSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("parsing processed snapshot {}", path.display()))?;
        snapshots.push((ts, snapshot));
    }
    Ok(snapshots)
}
