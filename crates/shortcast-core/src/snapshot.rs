//! Durable per-job snapshots
//!
//! Each job owns exactly one JSON file, rewritten wholesale on every
//! transition. Writes go to a sibling temp file and are renamed over the
//! target, so a crash mid-write never leaves a truncated record behind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::JobStoreError;
use crate::job::{JobRecord, JobStatus};
use crate::state::NextAction;

/// Snapshot file for a job id
pub fn snapshot_path(dir: &Path, job_id: &str) -> PathBuf {
    dir.join(format!("{job_id}.json"))
}

/// Persist one record atomically
pub fn write_snapshot(dir: &Path, record: &JobRecord) -> Result<(), JobStoreError> {
    let path = snapshot_path(dir, &record.job_id);
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(record)?;
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Read one snapshot file
pub fn read_snapshot(path: &Path) -> Result<JobRecord, JobStoreError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Crash-recovery repair rule.
///
/// A stored `running` status has no live worker after a restart, and there
/// is no way to know which stage it was mid-execution of, so the record
/// cannot be resumed safely — it is surfaced to the operator as failed.
/// Returns true when the record was rewritten.
pub fn repair_interrupted(record: &mut JobRecord) -> bool {
    if record.status != JobStatus::Running {
        return false;
    }
    record.status = JobStatus::Failed;
    record.state.add_error("interrupted by server restart");
    record.state.status = "failed:interrupted".to_string();
    record.state.next_action = Some(NextAction::Failed);
    record.touch();
    true
}

/// Load every snapshot in `dir`, sorted by file name.
///
/// Files that fail to parse are logged and skipped; corruption of one job
/// never takes down the registry.
pub fn load_snapshots(dir: &Path) -> Result<Vec<JobRecord>, JobStoreError> {
    let mut records = Vec::new();
    if !dir.exists() {
        return Ok(records);
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    paths.sort();

    for path in paths {
        match read_snapshot(&path) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to restore job snapshot")
            }
        }
    }

    if !records.is_empty() {
        info!(count = records.len(), "restored jobs from disk");
    }
    Ok(records)
}
