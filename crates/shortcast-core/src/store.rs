//! The job registry
//!
//! An in-memory job table behind one coarse lock, with a durable snapshot
//! per job and at most one worker per job. `start_job` and `resume_job` are
//! the only worker spawn points, and each requires a specific prior status
//! observed under the lock, so double-spawn is impossible: the first caller
//! to acquire the lock wins, the second gets a conflict.
//!
//! Workers are tokio tasks gated by a semaphore — heavy jobs (rendering)
//! queue for a permit instead of piling onto the machine. The lock is held
//! only for short bookkeeping sections, never across a stage invocation;
//! workers run on a copy of the state taken under the lock and write back
//! when the machine stops.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::JobStoreError;
use crate::job::{JobRecord, JobStatus};
use crate::machine::{PipelineMachine, RunOutcome};
use crate::snapshot;
use crate::stage::ReviewDecision;
use crate::state::{NextAction, PipelineState};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    /// Directory holding one snapshot file per job
    pub jobs_dir: PathBuf,
    /// Threaded through to stages via the pipeline state
    pub assets_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Give-up bound for the asset stage's refine-query self-loop
    pub max_asset_attempts: u32,
    /// Permits for concurrently running workers
    pub max_concurrent_jobs: usize,
}

impl JobStoreConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        let root = data_root.into();
        Self {
            jobs_dir: root.join("jobs"),
            assets_dir: root.join("assets"),
            output_dir: root.join("output"),
            max_asset_attempts: 3,
            max_concurrent_jobs: 4,
        }
    }

    pub fn with_max_asset_attempts(mut self, max: u32) -> Self {
        self.max_asset_attempts = max.max(1);
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }
}

struct Inner {
    jobs: Mutex<HashMap<String, JobRecord>>,
    machine: PipelineMachine,
    config: JobStoreConfig,
    worker_slots: Semaphore,
}

/// The job registry. Cheap to clone; all clones share one table.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<Inner>,
}

impl JobStore {
    /// Create the registry, restoring every snapshot on disk.
    ///
    /// Records that were `running` when the process died are rewritten to
    /// `failed` and re-persisted (see [`snapshot::repair_interrupted`]); no
    /// worker is spawned for them.
    pub fn new(machine: PipelineMachine, config: JobStoreConfig) -> Result<Self, JobStoreError> {
        std::fs::create_dir_all(&config.jobs_dir)?;
        std::fs::create_dir_all(&config.assets_dir)?;
        std::fs::create_dir_all(&config.output_dir)?;

        let mut jobs = HashMap::new();
        for mut record in snapshot::load_snapshots(&config.jobs_dir)? {
            if snapshot::repair_interrupted(&mut record) {
                warn!(job_id = %record.job_id, "job was running at shutdown, marked failed");
                snapshot::write_snapshot(&config.jobs_dir, &record)?;
            }
            jobs.insert(record.job_id.clone(), record);
        }

        let worker_slots = Semaphore::new(config.max_concurrent_jobs);
        Ok(Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(jobs),
                machine,
                config,
                worker_slots,
            }),
        })
    }

    /// Allocate a job, build its initial pipeline state, and persist the
    /// first snapshot. Returns a copy of the record.
    pub fn create_job(&self, topic: &str) -> Result<JobRecord, JobStoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4().simple().to_string();
        let job_id = format!("job-{}", &id[..10]);
        let thread_id = format!("thread-{job_id}");

        let state = PipelineState {
            job_id: job_id.clone(),
            topic: topic.to_string(),
            status: "queued".to_string(),
            assets_dir: self.inner.config.assets_dir.display().to_string(),
            output_dir: self.inner.config.output_dir.display().to_string(),
            max_asset_attempts: self.inner.config.max_asset_attempts,
            ..Default::default()
        };

        let record = JobRecord {
            job_id: job_id.clone(),
            thread_id,
            topic: topic.to_string(),
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            review_payload: None,
            error: None,
            state,
        };

        let mut jobs = self.inner.jobs.lock();
        snapshot::write_snapshot(&self.inner.config.jobs_dir, &record)?;
        jobs.insert(job_id, record.clone());
        Ok(record)
    }

    /// Mark a queued job running and hand it to a worker
    pub fn start_job(&self, job_id: &str) -> Result<(), JobStoreError> {
        {
            let mut jobs = self.inner.jobs.lock();
            let record = jobs
                .get_mut(job_id)
                .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
            if record.status != JobStatus::Queued {
                return Err(JobStoreError::Conflict {
                    job_id: job_id.to_string(),
                    status: record.status.to_string(),
                    expected: JobStatus::Queued.to_string(),
                });
            }
            record.status = JobStatus::Running;
            record.touch();
            snapshot::write_snapshot(&self.inner.config.jobs_dir, record)?;
        }
        self.spawn(job_id.to_string(), None);
        Ok(())
    }

    /// Inject a human decision into a `waiting_review` job and hand it to a
    /// worker
    pub fn resume_job(
        &self,
        job_id: &str,
        decision: ReviewDecision,
    ) -> Result<(), JobStoreError> {
        {
            let mut jobs = self.inner.jobs.lock();
            let record = jobs
                .get_mut(job_id)
                .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
            if record.status != JobStatus::WaitingReview {
                return Err(JobStoreError::Conflict {
                    job_id: job_id.to_string(),
                    status: record.status.to_string(),
                    expected: JobStatus::WaitingReview.to_string(),
                });
            }
            record.status = JobStatus::Running;
            record.review_payload = None;
            record.touch();
            snapshot::write_snapshot(&self.inner.config.jobs_dir, record)?;
        }
        self.spawn(job_id.to_string(), Some(decision));
        Ok(())
    }

    /// Snapshot copy of one record
    pub fn get_job(&self, job_id: &str) -> Option<JobRecord> {
        self.inner.jobs.lock().get(job_id).cloned()
    }

    /// Snapshot copies of every record, newest first
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        let mut rows: Vec<JobRecord> = self.inner.jobs.lock().values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    fn spawn(&self, job_id: String, decision: Option<ReviewDecision>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_job(inner, job_id, decision).await;
        });
    }
}

/// Worker body: drive the machine on a copy of the state, then write the
/// outcome back under the lock and persist.
async fn run_job(inner: Arc<Inner>, job_id: String, decision: Option<ReviewDecision>) {
    let _permit = match inner.worker_slots.acquire().await {
        Ok(permit) => permit,
        // Semaphore only closes on shutdown
        Err(_) => return,
    };

    let resume = decision.is_some();
    let (state, entry) = {
        let jobs = inner.jobs.lock();
        let Some(record) = jobs.get(&job_id) else {
            return;
        };
        let entry = if resume {
            PipelineMachine::RESUME_ENTRY
        } else {
            PipelineMachine::ENTRY
        };
        (record.state.clone(), entry)
    };

    info!(job_id = %job_id, resume, "running job");
    let result = inner.machine.run(state, entry, decision).await;

    let mut jobs = inner.jobs.lock();
    let Some(record) = jobs.get_mut(&job_id) else {
        return;
    };

    match result {
        Ok(RunOutcome::Suspended { state, prompt }) => {
            record.state = state;
            record.review_payload = Some(prompt);
            record.status = JobStatus::WaitingReview;
            record.error = None;
        }
        Ok(RunOutcome::Finished(state)) => {
            record.state = state;
            record.status = final_status(&record.state);
            if record.status == JobStatus::Running {
                warn!(
                    job_id = %job_id,
                    state_status = %record.state.status,
                    "job stopped without a terminal action"
                );
            }
            record.review_payload = None;
            record.error = None;
        }
        Err(err) => {
            error!(job_id = %job_id, error = %err, "job crashed");
            record.status = JobStatus::Failed;
            record.error = Some(err.to_string());
            record.state.add_error(format!("job runner error: {err}"));
            record.state.status = "failed:runner".to_string();
            record.state.next_action = Some(NextAction::Failed);
        }
    }
    record.touch();

    if let Err(err) = snapshot::write_snapshot(&inner.config.jobs_dir, record) {
        error!(job_id = %job_id, error = %err, "failed to persist job snapshot");
    }
}

/// Derive the registry status from the terminal pipeline state.
///
/// The `Running` fallback means the machine stopped on an edge the table
/// maps to the end without a terminal action — a graph bug, left visible
/// for inspection instead of being papered over.
fn final_status(state: &PipelineState) -> JobStatus {
    if state.next_action == Some(NextAction::Complete) || state.status == "completed" {
        JobStatus::Completed
    } else if state.next_action == Some(NextAction::Failed) || state.status.starts_with("failed") {
        JobStatus::Failed
    } else {
        JobStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_status_derivation() {
        let mut state = PipelineState {
            next_action: Some(NextAction::Complete),
            ..Default::default()
        };
        assert_eq!(final_status(&state), JobStatus::Completed);

        state.next_action = Some(NextAction::Failed);
        assert_eq!(final_status(&state), JobStatus::Failed);

        state.next_action = Some(NextAction::HumanReview);
        state.status = "failed:assemble".into();
        assert_eq!(final_status(&state), JobStatus::Failed);

        state.status = "completed".into();
        assert_eq!(final_status(&state), JobStatus::Completed);

        state.status = "video_ready".into();
        assert_eq!(final_status(&state), JobStatus::Running);
    }
}
