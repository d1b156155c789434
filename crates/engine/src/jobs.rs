//! Asynchronous enrichment jobs.
//!
//! A job is started by one request and observed by any number of others
//! through idempotent status polls. The tracker owns the registry; the
//! classification work itself is a black box behind [`EnrichmentRunner`]
//! and drives its job through a [`JobHandle`].
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineError;

/// Lifecycle of an enrichment job. `Complete` and `Error` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Complete,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Point-in-time view of a job, as returned to pollers.
#[derive(Clone, Debug)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub status: JobState,
    pub progress: u64,
    pub total: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

struct JobRecord {
    status: JobState,
    progress: u64,
    total: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    error: Option<String>,
}

/// The enrichment work itself, out-of-band from any request.
///
/// Implementations report progress through the handle; returning `Err`
/// (or panicking, or being cancelled) marks the job failed, returning `Ok`
/// completes it.
#[async_trait]
pub trait EnrichmentRunner: Send + Sync {
    async fn run(&self, job: JobHandle) -> Result<(), EngineError>;
}

type Jobs = Arc<Mutex<HashMap<Uuid, JobRecord>>>;

/// In-process registry of enrichment jobs.
#[derive(Default)]
pub struct JobTracker {
    jobs: Jobs,
}

fn lock(jobs: &Jobs) -> MutexGuard<'_, HashMap<Uuid, JobRecord>> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a queued job and spawns the runner for it.
    ///
    /// The id is returned immediately; the runner advances the job
    /// out-of-band. A terminal job is never restarted, a re-run means a new
    /// job.
    pub fn start(&self, runner: Arc<dyn EnrichmentRunner>) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        lock(&self.jobs).insert(
            id,
            JobRecord {
                status: JobState::Queued,
                progress: 0,
                total: 0,
                created_at: now,
                updated_at: now,
                error: None,
            },
        );

        let handle = JobHandle {
            id,
            jobs: Arc::clone(&self.jobs),
        };
        tokio::spawn(async move {
            tracing::info!(job_id = %id, "enrichment job started");
            match runner.run(handle.clone()).await {
                Ok(()) => handle.complete(),
                Err(err) => {
                    tracing::warn!(job_id = %id, "enrichment job failed: {err}");
                    handle.fail(err.to_string());
                }
            }
        });

        id
    }

    /// Current status of a job. Safe to call any number of times; terminal
    /// jobs keep answering with the same snapshot.
    pub fn status(&self, id: Uuid) -> Result<JobSnapshot, EngineError> {
        let jobs = lock(&self.jobs);
        let record = jobs
            .get(&id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))?;
        Ok(JobSnapshot {
            id,
            status: record.status,
            progress: record.progress,
            total: record.total,
            created_at: record.created_at,
            updated_at: record.updated_at,
            error: record.error.clone(),
        })
    }
}

/// Write side of one job, held by its runner.
///
/// Progress is clamped monotonic and every mutation is a no-op once the job
/// is terminal, so a racing or duplicated runner step can never move a job
/// backwards.
#[derive(Clone)]
pub struct JobHandle {
    id: Uuid,
    jobs: Jobs,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn update(&self, apply: impl FnOnce(&mut JobRecord)) {
        let mut jobs = lock(&self.jobs);
        if let Some(record) = jobs.get_mut(&self.id) {
            if record.status.is_terminal() {
                return;
            }
            apply(record);
            record.updated_at = Utc::now();
        }
    }

    pub fn set_running(&self) {
        self.update(|record| {
            if record.status == JobState::Queued {
                record.status = JobState::Running;
            }
        });
    }

    /// Reports progress. Regressions are ignored.
    pub fn advance(&self, progress: u64, total: u64) {
        self.update(|record| {
            record.progress = record.progress.max(progress);
            record.total = record.total.max(total);
        });
    }

    pub fn complete(&self) {
        self.update(|record| {
            record.status = JobState::Complete;
            record.progress = record.progress.max(record.total);
        });
    }

    pub fn fail(&self, message: String) {
        self.update(|record| {
            record.status = JobState::Error;
            record.error = Some(message);
        });
    }
}

/// Dev-mode runner that walks a fixed batch in even steps.
///
/// Stands in for the real enrichment engine when none is configured, the
/// same way the stub consent provider stands in for the real one.
pub struct FixedBatchRunner {
    pub total: u64,
    pub step: u64,
    pub pace: std::time::Duration,
}

impl Default for FixedBatchRunner {
    fn default() -> Self {
        Self {
            total: 100,
            step: 20,
            pace: std::time::Duration::from_millis(200),
        }
    }
}

#[async_trait]
impl EnrichmentRunner for FixedBatchRunner {
    async fn run(&self, job: JobHandle) -> Result<(), EngineError> {
        job.set_running();
        let mut done = 0;
        while done < self.total {
            tokio::time::sleep(self.pace).await;
            done = (done + self.step.max(1)).min(self.total);
            job.advance(done, self.total);
        }
        Ok(())
    }
}
