//! Polling loop for enrichment jobs.

use std::time::Duration;

use api_types::job::{JobState, JobStatusResponse};
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::api::{ApiClient, ClientError};
use crate::cancel::CancelSignal;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_BUDGET: Duration = Duration::from_secs(600);

/// Starts an enrichment job and polls it to a terminal status.
pub struct JobPoller {
    api: ApiClient,
    interval: Duration,
    budget: Duration,
}

impl JobPoller {
    pub fn new(api: ApiClient) -> Self {
        Self::with_timing(api, DEFAULT_INTERVAL, DEFAULT_BUDGET)
    }

    /// `interval` is the fixed delay between polls; `budget` caps the whole
    /// wait in wall-clock time so a stuck job cannot pin the loop forever.
    pub fn with_timing(api: ApiClient, interval: Duration, budget: Duration) -> Self {
        Self {
            api,
            interval,
            budget,
        }
    }

    pub async fn start(&self) -> Result<Uuid, ClientError> {
        Ok(self.api.start_enrichment().await?.id)
    }

    /// Polls until the job completes or fails.
    ///
    /// `Complete` resolves with the final status; `Error` surfaces the
    /// embedded message; cancellation stops the loop between polls without
    /// another network call. Each poll is idempotent, so a retried or
    /// duplicated call observes the same terminal answer.
    pub async fn wait(
        &self,
        id: Uuid,
        mut cancel: CancelSignal,
    ) -> Result<JobStatusResponse, ClientError> {
        let deadline = Instant::now() + self.budget;
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let status = self.api.job_status(id).await?;
            match status.status {
                JobState::Complete => return Ok(status),
                JobState::Error => {
                    let message = status
                        .error
                        .unwrap_or_else(|| "unknown enrichment error".to_string());
                    return Err(ClientError::Enrichment(message));
                }
                JobState::Queued | JobState::Running => {}
            }

            if Instant::now() + self.interval >= deadline {
                return Err(ClientError::DeadlineExceeded);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = sleep(self.interval) => {}
            }
        }
    }
}
