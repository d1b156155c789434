use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

use engine::{
    EngineError, EnrichmentRunner, FixedBatchRunner, JobHandle, JobState, JobTracker,
};

/// Hands its job handle to the test and then parks forever, so the test
/// drives every transition itself.
struct RelayRunner {
    handle_tx: Mutex<Option<oneshot::Sender<JobHandle>>>,
}

impl RelayRunner {
    fn new() -> (Arc<Self>, oneshot::Receiver<JobHandle>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                handle_tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }
}

#[async_trait]
impl EnrichmentRunner for RelayRunner {
    async fn run(&self, job: JobHandle) -> Result<(), EngineError> {
        if let Some(tx) = self.handle_tx.lock().unwrap().take() {
            let _ = tx.send(job);
        }
        std::future::pending::<()>().await;
        Ok(())
    }
}

struct FailingRunner;

#[async_trait]
impl EnrichmentRunner for FailingRunner {
    async fn run(&self, job: JobHandle) -> Result<(), EngineError> {
        job.set_running();
        Err(EngineError::InvalidRequest("no transactions to enrich".to_string()))
    }
}

async fn wait_for(tracker: &JobTracker, id: uuid::Uuid, state: JobState) -> engine::JobSnapshot {
    timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = tracker.status(id).unwrap();
            if snapshot.status == state {
                return snapshot;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not reach expected state")
}

#[tokio::test]
async fn new_job_starts_queued_with_zero_progress() {
    let tracker = JobTracker::new();
    let (runner, _handle_rx) = RelayRunner::new();
    let id = tracker.start(runner);

    let snapshot = tracker.status(id).unwrap();
    assert_eq!(snapshot.status, JobState::Queued);
    assert_eq!(snapshot.progress, 0);
    assert_eq!(snapshot.total, 0);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn status_unknown_job_fails() {
    let tracker = JobTracker::new();
    assert!(matches!(
        tracker.status(uuid::Uuid::new_v4()),
        Err(EngineError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn progress_is_monotonic_and_regressions_are_ignored() {
    let tracker = JobTracker::new();
    let (runner, handle_rx) = RelayRunner::new();
    let id = tracker.start(runner);
    let handle = handle_rx.await.unwrap();

    handle.set_running();
    handle.advance(40, 100);
    assert_eq!(tracker.status(id).unwrap().progress, 40);

    // A duplicated or reordered runner step cannot move the job backwards.
    handle.advance(25, 100);
    let snapshot = tracker.status(id).unwrap();
    assert_eq!(snapshot.status, JobState::Running);
    assert_eq!(snapshot.progress, 40);
    assert_eq!(snapshot.total, 100);
}

#[tokio::test]
async fn terminal_status_is_stable_under_further_polls_and_writes() {
    let tracker = JobTracker::new();
    let (runner, handle_rx) = RelayRunner::new();
    let id = tracker.start(runner);
    let handle = handle_rx.await.unwrap();

    handle.set_running();
    handle.advance(100, 100);
    handle.complete();

    let first = tracker.status(id).unwrap();
    assert_eq!(first.status, JobState::Complete);

    // Late writes from a stale runner are no-ops.
    handle.fail("too late".to_string());
    handle.advance(1, 1);

    let second = tracker.status(id).unwrap();
    assert_eq!(second.status, JobState::Complete);
    assert_eq!(second.progress, 100);
    assert!(second.error.is_none());
}

#[tokio::test]
async fn failing_runner_surfaces_error_message() {
    let tracker = JobTracker::new();
    let id = tracker.start(Arc::new(FailingRunner));

    let snapshot = wait_for(&tracker, id, JobState::Error).await;
    let error = snapshot.error.unwrap();
    assert!(error.contains("no transactions to enrich"));
}

#[tokio::test]
async fn fixed_batch_runner_runs_to_completion() {
    let tracker = JobTracker::new();
    let id = tracker.start(Arc::new(FixedBatchRunner {
        total: 100,
        step: 50,
        pace: Duration::from_millis(5),
    }));

    let snapshot = wait_for(&tracker, id, JobState::Complete).await;
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.total, 100);

    // Re-polling a terminal job answers identically.
    let again = tracker.status(id).unwrap();
    assert_eq!(again.status, JobState::Complete);
    assert_eq!(again.progress, 100);
}
