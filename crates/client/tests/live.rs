use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use api_types::link::LinkEvent;
use client::{ApiClient, CancelToken, ClientError, JobPoller, LinkSubscriber, SubscriberOptions};
use engine::{
    EngineError, EnrichmentRunner, FixedBatchRunner, JobHandle, JobTracker, LinkHub, LinkOutcome,
    StubProvider,
};
use server::ServerState;

const TOKEN: &str = "test-token";

fn state_with(hub: Arc<LinkHub>, runner: Arc<dyn EnrichmentRunner>) -> ServerState {
    ServerState {
        hub,
        jobs: Arc::new(JobTracker::new()),
        provider: Arc::new(StubProvider),
        runner,
        auth_token: Arc::from(TOKEN),
    }
}

async fn spawn_server(state: ServerState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = server::spawn_with_listener(state, listener).unwrap();
    format!("http://{addr}")
}

async fn wait_for_subscriber(hub: &LinkHub, reference: &str) {
    timeout(Duration::from_secs(5), async {
        while hub.subscriber_count(reference) == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber never attached");
}

struct FailingRunner;

#[async_trait]
impl EnrichmentRunner for FailingRunner {
    async fn run(&self, job: JobHandle) -> Result<(), EngineError> {
        job.set_running();
        Err(EngineError::InvalidRequest("model unavailable".to_string()))
    }
}

struct ParkedRunner;

#[async_trait]
impl EnrichmentRunner for ParkedRunner {
    async fn run(&self, job: JobHandle) -> Result<(), EngineError> {
        job.set_running();
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn subscriber_completes_when_callback_lands() {
    let hub = Arc::new(LinkHub::default());
    let base = spawn_server(state_with(
        Arc::clone(&hub),
        Arc::new(FixedBatchRunner::default()),
    ))
    .await;
    let api = ApiClient::new(base.clone(), TOKEN.to_string());

    let link = api.consent_link("ins_test", 90).await.unwrap();
    let subscriber = LinkSubscriber::spawn(api, link.reference.clone());
    wait_for_subscriber(&hub, &link.reference).await;

    // Provider redirect arrives at the callback endpoint.
    let callback = reqwest::get(format!("{base}/link-callback?ref={}", link.reference))
        .await
        .unwrap();
    assert!(callback.status().is_success());

    let event = timeout(Duration::from_secs(5), subscriber.completed())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LinkEvent::AccountLinked { .. }));
}

#[tokio::test]
async fn subscriber_survives_stream_drop_and_still_fires_once() {
    // Generation one of the server knows nothing about the reference, so the
    // stream ends straight away and the subscriber keeps retrying. Then the
    // listener goes away entirely (connect failures), and finally a second
    // generation with the real session comes up on the same address.
    let hub = Arc::new(LinkHub::default());
    let reference = hub.create("ins_test", 90);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let empty_state = state_with(
        Arc::new(LinkHub::default()),
        Arc::new(FixedBatchRunner::default()),
    );
    let first_generation = tokio::spawn(server::run_with_listener(empty_state, listener));

    let api = ApiClient::new(format!("http://{addr}"), TOKEN.to_string());
    let subscriber = LinkSubscriber::spawn_with(
        api,
        reference.clone(),
        SubscriberOptions {
            backoff: Duration::from_millis(50),
            max_attempts: 200,
        },
    );

    // Let it run a few futile connect cycles, then take the server down.
    sleep(Duration::from_millis(150)).await;
    first_generation.abort();
    sleep(Duration::from_millis(100)).await;

    let listener = timeout(Duration::from_secs(5), async {
        loop {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => return listener,
                Err(_) => sleep(Duration::from_millis(25)).await,
            }
        }
    })
    .await
    .expect("could not rebind listener");
    server::spawn_with_listener(
        state_with(Arc::clone(&hub), Arc::new(FixedBatchRunner::default())),
        listener,
    )
    .unwrap();

    wait_for_subscriber(&hub, &reference).await;
    hub.finalize(&reference, LinkOutcome::Linked).unwrap();

    let event = timeout(Duration::from_secs(5), subscriber.completed())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LinkEvent::AccountLinked { .. }));
}

#[tokio::test]
async fn stopped_subscriber_reports_cancelled_and_detaches() {
    let hub = Arc::new(LinkHub::default());
    let base = spawn_server(state_with(
        Arc::clone(&hub),
        Arc::new(FixedBatchRunner::default()),
    ))
    .await;
    let api = ApiClient::new(base, TOKEN.to_string());

    let link = api.consent_link("ins_test", 90).await.unwrap();
    let subscriber = LinkSubscriber::spawn(api, link.reference.clone());
    wait_for_subscriber(&hub, &link.reference).await;

    subscriber.stop();
    let outcome = timeout(Duration::from_secs(5), subscriber.completed())
        .await
        .unwrap();
    assert!(matches!(outcome, Err(ClientError::Cancelled)));

    // The connection goes away with the task, nothing keeps polling.
    timeout(Duration::from_secs(5), async {
        while hub.subscriber_count(&link.reference) > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber connection lingered");
}

#[tokio::test]
async fn bounded_retries_give_up_on_unknown_reference() {
    let hub = Arc::new(LinkHub::default());
    let base = spawn_server(state_with(hub, Arc::new(FixedBatchRunner::default()))).await;
    let api = ApiClient::new(base, TOKEN.to_string());

    let subscriber = LinkSubscriber::spawn_with(
        api,
        "never-created".to_string(),
        SubscriberOptions {
            backoff: Duration::from_millis(10),
            max_attempts: 3,
        },
    );

    let outcome = timeout(Duration::from_secs(5), subscriber.completed())
        .await
        .unwrap();
    assert!(matches!(outcome, Err(ClientError::RetriesExhausted)));
}

#[tokio::test]
async fn poller_drives_job_to_completion() {
    let base = spawn_server(state_with(
        Arc::new(LinkHub::default()),
        Arc::new(FixedBatchRunner {
            total: 50,
            step: 25,
            pace: Duration::from_millis(10),
        }),
    ))
    .await;
    let api = ApiClient::new(base, TOKEN.to_string());
    let poller = JobPoller::with_timing(api, Duration::from_millis(20), Duration::from_secs(5));

    let id = poller.start().await.unwrap();
    let (_token, signal) = CancelToken::new();
    let status = poller.wait(id, signal).await.unwrap();
    assert_eq!(status.status, api_types::job::JobState::Complete);
    assert_eq!(status.progress, 50);
    assert_eq!(status.total, 50);
}

#[tokio::test]
async fn poller_surfaces_job_error_message() {
    let base = spawn_server(state_with(
        Arc::new(LinkHub::default()),
        Arc::new(FailingRunner),
    ))
    .await;
    let api = ApiClient::new(base, TOKEN.to_string());
    let poller = JobPoller::with_timing(api, Duration::from_millis(20), Duration::from_secs(5));

    let id = poller.start().await.unwrap();
    let (_token, signal) = CancelToken::new();
    match poller.wait(id, signal).await {
        Err(ClientError::Enrichment(message)) => assert!(message.contains("model unavailable")),
        other => panic!("expected enrichment error, got {other:?}"),
    }
}

#[tokio::test]
async fn poller_stops_promptly_when_cancelled() {
    let base = spawn_server(state_with(
        Arc::new(LinkHub::default()),
        Arc::new(ParkedRunner),
    ))
    .await;
    let api = ApiClient::new(base, TOKEN.to_string());
    let poller = JobPoller::with_timing(api, Duration::from_millis(50), Duration::from_secs(60));

    let id = poller.start().await.unwrap();
    let (token, signal) = CancelToken::new();
    let waiter = tokio::spawn(async move { poller.wait(id, signal).await });

    sleep(Duration::from_millis(120)).await;
    token.cancel();

    let outcome = timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(ClientError::Cancelled)));
}

#[tokio::test]
async fn unauthenticated_poller_start_is_rejected() {
    let base = spawn_server(state_with(
        Arc::new(LinkHub::default()),
        Arc::new(FixedBatchRunner::default()),
    ))
    .await;
    let api = ApiClient::new(base, "wrong-token".to_string());
    let poller = JobPoller::new(api);

    match poller.start().await {
        Err(ClientError::Server { status, .. }) => {
            assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
        }
        other => panic!("expected 401, got {other:?}"),
    }
}
