//! Reconnecting subscriber for the reference-scoped event stream.
//!
//! Mirrors what a browser `EventSource` plus a reconnect timer does: connect,
//! ignore keepalive comments, hand the single payload frame to the owner,
//! and on any drop reconnect after a fixed backoff. Reconnects are bounded;
//! once exhausted the owner falls back to a one-shot status check.

use std::time::Duration;

use api_types::link::LinkEvent;
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::api::{ApiClient, ClientError};
use crate::cancel::{CancelSignal, CancelToken};

#[derive(Clone, Copy, Debug)]
pub struct SubscriberOptions {
    /// Fixed delay before re-issuing the subscription after a drop.
    pub backoff: Duration,
    /// Connection attempts before giving up.
    pub max_attempts: u32,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// Owns the background subscription task for one reference token.
pub struct LinkSubscriber {
    cancel: CancelToken,
    completion: oneshot::Receiver<Result<LinkEvent, ClientError>>,
}

impl LinkSubscriber {
    pub fn spawn(api: ApiClient, reference: String) -> Self {
        Self::spawn_with(api, reference, SubscriberOptions::default())
    }

    pub fn spawn_with(api: ApiClient, reference: String, options: SubscriberOptions) -> Self {
        let (cancel, signal) = CancelToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(subscribe_loop(api, reference, options, signal, done_tx));
        Self {
            cancel,
            completion: done_rx,
        }
    }

    /// Tears the subscription down: no further reconnects, no dangling
    /// timers. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Waits for the one-time completion. Exactly one of: the payload event,
    /// `Cancelled`, or `RetriesExhausted`.
    pub async fn completed(self) -> Result<LinkEvent, ClientError> {
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Cancelled),
        }
    }
}

enum StreamOutcome {
    Event(LinkEvent),
    Ended,
    Cancelled,
    Failed(reqwest::Error),
}

async fn subscribe_loop(
    api: ApiClient,
    reference: String,
    options: SubscriberOptions,
    mut cancel: CancelSignal,
    done: oneshot::Sender<Result<LinkEvent, ClientError>>,
) {
    let mut attempts = 0;
    let outcome = loop {
        if attempts >= options.max_attempts {
            tracing::warn!(reference, attempts, "giving up on event stream");
            break Err(ClientError::RetriesExhausted);
        }
        attempts += 1;

        tokio::select! {
            _ = cancel.cancelled() => break Err(ClientError::Cancelled),
            connected = api.events(&reference) => match connected {
                Ok(response) => match read_stream(response, &mut cancel).await {
                    StreamOutcome::Event(event) => break Ok(event),
                    StreamOutcome::Cancelled => break Err(ClientError::Cancelled),
                    StreamOutcome::Ended => {
                        // A clean end without a payload means the session
                        // resolved elsewhere or expired; retry like a drop so
                        // a server restart mid-flow is survivable.
                        tracing::debug!(reference, "event stream ended without payload");
                    }
                    StreamOutcome::Failed(err) => {
                        tracing::debug!(reference, "event stream dropped: {err}");
                    }
                },
                Err(err) => tracing::debug!(reference, "event stream connect failed: {err}"),
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => break Err(ClientError::Cancelled),
            _ = sleep(options.backoff) => {}
        }
    };

    let _ = done.send(outcome);
}

async fn read_stream(mut response: reqwest::Response, cancel: &mut CancelSignal) -> StreamOutcome {
    let mut buffer = String::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            chunk = response.chunk() => match chunk {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(end) = buffer.find("\n\n") {
                        let frame = buffer[..end].to_string();
                        buffer.drain(..end + 2);
                        if let Some(event) = parse_frame(&frame) {
                            return StreamOutcome::Event(event);
                        }
                    }
                }
                Ok(None) => return StreamOutcome::Ended,
                Err(err) => return StreamOutcome::Failed(err),
            },
        }
    }
}

/// Extracts the payload from one SSE frame, if it carries one.
///
/// Comment lines (`: keepalive`) and unknown fields are inert by contract
/// and must never be parsed as payload.
fn parse_frame(frame: &str) -> Option<LinkEvent> {
    let mut data = String::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data.is_empty() {
        return None;
    }

    match serde_json::from_str(&data) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!("unparseable event payload ignored: {err}");
            None
        }
    }
}
