//! Bank-link API endpoints: consent link, event stream, provider callback.

use std::convert::Infallible;
use std::time::Duration;

use api_types::link::{ConsentLinkResponse, LinkEvent};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{
        Html,
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
    },
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::{ServerError, server::ServerState};
use engine::LinkOutcome;

/// Keepalive period for the event stream. Short enough that proxies with a
/// 60 s idle cutoff never see a silent connection.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(25);

const DEFAULT_HISTORY_DAYS: u32 = 90;

const CALLBACK_PAGE: &str =
    "<html><body><p>Bank account linked. You can close this tab and return to the app.</p></body></html>";

fn map_event(event: engine::LinkEvent) -> LinkEvent {
    match event {
        engine::LinkEvent::Linked { message } => LinkEvent::AccountLinked { message },
        engine::LinkEvent::Failed { message } => LinkEvent::LinkFailed { message },
    }
}

fn payload_frame(event: engine::LinkEvent) -> Event {
    match Event::default().json_data(map_event(event)) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::error!("failed to encode link event: {err}");
            Event::default().data("{}")
        }
    }
}

#[derive(Deserialize)]
pub struct ConsentLinkParams {
    institution_id: Option<String>,
    history_days: Option<u32>,
}

pub async fn consent_link(
    State(state): State<ServerState>,
    Query(params): Query<ConsentLinkParams>,
) -> Result<Json<ConsentLinkResponse>, ServerError> {
    let institution_id = params
        .institution_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServerError::Generic("institution_id is required".to_string()))?;
    let history_days = params.history_days.unwrap_or(DEFAULT_HISTORY_DAYS);

    let reference = state.hub.create(&institution_id, history_days);
    match state
        .provider
        .build_link(&institution_id, history_days, &reference)
        .await
    {
        Ok(link) => Ok(Json(ConsentLinkResponse { link, reference })),
        Err(err) => {
            // The session never reached the provider; keep the registry clean.
            state.hub.discard(&reference);
            Err(err.into())
        }
    }
}

#[derive(Deserialize)]
pub struct EventsParams {
    #[serde(rename = "ref")]
    reference: String,
}

/// Reference-scoped event stream.
///
/// Emits keepalive comments until the session is finalized, then exactly one
/// payload frame, then ends. An unknown or already-resolved reference ends
/// the stream immediately with no payload, which the subscriber treats as
/// "resolved or expired".
pub async fn events(
    State(state): State<ServerState>,
    Query(params): Query<EventsParams>,
) -> Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>> {
    let stream: BoxStream<'static, Result<Event, Infallible>> =
        match state.hub.subscribe(&params.reference) {
            Ok(rx) => BroadcastStream::new(rx)
                .filter_map(|received| async move { received.ok() })
                .take(1)
                .map(|event| Ok(payload_frame(event)))
                .boxed(),
            Err(err) => {
                tracing::debug!(reference = %params.reference, "event stream refused: {err}");
                stream::empty().boxed()
            }
        };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEPALIVE_PERIOD).text("keepalive"))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(rename = "ref")]
    reference: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

/// Provider-invoked redirect target.
///
/// Always answers 200: the provider must never retry, and a duplicate or
/// forged reference is a silent no-op. The outcome reaches the UI through
/// the session's event stream, not through this response.
pub async fn callback(
    State(state): State<ServerState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    let Some(reference) = params.reference else {
        tracing::warn!("callback without reference ignored");
        return (StatusCode::OK, Html(CALLBACK_PAGE));
    };

    let outcome = if let Some(error) = params.error {
        let reason = params.details.unwrap_or(error);
        LinkOutcome::Failed { reason }
    } else {
        match state.provider.exchange(&reference).await {
            Ok(()) => LinkOutcome::Linked,
            Err(err) => {
                tracing::warn!(reference, "provider exchange failed: {err}");
                LinkOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    };

    match state.hub.finalize(&reference, outcome) {
        Ok(true) => {}
        Ok(false) => tracing::debug!(reference, "duplicate callback ignored"),
        Err(err) => tracing::debug!(reference, "callback for unknown session: {err}"),
    }

    (StatusCode::OK, Html(CALLBACK_PAGE))
}
