use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use std::sync::Arc;

use crate::{jobs, link};
use engine::{ConsentProvider, EnrichmentRunner, JobTracker, LinkHub};

#[derive(Clone)]
pub struct ServerState {
    pub hub: Arc<LinkHub>,
    pub jobs: Arc<JobTracker>,
    pub provider: Arc<dyn ConsentProvider>,
    pub runner: Arc<dyn EnrichmentRunner>,
    pub auth_token: Arc<str>,
}

/// Bearer-token check for the client-facing routes.
///
/// The identity provider is an opaque token source; the server only
/// compares the presented token against the configured one. The callback
/// and event-stream routes sit outside this layer: the provider redirect
/// carries no bearer token and the reference token itself scopes `/events`.
async fn auth(
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(TypedHeader(auth_header)) = auth_header else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    if auth_header.token().is_empty() || auth_header.token() != state.auth_token.as_ref() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub fn router(state: ServerState) -> Router {
    let protected = Router::new()
        .route("/consent-link", get(link::consent_link))
        .route("/enrichment-jobs", post(jobs::create))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    Router::new()
        .merge(protected)
        .route("/events", get(link::events))
        .route("/link-callback", get(link::callback))
        .route("/enrichment-jobs/{id}/status", get(jobs::status))
        .with_state(state)
}

pub async fn run(state: ServerState) {
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:3000").await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind server listener: {err}");
            return;
        }
    };
    if let Err(err) = run_with_listener(state, listener).await {
        tracing::error!("server failed: {err}");
    }
}

pub async fn run_with_listener(
    state: ServerState,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(state)).await
}

pub fn spawn_with_listener(
    state: ServerState,
    listener: tokio::net::TcpListener,
) -> Result<std::net::SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(state, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}
