use std::sync::Arc;

use chrono::{Duration, Utc};
use engine::{
    ConsentProvider, DEFAULT_EVICT_GRACE_SECONDS, DEFAULT_SESSION_TTL_MINUTES, FixedBatchRunner,
    HttpProvider, JobTracker, LinkHub, StubProvider,
};
use server::ServerState;

mod settings;

const SWEEP_PERIOD: std::time::Duration = std::time::Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;
    let mut tasks = tokio::task::JoinSet::new();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "bankstream={level},server={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let hub = Arc::new(LinkHub::new(
        Duration::minutes(
            settings
                .server
                .session_ttl_minutes
                .unwrap_or(DEFAULT_SESSION_TTL_MINUTES),
        ),
        Duration::seconds(
            settings
                .server
                .evict_grace_seconds
                .unwrap_or(DEFAULT_EVICT_GRACE_SECONDS),
        ),
    ));

    let provider: Arc<dyn ConsentProvider> = match settings.provider {
        Some(provider) => Arc::new(HttpProvider::new(
            provider.base_url,
            provider.secret_id,
            provider.secret_key,
            provider.redirect_url,
        )),
        None => {
            tracing::warn!("no provider settings, running with the stub provider");
            Arc::new(StubProvider)
        }
    };

    let state = ServerState {
        hub: Arc::clone(&hub),
        jobs: Arc::new(JobTracker::new()),
        provider,
        runner: Arc::new(FixedBatchRunner::default()),
        auth_token: Arc::from(settings.server.auth_token.as_str()),
    };

    let sweep_hub = Arc::clone(&hub);
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_PERIOD);
        loop {
            ticker.tick().await;
            let evicted = sweep_hub.sweep(Utc::now());
            if evicted > 0 {
                tracing::debug!(
                    evicted,
                    pending = sweep_hub.pending_count(),
                    "link session sweep"
                );
            }
        }
    });

    tasks.spawn(async move {
        let bind = settings.server.bind.unwrap_or_else(|| "127.0.0.1".to_string());
        let addr = format!("{}:{}", bind, settings.server.port);
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!("failed to bind server listener: {err}");
                return;
            }
        };
        if let Err(err) = server::run_with_listener(state, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    while tasks.join_next().await.is_some() {
        tasks.shutdown().await;
    }

    Ok(())
}
