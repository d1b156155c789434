//! Reference-keyed link sessions and their notification fan-out.
//!
//! A consent flow leaves the browser for the provider's domain and comes
//! back through a server-side callback that shares nothing with the
//! originating session. The [`LinkHub`] bridges the two: the reference token
//! handed out at link creation keys a broadcast channel, the callback
//! finalizes the session exactly once, and every subscriber attached at that
//! moment receives the terminal event.
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::EngineError;

/// Pending sessions older than this are considered abandoned.
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 15;

/// How long a finalized session without subscribers survives, so a slow
/// reconnect still finds a closed channel instead of an unknown reference.
pub const DEFAULT_EVICT_GRACE_SECONDS: i64 = 60;

const CHANNEL_CAPACITY: usize = 8;

/// Lifecycle of one link attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Pending,
    Linked,
    Failed,
}

/// Terminal outcome reported by the callback handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    Failed { reason: String },
}

/// The one payload ever delivered on a session's channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Linked { message: String },
    Failed { message: String },
}

/// Snapshot of a not-yet-finalized link attempt.
#[derive(Clone, Debug)]
pub struct PendingLink {
    pub reference: String,
    pub institution_id: String,
    pub history_days: u32,
    pub created_at: DateTime<Utc>,
}

struct LinkSession {
    created_at: DateTime<Utc>,
    finalized_at: Option<DateTime<Utc>>,
    state: LinkState,
    institution_id: String,
    history_days: u32,
    events: broadcast::Sender<LinkEvent>,
}

/// Process-wide registry of link sessions.
///
/// Construct one per process (or per test) and share it behind an `Arc`;
/// the map is the only shared mutable state and the mutex is never held
/// across an await point.
pub struct LinkHub {
    sessions: Mutex<HashMap<String, LinkSession>>,
    ttl: Duration,
    grace: Duration,
}

impl Default for LinkHub {
    fn default() -> Self {
        Self::new(
            Duration::minutes(DEFAULT_SESSION_TTL_MINUTES),
            Duration::seconds(DEFAULT_EVICT_GRACE_SECONDS),
        )
    }
}

impl LinkHub {
    pub fn new(ttl: Duration, grace: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            grace,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, LinkSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a fresh pending session and returns its reference token.
    ///
    /// Token collisions are retried internally, so this cannot fail.
    pub fn create(&self, institution_id: &str, history_days: u32) -> String {
        let mut sessions = self.sessions();
        loop {
            let token = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = sessions.entry(token.clone()) {
                let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
                slot.insert(LinkSession {
                    created_at: Utc::now(),
                    finalized_at: None,
                    state: LinkState::Pending,
                    institution_id: institution_id.to_string(),
                    history_days,
                    events,
                });
                tracing::info!(reference = %token, institution_id, "link session created");
                return token;
            }
        }
    }

    /// Attaches a subscriber to a pending session.
    ///
    /// Unknown and already-finalized references both return `KeyNotFound`:
    /// a late subscriber must treat the attempt as resolved or expired and
    /// fall back to a one-shot status check.
    pub fn subscribe(&self, reference: &str) -> Result<broadcast::Receiver<LinkEvent>, EngineError> {
        let sessions = self.sessions();
        match sessions.get(reference) {
            Some(session) if session.state == LinkState::Pending => Ok(session.events.subscribe()),
            _ => Err(EngineError::KeyNotFound(reference.to_string())),
        }
    }

    /// Transitions a pending session to its terminal state and publishes the
    /// event to every subscriber attached right now.
    ///
    /// Returns `Ok(true)` on the first call; a duplicate callback for an
    /// already-finalized session is a no-op returning `Ok(false)` and emits
    /// nothing. Publishing only hands the event to each subscriber's buffer;
    /// it never waits on the network.
    pub fn finalize(&self, reference: &str, outcome: LinkOutcome) -> Result<bool, EngineError> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(reference)
            .ok_or_else(|| EngineError::KeyNotFound(reference.to_string()))?;

        if session.state != LinkState::Pending {
            tracing::debug!(reference, "duplicate finalize ignored");
            return Ok(false);
        }

        let (state, event) = match outcome {
            LinkOutcome::Linked => (
                LinkState::Linked,
                LinkEvent::Linked {
                    message: "Bank account successfully linked!".to_string(),
                },
            ),
            LinkOutcome::Failed { reason } => (
                LinkState::Failed,
                LinkEvent::Failed {
                    message: format!("Bank link failed: {reason}"),
                },
            ),
        };

        session.state = state;
        session.finalized_at = Some(Utc::now());
        let delivered = session.events.send(event).unwrap_or(0);
        tracing::info!(reference, subscribers = delivered, ?state, "link session finalized");
        Ok(true)
    }

    /// Current state of a session, if it still exists.
    pub fn state(&self, reference: &str) -> Result<LinkState, EngineError> {
        self.sessions()
            .get(reference)
            .map(|session| session.state)
            .ok_or_else(|| EngineError::KeyNotFound(reference.to_string()))
    }

    /// Drops a session outright. Used when building the provider link fails
    /// after the session was already stored.
    pub fn discard(&self, reference: &str) {
        self.sessions().remove(reference);
    }

    /// Not-yet-finalized attempts, oldest first.
    pub fn pending(&self) -> Vec<PendingLink> {
        let sessions = self.sessions();
        let mut pending: Vec<PendingLink> = sessions
            .iter()
            .filter(|(_, session)| session.state == LinkState::Pending)
            .map(|(reference, session)| PendingLink {
                reference: reference.clone(),
                institution_id: session.institution_id.clone(),
                history_days: session.history_days,
                created_at: session.created_at,
            })
            .collect();
        pending.sort_by_key(|link| link.created_at);
        pending
    }

    /// Number of subscribers currently attached to a session's channel.
    pub fn subscriber_count(&self, reference: &str) -> usize {
        self.sessions()
            .get(reference)
            .map(|session| session.events.receiver_count())
            .unwrap_or(0)
    }

    pub fn pending_count(&self) -> usize {
        self.sessions()
            .values()
            .filter(|session| session.state == LinkState::Pending)
            .count()
    }

    /// Evicts abandoned and fully-delivered sessions.
    ///
    /// Pending sessions expire after the TTL regardless of subscribers.
    /// Finalized sessions stay while any subscriber is attached or the grace
    /// period since finalization has not elapsed. The whole pass runs under
    /// the map lock, so it cannot race a concurrent finalize.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|reference, session| {
            let keep = match session.state {
                LinkState::Pending => now - session.created_at <= self.ttl,
                LinkState::Linked | LinkState::Failed => {
                    let since_final = session
                        .finalized_at
                        .map(|at| now - at)
                        .unwrap_or_else(Duration::zero);
                    session.events.receiver_count() > 0 || since_final <= self.grace
                }
            };
            if !keep {
                tracing::debug!(reference, state = ?session.state, "evicting link session");
            }
            keep
        });
        before - sessions.len()
    }
}
