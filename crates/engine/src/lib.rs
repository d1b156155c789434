//! Coordination core for bank linking and transaction enrichment.
//!
//! Two registries live here: the [`LinkHub`], which correlates a consent
//! flow's browser tab with the provider's server-side callback through a
//! reference-keyed broadcast channel, and the [`JobTracker`], which drives
//! enrichment jobs from queued to a terminal state under idempotent polls.
//! The HTTP layer on top lives in the `server` crate.

pub use error::EngineError;
pub use jobs::{
    EnrichmentRunner, FixedBatchRunner, JobHandle, JobSnapshot, JobState, JobTracker,
};
pub use link::{
    DEFAULT_EVICT_GRACE_SECONDS, DEFAULT_SESSION_TTL_MINUTES, LinkEvent, LinkHub, LinkOutcome,
    LinkState, PendingLink,
};
pub use provider::{ConsentProvider, HttpProvider, StubProvider};

mod error;
mod jobs;
mod link;
mod provider;
