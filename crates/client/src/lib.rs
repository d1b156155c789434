//! Consumer side of the bank-link and enrichment APIs.
//!
//! Two long-lived loops live here, both cancellable: the [`LinkSubscriber`],
//! which keeps a best-effort event-stream connection open for one reference
//! token and fires a one-time completion when the link resolves, and the
//! [`JobPoller`], which drives an enrichment job to a terminal status on a
//! fixed polling interval.

pub use api::{ApiClient, ClientError};
pub use cancel::{CancelSignal, CancelToken};
pub use poller::JobPoller;
pub use subscriber::{LinkSubscriber, SubscriberOptions};

mod api;
mod cancel;
mod poller;
mod subscriber;
