use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod link {
    use super::*;

    /// Response of `GET /consent-link`.
    ///
    /// `link` is the provider URL the user must visit to approve access;
    /// `reference` correlates the attempt with the provider's later redirect
    /// back to the callback endpoint.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct ConsentLinkResponse {
        pub link: String,
        #[serde(rename = "ref")]
        pub reference: String,
    }

    /// Payload frame delivered on the `/events` stream.
    ///
    /// Keepalives are SSE comments and never reach this type; the stream
    /// carries at most one payload frame before ending.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum LinkEvent {
        AccountLinked { message: String },
        LinkFailed { message: String },
    }
}

pub mod job {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum JobState {
        Queued,
        Running,
        Complete,
        Error,
    }

    impl JobState {
        pub fn is_terminal(self) -> bool {
            matches!(self, Self::Complete | Self::Error)
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct JobCreated {
        pub id: Uuid,
    }

    /// Response of `GET /enrichment-jobs/{id}/status`.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct JobStatusResponse {
        pub status: JobState,
        pub progress: u64,
        pub total: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,
    }
}
