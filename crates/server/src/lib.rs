use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::EngineError;

use serde::Serialize;
pub use server::{ServerState, router, run, run_with_listener, spawn_with_listener};

mod jobs;
mod link;
mod server;

pub mod types {
    pub mod link {
        pub use api_types::link::{ConsentLinkResponse, LinkEvent};
    }

    pub mod job {
        pub use api_types::job::{JobCreated, JobState, JobStatusResponse};
    }
}

pub enum ServerError {
    Engine(EngineError),
    Generic(String),
}

//TODO: Find a better solution
#[derive(Serialize)]
struct Error {
    error: String,
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::ExistingKey(_) => StatusCode::CONFLICT,
        EngineError::ProviderExchange(_) => StatusCode::BAD_GATEWAY,
        EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
}

fn message_for_engine_error(err: EngineError) -> String {
    match err {
        EngineError::ProviderExchange(detail) => {
            tracing::error!("provider exchange error: {detail}");
            "consent provider error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            ServerError::Engine(err) => {
                (status_for_engine_error(&err), message_for_engine_error(err))
            }
            ServerError::Generic(err) => (StatusCode::BAD_REQUEST, err),
        };

        (status, Json(Error { error })).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}
