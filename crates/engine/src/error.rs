//! The module contains the errors the engine can throw.
//!
//! The errors are:
//!
//! - [`KeyNotFound`] thrown when a reference token or job id is unknown.
//! - [`ProviderExchange`] thrown when the consent provider rejects an
//!   artifact exchange.
//!
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`ProviderExchange`]: EngineError::ProviderExchange
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug, PartialEq)]
pub enum EngineError {
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("provider exchange failed: {0}")]
    ProviderExchange(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
