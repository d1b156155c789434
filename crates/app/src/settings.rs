//! Handles settings for the application. Configuration is written in
//! `settings.toml`.
use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
    pub auth_token: String,
    pub session_ttl_minutes: Option<i64>,
    pub evict_grace_seconds: Option<i64>,
}

/// Consent-provider credentials. Left out entirely, the app runs with the
/// offline stub provider.
#[derive(Debug, Deserialize)]
pub struct Provider {
    pub base_url: String,
    pub secret_id: String,
    pub secret_key: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub server: Server,
    pub provider: Option<Provider>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings"))
            .build()?;

        settings.try_deserialize()
    }
}
