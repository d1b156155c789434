//! Consent-provider interface.
//!
//! The provider issues the redirect URL the user approves access on and is
//! later the source of the durable account-link state. Everything behind
//! that boundary is opaque to the engine; the trait is what the callback
//! handler and the consent-link endpoint consume.
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::EngineError;

#[async_trait]
pub trait ConsentProvider: Send + Sync {
    /// Builds the provider URL for one link attempt. The reference token is
    /// embedded so the provider's redirect carries it back to the callback.
    async fn build_link(
        &self,
        institution_id: &str,
        history_days: u32,
        reference: &str,
    ) -> Result<String, EngineError>;

    /// Exchanges the approved consent for durable account-link state.
    async fn exchange(&self, reference: &str) -> Result<(), EngineError>;
}

/// GoCardless-shaped bank-account-data provider.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    secret_id: String,
    secret_key: String,
    redirect_url: String,
}

impl HttpProvider {
    pub fn new(
        base_url: String,
        secret_id: String,
        secret_key: String,
        redirect_url: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            secret_id,
            secret_key,
            redirect_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn access_token(&self) -> Result<String, EngineError> {
        let body = self
            .post_json(
                "token/new/",
                None,
                &json!({
                    "secret_id": self.secret_id,
                    "secret_key": self.secret_key,
                }),
            )
            .await?;
        body["access"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EngineError::ProviderExchange("token response missing access".to_string()))
    }

    async fn post_json(
        &self,
        path: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Value, EngineError> {
        let mut req = self.client.post(self.url(path)).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(provider_err)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::ProviderExchange(format!("{status}: {text}")));
        }
        resp.json::<Value>().await.map_err(provider_err)
    }

    async fn get_json(&self, path: &str, token: &str) -> Result<Value, EngineError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(provider_err)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::ProviderExchange(format!("{status}: {text}")));
        }
        resp.json::<Value>().await.map_err(provider_err)
    }
}

fn provider_err(err: reqwest::Error) -> EngineError {
    EngineError::ProviderExchange(err.to_string())
}

#[async_trait]
impl ConsentProvider for HttpProvider {
    async fn build_link(
        &self,
        institution_id: &str,
        history_days: u32,
        reference: &str,
    ) -> Result<String, EngineError> {
        let token = self.access_token().await?;

        let agreement = self
            .post_json(
                "agreements/enduser/",
                Some(&token),
                &json!({
                    "institution_id": institution_id,
                    "max_historical_days": history_days.to_string(),
                    "access_valid_for_days": "30",
                    "access_scope": ["balances", "details", "transactions"],
                }),
            )
            .await?;
        let agreement_id = agreement["id"].as_str().ok_or_else(|| {
            EngineError::ProviderExchange("agreement response missing id".to_string())
        })?;

        let requisition = self
            .post_json(
                "requisitions/",
                Some(&token),
                &json!({
                    "redirect": self.redirect_url,
                    "institution_id": institution_id,
                    "reference": reference,
                    "agreement": agreement_id,
                    "user_language": "EN",
                }),
            )
            .await?;
        requisition["link"].as_str().map(str::to_string).ok_or_else(|| {
            EngineError::ProviderExchange("requisition response missing link".to_string())
        })
    }

    async fn exchange(&self, reference: &str) -> Result<(), EngineError> {
        let token = self.access_token().await?;
        let requisitions = self
            .get_json(&format!("requisitions/?reference={reference}"), &token)
            .await?;

        let accounts = requisitions["results"]
            .as_array()
            .and_then(|results| results.first())
            .and_then(|requisition| requisition["accounts"].as_array())
            .ok_or_else(|| {
                EngineError::ProviderExchange(format!("no requisition for reference {reference}"))
            })?;
        if accounts.is_empty() {
            return Err(EngineError::ProviderExchange(
                "consent approved but no accounts granted".to_string(),
            ));
        }
        tracing::info!(reference, accounts = accounts.len(), "account link exchanged");
        Ok(())
    }
}

/// Offline stand-in used in dev mode and tests: the link points nowhere
/// useful and every exchange succeeds.
#[derive(Default)]
pub struct StubProvider;

#[async_trait]
impl ConsentProvider for StubProvider {
    async fn build_link(
        &self,
        institution_id: &str,
        _history_days: u32,
        reference: &str,
    ) -> Result<String, EngineError> {
        Ok(format!(
            "https://example.invalid/psd2/start/{reference}/{institution_id}"
        ))
    }

    async fn exchange(&self, _reference: &str) -> Result<(), EngineError> {
        Ok(())
    }
}
