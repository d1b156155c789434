use api_types::job::{JobCreated, JobStatusResponse};
use api_types::link::ConsentLinkResponse;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{status}: {message}")]
    Server { status: StatusCode, message: String },
    #[error("enrichment failed: {0}")]
    Enrichment(String),
    #[error("cancelled")]
    Cancelled,
    #[error("retries exhausted")]
    RetriesExhausted,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ApiClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json<TResp: for<'de> serde::Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<TResp, ClientError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<TResp>().await?);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(err) => err.error,
            Err(_) => "server error".to_string(),
        };
        Err(ClientError::Server { status, message })
    }

    async fn post_json<TResp: for<'de> serde::Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<TResp, ClientError> {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<TResp>().await?);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(err) => err.error,
            Err(_) => "server error".to_string(),
        };
        Err(ClientError::Server { status, message })
    }

    pub async fn consent_link(
        &self,
        institution_id: &str,
        history_days: u32,
    ) -> Result<ConsentLinkResponse, ClientError> {
        self.get_json(&format!(
            "consent-link?institution_id={institution_id}&history_days={history_days}"
        ))
        .await
    }

    pub async fn start_enrichment(&self) -> Result<JobCreated, ClientError> {
        self.post_json("enrichment-jobs").await
    }

    pub async fn job_status(&self, id: Uuid) -> Result<JobStatusResponse, ClientError> {
        self.get_json(&format!("enrichment-jobs/{id}/status")).await
    }

    /// Opens the event stream for one reference. The response body is
    /// consumed incrementally by the subscriber.
    pub(crate) async fn events(&self, reference: &str) -> Result<reqwest::Response, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("events?ref={reference}")))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Server {
                status,
                message: "event stream refused".to_string(),
            });
        }
        Ok(resp)
    }
}
