//! Broker REST client used during feed start-up.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::error::FeedError;

pub const REST_URL: &str = "https://api-invest.tinkoff.ru/openapi";
pub const SANDBOX_REST_URL: &str = "https://api-invest.tinkoff.ru/openapi/sandbox";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    tracking_id: Option<String>,
    status: String,
}

/// Minimal REST client for account setup calls.
pub struct BrokerClient {
    http: Client,
    base_url: String,
    token: String,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, FeedError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| FeedError::Connect(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    /// Register a sandbox account for the token. Safe to repeat.
    #[instrument(skip(self))]
    pub async fn register_sandbox(&self) -> Result<(), FeedError> {
        let url = format!("{}/sandbox/register", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "brokerAccountType": "Tinkoff" }))
            .send()
            .await
            .map_err(|e| FeedError::Connect(format!("sandbox registration failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Connect(format!(
                "sandbox registration rejected with HTTP {status}"
            )));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Connect(format!("unexpected registration response: {e}")))?;
        debug!(tracking_id = ?body.tracking_id, "Sandbox registration response");

        if body.status != "Ok" {
            return Err(FeedError::Connect(format!(
                "sandbox registration returned status {}",
                body.status
            )));
        }

        info!("Sandbox account registered");
        Ok(())
    }
}
