use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::AnalyticsConfig;
use cadence_core::{AnalyticsError, AnalyticsEvent, AnalyticsSink};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

/// POSTs each event as JSON to the configured analytics endpoint.
pub struct HttpAnalyticsSink {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpAnalyticsSink {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint: endpoint.into(), api_key })
    }

    /// `None` when analytics forwarding is disabled or has no endpoint.
    pub fn from_config(config: &AnalyticsConfig) -> Result<Option<Self>, reqwest::Error> {
        match (config.enabled, config.endpoint.as_deref()) {
            (true, Some(endpoint)) => Self::new(
                endpoint,
                config.api_key.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl AnalyticsSink for HttpAnalyticsSink {
    async fn deliver(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        let mut request = self.client.post(&self.endpoint).json(event);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| AnalyticsError::Transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AnalyticsError::Rejected { status: status.as_u16() })
        }
    }
}
