use crate::domain::ports::{PaymentGateway, PushAccepted, PushRequest};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://pay.lipwa.app";
const PAYMENTS_PATH: &str = "/api/payments";
const DEFAULT_DISPLAY_TEXT: &str = "Please enter your M-Pesa PIN when prompted";

/// Connection settings for the Lipwa mobile-money API.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub channel_id: String,
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Trims credentials and rejects empty ones.
    pub fn validated(self) -> Result<Self> {
        let api_key = self.api_key.trim().to_string();
        let channel_id = self.channel_id.trim().to_string();
        if api_key.is_empty() || channel_id.is_empty() {
            return Err(PaymentError::ConfigError(
                "Lipwa credentials not configured".to_string(),
            ));
        }
        Ok(Self {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key,
            channel_id,
            timeout: self.timeout,
        })
    }
}

/// Push-payment client for Lipwa (M-Pesa STK push).
#[derive(Clone)]
pub struct LipwaGateway {
    http: Client,
    endpoint: String,
    api_key: String,
    channel_id: String,
}

impl LipwaGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let config = config.validated()?;
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{}", config.base_url, PAYMENTS_PATH),
            api_key: config.api_key,
            channel_id: config.channel_id,
        })
    }
}

fn error_message(body: &Value) -> Option<&str> {
    body.get("message")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
}

#[async_trait]
impl PaymentGateway for LipwaGateway {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn push_payment(&self, request: &PushRequest) -> Result<PushAccepted> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            PaymentError::GatewayUnavailable(format!("Malformed gateway response: {e}"))
        })?;
        debug!("Lipwa response ({}): {}", status, body);

        let rejected = body.get("success").and_then(Value::as_bool) == Some(false);
        if !status.is_success() || rejected {
            let message = error_message(&body).unwrap_or("Failed to initiate payment");
            error!("Lipwa rejected push for {}: {}", request.api_ref, message);
            return Err(PaymentError::GatewayError(message.to_string()));
        }

        Ok(PushAccepted {
            display_text: DEFAULT_DISPLAY_TEXT.to_string(),
        })
    }
}
