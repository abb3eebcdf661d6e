//! Billing provider boundary and the Stripe client behind it.
//!
//! The reset scheduler only needs one fact from the provider: when a
//! subscription started, which anchors its monthly cycles.

use crate::config::StripeConfig;
use crate::services::metrics::record_billing_provider_request;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::error::AppError;
use std::time::Duration;

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// True start timestamp of the subscription.
    async fn subscription_start(&self, subscription_id: &str) -> Result<DateTime<Utc>, AppError>;
}

/// Subset of Stripe's subscription object.
#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: Option<String>,
    /// Unix seconds.
    pub start_date: i64,
}

/// Stripe API error response.
#[derive(Debug, Deserialize)]
pub struct StripeError {
    pub error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorDetail {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Stripe client for subscription lookups.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to build Stripe client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    /// Check if Stripe is configured (secret key is set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// `{api_base_url}/subscriptions/{id}` with the id escaped as a single path segment.
    fn subscription_url(&self, subscription_id: &str) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.config.api_base_url).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid Stripe API base URL: {}", e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                AppError::ConfigError(anyhow::anyhow!(
                    "Stripe API base URL cannot carry a path: {}",
                    self.config.api_base_url
                ))
            })?
            .pop_if_empty()
            .push("subscriptions")
            .push(subscription_id);
        Ok(url)
    }

    /// Fetch a subscription object by id.
    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, AppError> {
        if !self.is_configured() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Stripe secret key not configured"
            )));
        }

        let url = self.subscription_url(subscription_id)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("Stripe request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::BadGateway(format!("Stripe response unreadable: {}", e)))?;

        tracing::debug!(status = %status, subscription_id = %subscription_id, "Stripe get_subscription response");

        if status.is_success() {
            serde_json::from_str::<StripeSubscription>(&body).map_err(|e| {
                AppError::BadGateway(format!("Unexpected Stripe subscription payload: {}", e))
            })
        } else {
            Err(AppError::BadGateway(describe_error(status.as_u16(), &body)))
        }
    }
}

fn describe_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<StripeError>(body) {
        Ok(err) => format!(
            "Stripe error {}: {} ({})",
            status,
            err.error.message.unwrap_or_default(),
            err.error
                .code
                .or(err.error.error_type)
                .unwrap_or_else(|| "unknown".to_string())
        ),
        Err(_) => format!("Stripe error {}: {}", status, body),
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    #[tracing::instrument(skip(self))]
    async fn subscription_start(&self, subscription_id: &str) -> Result<DateTime<Utc>, AppError> {
        let result = self.get_subscription(subscription_id).await.and_then(|sub| {
            DateTime::<Utc>::from_timestamp(sub.start_date, 0).ok_or_else(|| {
                AppError::BadGateway(format!(
                    "Subscription {} has invalid start_date {}",
                    sub.id, sub.start_date
                ))
            })
        });

        record_billing_provider_request(if result.is_ok() { "ok" } else { "error" });
        result
    }
}
