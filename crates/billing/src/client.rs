//! Lemon Squeezy API client
//!
//! A thin JSON:API client over reqwest. The client is constructed once and
//! injected wherever provider access is needed; nothing in this crate
//! touches a global SDK handle.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

use crate::error::{BillingError, BillingResult};

/// Per-request timeout for provider calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Base delay for retry backoff, in milliseconds.
const RETRY_BASE_MS: u64 = 250;

/// Retries after the initial attempt.
const RETRY_ATTEMPTS: usize = 2;

/// Provider credentials and endpoints.
#[derive(Debug, Clone)]
pub struct LemonSqueezyConfig {
    pub api_key: String,
    pub store_id: String,
    pub webhook_secret: String,
    pub api_base: String,
}

impl LemonSqueezyConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            api_key: std::env::var("LEMONSQUEEZY_API_KEY")
                .map_err(|_| anyhow::anyhow!("LEMONSQUEEZY_API_KEY must be set"))?,
            store_id: std::env::var("LEMONSQUEEZY_STORE_ID")
                .map_err(|_| anyhow::anyhow!("LEMONSQUEEZY_STORE_ID must be set"))?,
            webhook_secret: std::env::var("LEMONSQUEEZY_WEBHOOK_SECRET")
                .map_err(|_| anyhow::anyhow!("LEMONSQUEEZY_WEBHOOK_SECRET must be set"))?,
            api_base: std::env::var("LEMONSQUEEZY_API_BASE")
                .unwrap_or_else(|_| "https://api.lemonsqueezy.com".to_string()),
        })
    }
}

/// Price data for a variant's price point.
#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub unit_price: Option<i64>,
    pub unit_price_decimal: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl Price {
    /// The value stored on subscription rows. Usage-based prices carry
    /// their precision in unit_price_decimal, which wins when present.
    pub fn as_stored(&self) -> Option<String> {
        if let Some(decimal) = &self.unit_price_decimal {
            return Some(decimal.clone());
        }
        self.unit_price.map(|p| p.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiDocument<T> {
    data: ApiResource<T>,
}

#[derive(Debug, Deserialize)]
struct ApiResource<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct CheckoutAttributes {
    url: String,
}


#[derive(Clone)]
pub struct LemonSqueezyClient {
    http: reqwest::Client,
    config: Arc<LemonSqueezyConfig>,
}

impl LemonSqueezyClient {
    pub fn new(config: LemonSqueezyConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &LemonSqueezyConfig {
        &self.config
    }

    /// Fetch price data for a price id.
    pub async fn get_price(&self, price_id: &str) -> BillingResult<Price> {
        let url = format!("{}/v1/prices/{}", self.config.api_base, price_id);
        let doc: ApiDocument<Price> = self.get_json(&url).await?;
        Ok(doc.data.attributes)
    }

    /// Create a hosted checkout for a variant, embedding the user id so
    /// that webhook deliveries for the resulting subscription carry it
    /// back in `meta.custom_data`.
    pub async fn create_checkout(
        &self,
        variant_id: &str,
        user_id: &str,
        email: &str,
    ) -> BillingResult<String> {
        let url = format!("{}/v1/checkouts", self.config.api_base);

        let body = serde_json::json!({
            "data": {
                "type": "checkouts",
                "attributes": {
                    "checkout_data": {
                        "email": email,
                        "custom": { "user_id": user_id }
                    }
                },
                "relationships": {
                    "store": {
                        "data": { "type": "stores", "id": self.config.store_id }
                    },
                    "variant": {
                        "data": { "type": "variants", "id": variant_id }
                    }
                }
            }
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Accept", "application/vnd.api+json")
            .header("Content-Type", "application/vnd.api+json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BillingError::ExternalApi(format!(
                "checkout creation failed with {}: {}",
                status, detail
            )));
        }

        let doc: ApiDocument<CheckoutAttributes> = response.json().await?;
        Ok(doc.data.attributes.url)
    }

    /// GET with retries on transport errors and 5xx responses. Client
    /// errors (4xx) fail immediately: retrying them cannot help.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> BillingResult<T> {
        let strategy = ExponentialBackoff::from_millis(RETRY_BASE_MS).take(RETRY_ATTEMPTS);

        let response = Retry::spawn(strategy, || async {
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.config.api_key)
                .header("Accept", "application/vnd.api+json")
                .send()
                .await
                .map_err(BillingError::from)?;

            if response.status().is_server_error() {
                return Err(BillingError::ExternalApi(format!(
                    "server error {} from {}",
                    response.status(),
                    url
                )));
            }
            Ok(response)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BillingError::ExternalApi(format!(
                "request to {} failed with {}: {}",
                url, status, detail
            )));
        }

        Ok(response.json::<T>().await?)
    }
}
