//! Remote store client used to replay queued mutations.
//!
//! The engine only needs two operations from the backend: insert a payload
//! into a table, and read the current record for a key so its version
//! token can be compared. `HttpRemoteStore` speaks the backend's REST
//! dialect; tests substitute their own [`RemoteStore`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{EntityTarget, Payload};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Record field compared for conflict detection
pub const VERSION_FIELD: &str = "updated_at";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote data store the queue replays into.
///
/// Writes are assumed safe to retry at the application level: no
/// idempotency key is attached, so a replay after a timed-out but
/// actually committed insert can duplicate the row.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert `payload` into the target table.
    async fn insert(&self, target: &EntityTarget, payload: &Payload) -> Result<()>;

    /// Fetch the current record identified by `key`, or `None` when it
    /// does not exist.
    async fn fetch_record(
        &self,
        target: &EntityTarget,
        key: &[(String, String)],
    ) -> Result<Option<Payload>>;

    /// Fetch the server's current version token for the record identified
    /// by `key`, or `None` when the record (or the field) does not exist.
    async fn fetch_version_token(
        &self,
        target: &EntityTarget,
        key: &[(String, String)],
    ) -> Result<Option<String>> {
        let record = self.fetch_record(target, key).await?;
        Ok(record
            .as_ref()
            .and_then(|row| row.get(VERSION_FIELD))
            .and_then(Value::as_str)
            .map(ToString::to_string))
    }
}

/// Configuration for the HTTP remote store
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Backend base URL (e.g. `https://project.example.com`)
    pub base_url: String,
    /// API key sent as a bearer token
    pub api_key: String,
    /// Per-request timeout; a timeout is an ordinary replay failure
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Create a new remote configuration
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or_else(|| Error::InvalidInput("base URL must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::InvalidInput(
                "base URL must include http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// REST implementation of [`RemoteStore`]
pub struct HttpRemoteStore {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    /// Build an HTTP remote store with a bounded-timeout client
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.config.base_url)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn insert(&self, target: &EntityTarget, payload: &Payload) -> Result<()> {
        let response = self
            .client
            .post(self.table_url(target.table))
            .bearer_auth(&self.config.api_key)
            .header("Accept", "application/json")
            .header("Prefer", "return=minimal")
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(parse_api_error(status, &body)));
        }

        Ok(())
    }

    async fn fetch_record(
        &self,
        target: &EntityTarget,
        key: &[(String, String)],
    ) -> Result<Option<Payload>> {
        let mut request = self
            .client
            .get(self.table_url(target.table))
            .bearer_auth(&self.config.api_key)
            .header("Accept", "application/json")
            .query(&[("select", "*"), ("limit", "1")]);
        for (field, value) in key {
            request = request.query(&[(field.as_str(), format!("eq.{value}"))]);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(parse_api_error(status, &body)));
        }

        let mut rows = response.json::<Vec<Payload>>().await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}
