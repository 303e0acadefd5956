// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OptiWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::errors::{HaError, HaResult};
use crate::types::{HaEntityState, HaHistoryState};

/// Home Assistant REST API client
#[derive(Clone)]
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HomeAssistantClient {
    /// Create a new HA client with custom configuration
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> HaResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HaError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// Create HA client using Supervisor API environment variables
    /// This is the standard method for HA addons
    pub fn from_supervisor() -> HaResult<Self> {
        let base_url = "http://supervisor/core";
        let token = std::env::var("SUPERVISOR_TOKEN").map_err(|_| {
            HaError::ConfigError(
                "SUPERVISOR_TOKEN environment variable not set. Are you running as an HA addon?"
                    .to_string(),
            )
        })?;

        info!("Initializing HA client using Supervisor API");
        Self::new(base_url, token)
    }

    /// Create HA client from configuration values
    /// Falls back to environment variables if config values are not set
    pub fn from_config(ha_base_url: Option<String>, ha_token: Option<String>) -> HaResult<Self> {
        let base_url = ha_base_url
            .or_else(|| std::env::var("HA_BASE_URL").ok())
            .unwrap_or_else(|| "http://localhost:8123".to_string());

        let token = ha_token
            .or_else(|| std::env::var("HA_TOKEN").ok())
            .ok_or_else(|| {
                HaError::ConfigError(
                    "HA token not found in config or HA_TOKEN environment variable".to_string(),
                )
            })?;

        info!("Initializing HA client from configuration: {}", base_url);
        Self::new(base_url, token)
    }

    /// Get the state of a specific entity
    pub async fn get_state(&self, entity_id: &str) -> HaResult<HaEntityState> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        debug!("Getting state for entity: {}", entity_id);

        let response = self
            .retry_request(|| async { self.client.get(&url).bearer_auth(&self.token).send().await })
            .await?;

        match response.status() {
            StatusCode::OK => {
                let state = response.json::<HaEntityState>().await?;
                debug!("Entity {} = '{}'", entity_id, state.state);
                Ok(state)
            }
            StatusCode::NOT_FOUND => Err(HaError::EntityNotFound(entity_id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("Authentication failed for entity: {}", entity_id);
                Err(HaError::AuthenticationFailed)
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                error!("HA API status {}: {}", status, error_text);
                Err(HaError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                })
            }
        }
    }

    /// Fetch state history of one entity over a time range
    ///
    /// Returns the raw per-change list; the adapter layer flattens it to
    /// `(timestamp, state)` pairs.
    pub async fn get_history(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        significant_only: bool,
    ) -> HaResult<Vec<HaHistoryState>> {
        let mut url = format!(
            "{}/api/history/period/{}?filter_entity_id={}&end_time={}",
            self.base_url,
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
            entity_id,
            end.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        if significant_only {
            url.push_str("&significant_changes_only");
        }
        debug!("Fetching history for {} ({} → {})", entity_id, start, end);

        let response = self
            .retry_request(|| async { self.client.get(&url).bearer_auth(&self.token).send().await })
            .await?;

        match response.status() {
            StatusCode::OK => {
                // The endpoint wraps each entity's series in an outer array
                let series: Vec<Vec<HaHistoryState>> = response.json().await?;
                Ok(series.into_iter().flatten().collect())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(HaError::AuthenticationFailed),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(HaError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                })
            }
        }
    }

    /// Call a Home Assistant service
    ///
    /// `service` is "domain.service", e.g. "switch.turn_on".
    pub async fn call_service(&self, service: &str, data: Value) -> HaResult<()> {
        let parts: Vec<&str> = service.split('.').collect();
        if parts.len() != 2 {
            return Err(HaError::ServiceCallFailed {
                service: service.to_string(),
                reason: "Invalid service format, expected 'domain.service'".to_string(),
            });
        }

        let url = format!("{}/api/services/{}/{}", self.base_url, parts[0], parts[1]);
        debug!("Calling service {} with {}", service, data);

        let response = self
            .retry_request(|| async {
                self.client
                    .post(&url)
                    .bearer_auth(&self.token)
                    .json(&data)
                    .send()
                    .await
            })
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("Authentication failed for service: {}", service);
                Err(HaError::AuthenticationFailed)
            }
            _ => {
                let error_msg = response.text().await.unwrap_or_default();
                error!("Service {} failed (status {}): {}", service, status, error_msg);
                Err(HaError::ServiceCallFailed {
                    service: service.to_string(),
                    reason: error_msg,
                })
            }
        }
    }

    /// Health check - ping HA API
    pub async fn ping(&self) -> HaResult<bool> {
        let url = format!("{}/api/", self.base_url);
        match self.client.get(&url).bearer_auth(&self.token).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("Health check failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Retry transient network failures with a fixed delay
    async fn retry_request<F, Fut>(&self, request: F) -> HaResult<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match request().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt < self.max_retries {
                        warn!(
                            "Request failed (attempt {}/{}), retrying: {}",
                            attempt + 1,
                            self.max_retries,
                            e
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(HaError::HttpError(last_error.expect("at least one attempt")))
    }
}
