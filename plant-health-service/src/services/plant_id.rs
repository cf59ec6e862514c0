//! Plant.id API client.
//!
//! Sends one `POST` per forwarded request, authenticated with the `Api-Key`
//! header, and hands the raw status and body back to the forwarder.

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::Client;
use serde_json::Value;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::dtos::UpstreamPayload;

pub const HEALTH_ASSESSMENT_URL: &str = "https://plant.id/api/v3/health_assessment";
pub const IDENTIFICATION_URL: &str = "https://plant.id/api/v3/identification";

const API_KEY_HEADER: &str = "Api-Key";

/// Which Plant.id product a deployment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamProduct {
    HealthAssessment,
    Identification,
}

impl UpstreamProduct {
    pub fn endpoint(&self) -> &'static str {
        match self {
            UpstreamProduct::HealthAssessment => HEALTH_ASSESSMENT_URL,
            UpstreamProduct::Identification => IDENTIFICATION_URL,
        }
    }
}

impl FromStr for UpstreamProduct {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "health_assessment" | "health-assessment" => Ok(UpstreamProduct::HealthAssessment),
            "identification" => Ok(UpstreamProduct::Identification),
            other => Err(format!(
                "unknown product '{}', expected 'health_assessment' or 'identification'",
                other
            )),
        }
    }
}

/// Error type for transport-level failures. HTTP error statuses are not errors here.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Transport(String),
}

/// Status and body exactly as the upstream returned them.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: String,
}

impl UpstreamReply {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// The body as JSON when it parses, otherwise as a JSON string.
    pub fn body_value(&self) -> Value {
        self.json()
            .unwrap_or_else(|| Value::String(self.body.clone()))
    }
}

/// Seam between the forwarder and the network.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn submit(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamReply, UpstreamError>;
}

/// reqwest-backed client with a fixed per-request timeout.
#[derive(Clone)]
pub struct PlantIdClient {
    client: Client,
    timeout: Duration,
}

impl PlantIdClient {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl UpstreamClient for PlantIdClient {
    async fn submit(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamReply, UpstreamError> {
        let start = Instant::now();

        let result = self
            .client
            .post(endpoint)
            .header(API_KEY_HEADER, api_key)
            .json(payload)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let label = if e.is_timeout() { "timeout" } else { "error" };
                counter!("plant_upstream_requests_total", "status" => label).increment(1);

                if e.is_timeout() {
                    tracing::warn!(endpoint = %endpoint, timeout = ?self.timeout, "Plant.id request timed out");
                    return Err(UpstreamError::Timeout(self.timeout));
                }
                tracing::error!(endpoint = %endpoint, error = %e, "Plant.id request failed");
                return Err(UpstreamError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Transport(e.to_string())
            }
        })?;

        counter!("plant_upstream_requests_total", "status" => status.as_u16().to_string())
            .increment(1);
        histogram!("plant_upstream_duration_seconds").record(start.elapsed().as_secs_f64());

        tracing::debug!(status = %status, body_len = body.len(), "Plant.id response");

        Ok(UpstreamReply {
            status: status.as_u16(),
            body,
        })
    }
}
