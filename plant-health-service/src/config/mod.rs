use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::forwarder::{ForwarderOptions, ResponseShape};
use crate::services::plant_id::UpstreamProduct;

/// Upstream requests that take longer than this are reported as timeouts.
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Base64 images are large; axum's 2MB default body limit is too small.
const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PlantHealthConfig {
    pub common: core_config::Config,
    pub plant_id: PlantIdConfig,
    pub forwarder: ForwarderConfig,
    /// OTLP collector endpoint; span export is disabled when unset.
    pub otlp_endpoint: Option<String>,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct PlantIdConfig {
    /// `None` keeps the service up but every forward call answers 500.
    pub api_key: Option<Secret<String>>,
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub coordinates_required: bool,
    pub response_shape: ResponseShape,
    pub verbose_logging: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            coordinates_required: false,
            response_shape: ResponseShape::Wrapped,
            verbose_logging: true,
        }
    }
}

impl PlantHealthConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = common_config.is_prod()
            || env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let api_key = env::var("PLANT_ID_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() && is_prod {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PLANT_ID_API_KEY is required in production but not set"
            )));
        }

        let product: UpstreamProduct =
            parse_value("PLANT_ID_PRODUCT", &get_env("PLANT_ID_PRODUCT", Some("health_assessment"))?)?;
        let endpoint = env::var("PLANT_ID_ENDPOINT")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| product.endpoint().to_string());

        let timeout = parse_timeout(
            "PLANT_ID_TIMEOUT_SECONDS",
            &get_env(
                "PLANT_ID_TIMEOUT_SECONDS",
                Some(&DEFAULT_TIMEOUT_SECONDS.to_string()),
            )?,
        )?;

        Ok(PlantHealthConfig {
            common: common_config,
            plant_id: PlantIdConfig {
                api_key: api_key.map(Secret::new),
                endpoint,
                timeout,
            },
            forwarder: ForwarderConfig {
                coordinates_required: parse_flag(
                    "PLANT_COORDINATES_REQUIRED",
                    &get_env("PLANT_COORDINATES_REQUIRED", Some("false"))?,
                )?,
                response_shape: parse_value(
                    "PLANT_RESPONSE_SHAPE",
                    &get_env("PLANT_RESPONSE_SHAPE", Some("wrapped"))?,
                )?,
                verbose_logging: parse_flag(
                    "PLANT_VERBOSE_LOGGING",
                    &get_env("PLANT_VERBOSE_LOGGING", Some("true"))?,
                )?,
            },
            otlp_endpoint: env::var("OTLP_ENDPOINT")
                .ok()
                .filter(|url| !url.is_empty()),
            max_body_bytes: parse_value(
                "PLANT_MAX_BODY_BYTES",
                &get_env(
                    "PLANT_MAX_BODY_BYTES",
                    Some(&DEFAULT_MAX_BODY_BYTES.to_string()),
                )?,
            )?,
        })
    }

    /// Configuration for tests and embedding: no API key, defaults everywhere else.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        PlantHealthConfig {
            common: core_config::Config::default(),
            plant_id: PlantIdConfig {
                api_key: None,
                endpoint: endpoint.into(),
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            },
            forwarder: ForwarderConfig::default(),
            otlp_endpoint: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn forwarder_options(&self) -> ForwarderOptions {
        ForwarderOptions {
            coordinates_required: self.forwarder.coordinates_required,
            upstream_endpoint: self.plant_id.endpoint.clone(),
            response_shape: self.forwarder.response_shape,
            verbose_logging: self.forwarder.verbose_logging,
        }
    }
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} is required but not set",
                key
            ))),
        },
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
    })
}

/// Timeouts are whole seconds and must be positive; zero would fail every request.
fn parse_timeout(key: &str, raw: &str) -> Result<Duration, AppError> {
    let seconds: u64 = parse_value(key, raw)?;
    if seconds == 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(Duration::from_secs(seconds))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be a boolean, got '{}'",
            key,
            raw
        ))),
    }
}
