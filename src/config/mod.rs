//! # Configuration Management
//!
//! Configuration for the switchyard compiler. Values come from defaults,
//! a YAML document, or `SWITCHYARD_*` environment variables, and are
//! validated before use.

pub mod settings;

pub use settings::{CacheConfig, ObservabilityConfig, TranslatorConfig, DEFAULT_INGRESS_CLASS};

use crate::domain::FilterSettings;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

const ENV_PREFIX: &str = "SWITCHYARD_";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    #[validate(nested)]
    pub cache: CacheConfig,

    #[validate(nested)]
    pub translator: TranslatorConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// `lookup` receives the full variable name, `SWITCHYARD_HTTP_PORT` for
    /// instance. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(namespaces) = var("ROOT_NAMESPACES") {
            config.cache.root_namespaces = namespaces
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(class) = var("INGRESS_CLASS") {
            config.cache.ingress_class = Some(class);
        }

        if let Some(address) = var("HTTP_ADDRESS") {
            config.translator.http_address = address;
        }
        if let Some(port) = var("HTTP_PORT") {
            config.translator.http_port = parse_var("HTTP port", &port)?;
        }
        if let Some(address) = var("HTTPS_ADDRESS") {
            config.translator.https_address = address;
        }
        if let Some(port) = var("HTTPS_PORT") {
            config.translator.https_port = parse_var("HTTPS port", &port)?;
        }
        if let Some(path) = var("ACCESS_LOG_PATH") {
            config.translator.access_log_path = path;
        }
        if let Some(timeout) = var("CONNECT_TIMEOUT_MS") {
            config.translator.connect_timeout_ms = parse_var("connect timeout", &timeout)?;
        }

        if let Some(level) = var("LOG_LEVEL") {
            config.observability.log_level = level;
        }
        if let Some(json) = var("LOG_JSON") {
            config.observability.json_logs = parse_var("JSON log flag", &json)?;
        }

        config.validate_all()?;
        Ok(config)
    }

    /// Decode and validate a YAML configuration document
    pub fn from_yaml_str(document: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(document)
            .map_err(|e| Error::serialization("configuration document", e))?;
        config.validate_all()?;
        Ok(config)
    }

    /// Field validation plus the base filter checks
    pub fn validate_all(&self) -> Result<()> {
        self.validate()?;

        for filter in &self.translator.default_http_filters {
            if filter.name.trim().is_empty() {
                return Err(Error::validation("default HTTP filter name cannot be empty"));
            }
            if !filter.filter_type.is_http_filter() {
                return Err(Error::validation(format!(
                    "default HTTP filter '{}' has type {} which is not an HTTP filter",
                    filter.name, filter.filter_type
                )));
            }
            FilterSettings::parse_http(filter.filter_type, &filter.config).map_err(|e| {
                Error::validation(format!("default HTTP filter '{}': {}", filter.name, e))
            })?;
        }

        Ok(())
    }
}

fn parse_var<T>(what: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| Error::config(format!("Invalid {}: {}", what, e)))
}
