//! # Configuration Settings
//!
//! Defines the configuration structures for the cache, the translator and
//! the observability stack.

use crate::dag::Filter;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Ingress class served when none is configured
pub const DEFAULT_INGRESS_CLASS: &str = "switchyard";

/// Resource cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Namespaces permitted to hold root GatewayHost objects (empty = all)
    pub root_namespaces: Vec<String>,

    /// Ingress class this instance serves
    #[validate(length(min = 1, message = "Ingress class cannot be empty when set"))]
    pub ingress_class: Option<String>,
}

impl CacheConfig {
    /// Whether an object carrying `class` (from its class annotation) is ours.
    ///
    /// With no class configured, unannotated objects and objects annotated
    /// with the default class match. With a class configured, only objects
    /// annotated with exactly that class match.
    pub fn matches_ingress_class(&self, class: Option<&str>) -> bool {
        match (self.ingress_class.as_deref(), class) {
            (Some(configured), Some(class)) => configured == class,
            (Some(_), None) => false,
            (None, Some(class)) => class == DEFAULT_INGRESS_CLASS,
            (None, None) => true,
        }
    }
}

/// Resource translator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TranslatorConfig {
    /// Bind address of the insecure listener
    #[validate(length(min = 1, message = "HTTP address cannot be empty"))]
    pub http_address: String,

    /// Port of the insecure listener
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub http_port: u32,

    /// Bind address of the secure listener
    #[validate(length(min = 1, message = "HTTPS address cannot be empty"))]
    pub https_address: String,

    /// Port of the secure listener
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub https_port: u32,

    /// Access log destination for every HTTP connection manager
    #[validate(length(min = 1, message = "Access log path cannot be empty"))]
    pub access_log_path: String,

    /// Upstream connect timeout in milliseconds
    #[validate(range(
        min = 1,
        max = 60000,
        message = "Connect timeout must be between 1 and 60000 milliseconds"
    ))]
    pub connect_timeout_ms: u64,

    /// Base HTTP filters present on every HTTP connection manager
    pub default_http_filters: Vec<Filter>,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0".to_string(),
            http_port: 8080,
            https_address: "0.0.0.0".to_string(),
            https_port: 8443,
            access_log_path: "/dev/stdout".to_string(),
            connect_timeout_ms: 250,
            default_http_filters: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Emit JSON formatted log lines
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logs: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_class_matching() {
        let config = CacheConfig::default();
        assert!(config.matches_ingress_class(None));
        assert!(config.matches_ingress_class(Some(DEFAULT_INGRESS_CLASS)));
        assert!(!config.matches_ingress_class(Some("nginx")));
    }

    #[test]
    fn configured_class_matching() {
        let config =
            CacheConfig { ingress_class: Some("internal".to_string()), ..Default::default() };
        assert!(config.matches_ingress_class(Some("internal")));
        assert!(!config.matches_ingress_class(None));
        assert!(!config.matches_ingress_class(Some(DEFAULT_INGRESS_CLASS)));
    }

    #[test]
    fn translator_defaults_validate() {
        assert!(TranslatorConfig::default().validate().is_ok());

        let config = TranslatorConfig { http_port: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
