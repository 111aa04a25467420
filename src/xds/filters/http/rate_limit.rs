//! Distributed Rate Limit HTTP filter configuration helpers
//!
//! One configuration shape serves both scopes. On a virtual host it
//! describes the filter itself (domain and rate limit service). On a route
//! it contributes descriptor actions, and may also carry the service
//! settings so the filter can be placed when the host has none.

use crate::xds::filters::{any_from_message, invalid_config};
use envoy_types::pb::envoy::config::core::v3::{
    grpc_service::{EnvoyGrpc, TargetSpecifier},
    ApiVersion, GrpcService,
};
use envoy_types::pb::envoy::config::ratelimit::v3::RateLimitServiceConfig;
use envoy_types::pb::envoy::config::route::v3::{
    rate_limit::{
        action::{ActionSpecifier, GenericKey, RemoteAddress, RequestHeaders},
        Action,
    },
    RateLimit as RouteRateLimit,
};
use envoy_types::pb::envoy::extensions::filters::http::ratelimit::v3::RateLimit as RateLimitProto;
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration as ProtoDuration};
use serde::{Deserialize, Serialize};

pub const RATE_LIMIT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ratelimit.v3.RateLimit";

/// Configuration for distributed rate limiting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Domain name to use when calling rate limit service
    #[serde(default)]
    pub domain: Option<String>,
    /// Rate limit service configuration
    #[serde(default)]
    pub rate_limit_service: Option<RateLimitServiceGrpcConfig>,
    /// Timeout for rate limit service calls in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Reject traffic when the rate limit service is unavailable
    #[serde(default)]
    pub failure_mode_deny: bool,
    #[serde(default)]
    pub stat_prefix: Option<String>,
    /// Descriptor entries sent for requests matching a route
    #[serde(default)]
    pub descriptors: Vec<RateLimitDescriptor>,
}

impl RateLimitConfig {
    const DEFAULT_TIMEOUT_MS: u64 = 20;

    /// Whether the filter itself can be built from this configuration
    pub fn has_service(&self) -> bool {
        self.domain.is_some() || self.rate_limit_service.is_some()
    }

    /// Validate as a connection manager filter
    pub fn validate_filter(&self) -> Result<(), crate::Error> {
        match self.domain.as_deref() {
            Some(domain) if !domain.trim().is_empty() => {}
            _ => return Err(invalid_config("RateLimit domain cannot be empty")),
        }

        self.rate_limit_service
            .as_ref()
            .ok_or_else(|| invalid_config("RateLimit requires rate_limit_service"))?
            .validate()?;

        for descriptor in &self.descriptors {
            descriptor.validate()?;
        }

        Ok(())
    }

    /// Validate as a route filter
    pub fn validate_route(&self) -> Result<(), crate::Error> {
        if self.descriptors.is_empty() {
            return Err(invalid_config("RateLimit route filter requires at least one descriptor"));
        }

        for descriptor in &self.descriptors {
            descriptor.validate()?;
        }

        if self.has_service() {
            self.validate_filter()?;
        }

        Ok(())
    }

    /// Convert to Envoy Any payload
    pub fn to_any(&self) -> Result<EnvoyAny, crate::Error> {
        self.validate_filter()?;

        let timeout_ms = self.timeout_ms.unwrap_or(Self::DEFAULT_TIMEOUT_MS);
        let seconds = (timeout_ms / 1000) as i64;
        let nanos = ((timeout_ms % 1000) * 1_000_000) as i32;

        let service = self
            .rate_limit_service
            .as_ref()
            .ok_or_else(|| invalid_config("RateLimit requires rate_limit_service"))?;

        let proto = RateLimitProto {
            domain: self.domain.clone().unwrap_or_default(),
            timeout: Some(ProtoDuration { seconds, nanos }),
            failure_mode_deny: self.failure_mode_deny,
            rate_limit_service: Some(service.to_proto()),
            stat_prefix: self.stat_prefix.clone().unwrap_or_default(),
            ..Default::default()
        };

        Ok(any_from_message(RATE_LIMIT_TYPE_URL, &proto))
    }

    /// Route rate limit entry built from the descriptors, if any
    pub fn route_rate_limit(&self) -> Option<RouteRateLimit> {
        if self.descriptors.is_empty() {
            return None;
        }

        Some(RouteRateLimit {
            actions: self.descriptors.iter().map(RateLimitDescriptor::to_action).collect(),
            ..Default::default()
        })
    }
}

/// One rate limit descriptor entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLimitDescriptor {
    GenericKey {
        descriptor_value: String,
        #[serde(default)]
        descriptor_key: Option<String>,
    },
    RemoteAddress,
    RequestHeader {
        header_name: String,
        descriptor_key: String,
    },
}

impl RateLimitDescriptor {
    fn validate(&self) -> Result<(), crate::Error> {
        match self {
            Self::GenericKey { descriptor_value, .. } if descriptor_value.trim().is_empty() => {
                Err(invalid_config("RateLimit generic_key descriptor_value cannot be empty"))
            }
            Self::RequestHeader { header_name, descriptor_key }
                if header_name.trim().is_empty() || descriptor_key.trim().is_empty() =>
            {
                Err(invalid_config(
                    "RateLimit request_header descriptor requires header_name and descriptor_key",
                ))
            }
            _ => Ok(()),
        }
    }

    fn to_action(&self) -> Action {
        let specifier = match self {
            Self::GenericKey { descriptor_value, descriptor_key } => {
                ActionSpecifier::GenericKey(GenericKey {
                    descriptor_value: descriptor_value.clone(),
                    descriptor_key: descriptor_key.clone().unwrap_or_default(),
                    ..Default::default()
                })
            }
            Self::RemoteAddress => ActionSpecifier::RemoteAddress(RemoteAddress::default()),
            Self::RequestHeader { header_name, descriptor_key } => {
                ActionSpecifier::RequestHeaders(RequestHeaders {
                    header_name: header_name.clone(),
                    descriptor_key: descriptor_key.clone(),
                    ..Default::default()
                })
            }
        };

        Action { action_specifier: Some(specifier) }
    }
}

/// Rate limit service gRPC configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitServiceGrpcConfig {
    /// Name of the Envoy cluster for the rate limit service
    pub cluster_name: String,
    /// Authority header to send with gRPC requests
    #[serde(default)]
    pub authority: Option<String>,
}

impl RateLimitServiceGrpcConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.cluster_name.trim().is_empty() {
            return Err(invalid_config("RateLimit service cluster_name cannot be empty"));
        }
        Ok(())
    }

    fn to_proto(&self) -> RateLimitServiceConfig {
        let grpc_service = GrpcService {
            timeout: None,
            target_specifier: Some(TargetSpecifier::EnvoyGrpc(EnvoyGrpc {
                cluster_name: self.cluster_name.clone(),
                authority: self.authority.clone().unwrap_or_default(),
                retry_policy: None,
                max_receive_message_length: None,
                skip_envoy_headers: false,
            })),
            initial_metadata: Vec::new(),
            retry_policy: None,
        };

        RateLimitServiceConfig {
            grpc_service: Some(grpc_service),
            transport_api_version: ApiVersion::V3 as i32,
        }
    }
}
