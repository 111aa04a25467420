//! Filter resources and typed filter settings
//!
//! `HttpFilter` objects attach to virtual hosts and `RouteFilter` objects to
//! routes or individual services. Both carry a filter type and an opaque
//! YAML/JSON configuration string which decodes into [`FilterSettings`].

use super::identity::Identity;
use crate::xds::filters::http::compressor::CompressorConfig;
use crate::xds::filters::http::cors::{self, CorsConfig};
use crate::xds::filters::http::grpc_web::GrpcWebConfig;
use crate::xds::filters::http::lua::LuaConfig;
use crate::xds::filters::http::rate_limit::RateLimitConfig;
use crate::{Error, Result};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    /// Inline Lua scripting
    Lua,
    /// Response compression (gzip)
    Compression,
    /// gRPC-Web bridging
    GrpcWeb,
    Cors,
    /// External/distributed rate limiting (requires gRPC service)
    RateLimit,
    /// Route retry policy override
    Retry,
    /// Route timeout policy override
    Timeout,
    /// Upstream host header rewrite
    HostRewrite,
}

impl FilterType {
    /// Whether this type is an HTTP connection manager filter
    pub fn is_http_filter(&self) -> bool {
        self.chain_rank().is_some()
    }

    /// Position in the fixed HTTP filter order, `None` for route-action types
    pub fn chain_rank(&self) -> Option<u8> {
        match self {
            FilterType::Lua => Some(0),
            FilterType::Compression => Some(1),
            FilterType::GrpcWeb => Some(2),
            FilterType::Cors => Some(3),
            FilterType::RateLimit => Some(4),
            FilterType::Retry | FilterType::Timeout | FilterType::HostRewrite => None,
        }
    }

    /// Whether a filter of this type may be attached at `scope`
    pub fn can_attach_to(&self, scope: FilterScope) -> bool {
        match scope {
            FilterScope::VirtualHost => self.is_http_filter(),
            FilterScope::Route => true,
            FilterScope::Cluster => matches!(
                self,
                FilterType::Lua
                    | FilterType::Compression
                    | FilterType::GrpcWeb
                    | FilterType::Cors
                    | FilterType::HostRewrite
            ),
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterType::Lua => write!(f, "lua"),
            FilterType::Compression => write!(f, "compression"),
            FilterType::GrpcWeb => write!(f, "grpcWeb"),
            FilterType::Cors => write!(f, "cors"),
            FilterType::RateLimit => write!(f, "rateLimit"),
            FilterType::Retry => write!(f, "retry"),
            FilterType::Timeout => write!(f, "timeout"),
            FilterType::HostRewrite => write!(f, "hostRewrite"),
        }
    }
}

/// Where a filter is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterScope {
    /// HTTP connection manager of the listener serving the host
    VirtualHost,
    Route,
    /// A single service of a route
    Cluster,
}

impl fmt::Display for FilterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterScope::VirtualHost => write!(f, "virtual host"),
            FilterScope::Route => write!(f, "route"),
            FilterScope::Cluster => write!(f, "service"),
        }
    }
}

/// Reference from a routing object to a filter object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterRef {
    pub name: String,
    /// Defaults to the referencing object's namespace
    pub namespace: Option<String>,
}

impl FilterRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: None }
    }

    pub fn target(&self, namespace: &str) -> Identity {
        Identity::new(self.namespace.as_deref().unwrap_or(namespace), self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub filter_type: FilterType,
    #[serde(default)]
    pub config: String,
}

/// Host-scoped filter object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpFilter {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: FilterSpec,
}

impl HttpFilter {
    pub fn identity(&self) -> Identity {
        Identity::from_meta(&self.metadata)
    }
}

/// Route- or service-scoped filter object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteFilter {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: FilterSpec,
}

impl RouteFilter {
    pub fn identity(&self) -> Identity {
        Identity::from_meta(&self.metadata)
    }
}

/// Retry policy carried by a `retry` route filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryFilterConfig {
    #[serde(default)]
    pub retry_on: Option<String>,
    #[serde(default)]
    pub num_retries: u32,
    #[serde(default)]
    pub per_try_timeout: Option<String>,
}

/// Timeout policy carried by a `timeout` route filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutFilterConfig {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub idle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostRewriteConfig {
    #[serde(default)]
    pub host: String,
}

/// Decoded filter configuration
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSettings {
    Lua(LuaConfig),
    Compression(CompressorConfig),
    GrpcWeb(GrpcWebConfig),
    Cors(CorsConfig),
    RateLimit(RateLimitConfig),
    Retry(RetryFilterConfig),
    Timeout(TimeoutFilterConfig),
    HostRewrite(HostRewriteConfig),
}

impl FilterSettings {
    /// Decode and validate `config` for a filter of `filter_type` attached at `scope`.
    ///
    /// An empty configuration string decodes as an empty mapping.
    pub fn parse(filter_type: FilterType, scope: FilterScope, config: &str) -> Result<Self> {
        if !filter_type.can_attach_to(scope) {
            return Err(Error::validation(format!(
                "filter type {} cannot be attached to a {}",
                filter_type, scope
            )));
        }

        let source = if config.trim().is_empty() { "{}" } else { config };
        let settings = match filter_type {
            FilterType::Lua => {
                let lua: LuaConfig = decode(filter_type, source)?;
                lua.validate()?;
                Self::Lua(lua)
            }
            FilterType::Compression => {
                let compressor: CompressorConfig = decode(filter_type, source)?;
                compressor.validate()?;
                Self::Compression(compressor)
            }
            FilterType::GrpcWeb => Self::GrpcWeb(decode(filter_type, source)?),
            FilterType::Cors => {
                let policy: CorsConfig = decode(filter_type, source)?;
                policy.validate()?;
                Self::Cors(policy)
            }
            FilterType::RateLimit => {
                let rate_limit: RateLimitConfig = decode(filter_type, source)?;
                match scope {
                    FilterScope::Route => rate_limit.validate_route()?,
                    _ => rate_limit.validate_filter()?,
                }
                Self::RateLimit(rate_limit)
            }
            FilterType::Retry => Self::Retry(decode(filter_type, source)?),
            FilterType::Timeout => Self::Timeout(decode(filter_type, source)?),
            FilterType::HostRewrite => {
                let rewrite: HostRewriteConfig = decode(filter_type, source)?;
                if rewrite.host.trim().is_empty() {
                    return Err(Error::config("hostRewrite host cannot be empty"));
                }
                Self::HostRewrite(rewrite)
            }
        };

        Ok(settings)
    }

    /// Decode settings for a filter placed in a connection manager
    pub fn parse_http(filter_type: FilterType, config: &str) -> Result<Self> {
        Self::parse(filter_type, FilterScope::VirtualHost, config)
    }

    /// Connection manager payload, `None` when the settings cannot stand as a
    /// filter of their own
    pub fn chain_config(&self) -> Result<Option<EnvoyAny>> {
        match self {
            Self::Lua(lua) => lua.to_any().map(Some),
            Self::Compression(compressor) => compressor.to_any().map(Some),
            Self::GrpcWeb(grpc_web) => Ok(Some(grpc_web.to_any())),
            Self::Cors(_) => Ok(Some(cors::filter_marker_any())),
            Self::RateLimit(rate_limit) if rate_limit.has_service() => rate_limit.to_any().map(Some),
            Self::RateLimit(_) | Self::Retry(_) | Self::Timeout(_) | Self::HostRewrite(_) => {
                Ok(None)
            }
        }
    }

    /// Per-route payload wrapped into the route's `FilterConfig` override
    pub fn per_route_config(&self) -> Result<Option<EnvoyAny>> {
        match self {
            Self::Lua(lua) => lua.to_per_route_any().map(Some),
            Self::Cors(policy) => policy.to_per_route_any().map(Some),
            _ => Ok(None),
        }
    }
}

fn decode<T: DeserializeOwned>(filter_type: FilterType, source: &str) -> Result<T> {
    serde_yaml::from_str(source)
        .map_err(|e| Error::serialization(format!("{} filter configuration", filter_type), e))
}
