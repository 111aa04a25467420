//! CORS filter
//!
//! The connection manager only carries an empty `Cors` marker. The policy
//! is delivered through the per-filter config of the hosts and routes that
//! reference the filter object.

use crate::dag::policy::parse_duration;
use crate::xds::filters::{any_from_message, invalid_config};
use envoy_types::pb::envoy::extensions::filters::http::cors::v3::{
    Cors as CorsFilter, CorsPolicy as FilterCorsPolicy,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, BoolValue};
use http::{header::HeaderName, Method};
use serde::{Deserialize, Serialize};

pub const FILTER_CORS_POLICY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.cors.v3.CorsPolicy";
pub const CORS_FILTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.cors.v3.Cors";

/// Cross-origin policy of a `cors` filter object.
///
/// Origins are exact matches, `*` for any origin, or `*.example.com` for
/// every subdomain of a domain. `max_age` is a duration such as `10m`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allow_origin: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age: Option<String>,
    pub allow_credentials: bool,
}

impl CorsConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.allow_origin.is_empty() {
            return Err(invalid_config("cors: allow_origin must list at least one origin"));
        }
        for origin in &self.allow_origin {
            origin_matcher(origin)?;
        }
        if self.allow_credentials && self.allow_origin.iter().any(|origin| origin.trim() == "*") {
            return Err(invalid_config("cors: allow_credentials cannot be combined with origin *"));
        }

        for method in self.allow_methods.iter().map(|m| m.trim()).filter(|m| *m != "*") {
            Method::from_bytes(method.as_bytes())
                .map_err(|_| invalid_config(format!("cors: invalid method {:?}", method)))?;
        }
        for header in self.allow_headers.iter().chain(&self.expose_headers) {
            let header = header.trim();
            if header != "*" && HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(invalid_config(format!("cors: invalid header name {:?}", header)));
            }
        }

        if let Some(max_age) = self.max_age.as_deref() {
            parse_duration(max_age)
                .ok_or_else(|| invalid_config(format!("cors: invalid max_age {:?}", max_age)))?;
        }
        Ok(())
    }

    /// Per-route policy payload
    pub fn to_per_route_any(&self) -> Result<EnvoyAny, crate::Error> {
        self.validate()?;

        let allow_origin_string_match = self
            .allow_origin
            .iter()
            .map(|origin| origin_matcher(origin))
            .collect::<Result<Vec<_>, _>>()?;
        let max_age = self
            .max_age
            .as_deref()
            .and_then(parse_duration)
            .map(|age| age.as_secs().to_string())
            .unwrap_or_default();

        let policy = FilterCorsPolicy {
            allow_origin_string_match,
            allow_methods: self.allow_methods.join(","),
            allow_headers: self.allow_headers.join(","),
            expose_headers: self.expose_headers.join(","),
            max_age,
            allow_credentials: self.allow_credentials.then_some(BoolValue { value: true }),
            ..Default::default()
        };
        Ok(any_from_message(FILTER_CORS_POLICY_TYPE_URL, &policy))
    }
}

fn origin_matcher(origin: &str) -> Result<StringMatcher, crate::Error> {
    let origin = origin.trim();
    let pattern = match origin {
        "" => return Err(invalid_config("cors: origins cannot be empty")),
        "*" => MatchPattern::Prefix(String::new()),
        wildcard if wildcard.starts_with("*.") => MatchPattern::Suffix(wildcard[1..].to_string()),
        wildcard if wildcard.contains('*') => {
            return Err(invalid_config(format!(
                "cors: origin {:?} may only use a leading *. wildcard",
                wildcard
            )))
        }
        exact => MatchPattern::Exact(exact.to_string()),
    };
    Ok(StringMatcher { match_pattern: Some(pattern), ..Default::default() })
}

/// Enables the CORS filter in a connection manager
pub fn filter_marker_any() -> EnvoyAny {
    any_from_message(CORS_FILTER_TYPE_URL, &CorsFilter {})
}
