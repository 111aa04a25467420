//! Modular filter utilities for Envoy HTTP filters.
//!
//! Each filter module pairs a serde configuration struct (decoded from the
//! opaque `config` string of a filter object) with validation and a
//! `to_any()` conversion into the Envoy protobuf payload.
//!
//! # Available Filters
//!
//! - **Lua**: inline scripting
//! - **Compressor**: gzip response compression
//! - **gRPC-Web**: gRPC-Web to gRPC bridging
//! - **CORS**: Cross-Origin Resource Sharing policy configuration
//! - **Rate Limiting**: global rate limiting against an external service

pub mod http;

use envoy_types::pb::envoy::config::route::v3::FilterConfig;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

/// Type URL of the generic per-route filter override
pub const FILTER_CONFIG_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.FilterConfig";

/// Helper for building Envoy `Any` values from prost messages.
pub fn any_from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    Any { type_url: type_url.into(), value: msg.encode_to_vec() }
}

/// Error helper for invalid filter configuration.
pub fn invalid_config(msg: impl Into<String>) -> crate::Error {
    crate::Error::config(msg.into())
}

/// Wrap an optional per-route payload into an enabled `FilterConfig` override.
///
/// An absent payload still produces an override: it switches on a filter
/// that the connection manager carries disabled.
pub fn per_route_filter_config(config: Option<Any>) -> Any {
    any_from_message(
        FILTER_CONFIG_TYPE_URL,
        &FilterConfig { config, is_optional: false, disabled: false },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Message)]
    struct TestMessage {
        #[prost(string, tag = "1")]
        field: String,
    }

    #[test]
    fn any_from_message_encodes_payload() {
        let msg = TestMessage { field: "hello".into() };
        let any = any_from_message("type.googleapis.com/test.Message", &msg);
        assert_eq!(any.type_url, "type.googleapis.com/test.Message");
        assert_eq!(TestMessage::decode(any.value.as_slice()).unwrap(), msg);
    }

    #[test]
    fn per_route_override_is_enabled() {
        let any = per_route_filter_config(None);
        assert_eq!(any.type_url, FILTER_CONFIG_TYPE_URL);

        let decoded = FilterConfig::decode(any.value.as_slice()).unwrap();
        assert!(!decoded.disabled);
        assert!(decoded.config.is_none());
    }
}
