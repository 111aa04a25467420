//! Annotation vocabulary
//!
//! Legacy per-object policy carried in object annotations. Unparsable
//! numeric values read as zero, which every consumer treats as "unset".

use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeSet;

pub const PREFIX: &str = "switchyard.io/";

pub const MAX_CONNECTIONS: &str = "switchyard.io/max-connections";
pub const MAX_PENDING_REQUESTS: &str = "switchyard.io/max-pending-requests";
pub const MAX_REQUESTS: &str = "switchyard.io/max-requests";
pub const MAX_RETRIES: &str = "switchyard.io/max-retries";
pub const UPSTREAM_PROTOCOL_H2: &str = "switchyard.io/upstream-protocol.h2";
pub const UPSTREAM_PROTOCOL_H2C: &str = "switchyard.io/upstream-protocol.h2c";
pub const UPSTREAM_PROTOCOL_TLS: &str = "switchyard.io/upstream-protocol.tls";

pub const REQUEST_TIMEOUT: &str = "switchyard.io/request-timeout";
pub const RETRY_ON: &str = "switchyard.io/retry-on";
pub const NUM_RETRIES: &str = "switchyard.io/num-retries";
pub const PER_TRY_TIMEOUT: &str = "switchyard.io/per-try-timeout";
pub const WEBSOCKET_ROUTES: &str = "switchyard.io/websocket-routes";
pub const TLS_MINIMUM_PROTOCOL_VERSION: &str = "switchyard.io/tls-minimum-protocol-version";
pub const INGRESS_CLASS: &str = "switchyard.io/ingress.class";

pub const KUBERNETES_INGRESS_CLASS: &str = "kubernetes.io/ingress.class";
pub const KUBERNETES_ALLOW_HTTP: &str = "kubernetes.io/ingress.allow-http";
pub const FORCE_SSL_REDIRECT: &str = "ingress.kubernetes.io/force-ssl-redirect";

/// Raw annotation value
pub fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations.as_ref().and_then(|annotations| annotations.get(key)).map(String::as_str)
}

/// Annotation parsed as an unsigned integer; missing or malformed reads as 0
pub fn parse_u32(meta: &ObjectMeta, key: &str) -> u32 {
    annotation(meta, key).and_then(|value| value.trim().parse().ok()).unwrap_or(0)
}

/// Ingress class claimed by an object, switchyard's own key taking precedence
pub fn ingress_class(meta: &ObjectMeta) -> Option<&str> {
    annotation(meta, INGRESS_CLASS).or_else(|| annotation(meta, KUBERNETES_INGRESS_CLASS))
}

/// Whether the insecure listener may serve this ingress
pub fn http_allowed(meta: &ObjectMeta) -> bool {
    annotation(meta, KUBERNETES_ALLOW_HTTP) != Some("false")
}

/// Whether insecure requests must be redirected to HTTPS
pub fn tls_required(meta: &ObjectMeta) -> bool {
    annotation(meta, FORCE_SSL_REDIRECT) == Some("true")
}

/// Paths listed as websocket routes
pub fn websocket_routes(meta: &ObjectMeta) -> BTreeSet<String> {
    annotation(meta, WEBSOCKET_ROUTES)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Upstream protocol annotated for a service port, matched by port name or number
pub fn upstream_protocol(meta: &ObjectMeta, port: &ServicePort) -> Option<&'static str> {
    let matches = |key: &str| {
        annotation(meta, key)
            .map(|value| {
                value.split(',').map(str::trim).any(|entry| {
                    entry == port.port.to_string() || port.name.as_deref() == Some(entry)
                })
            })
            .unwrap_or(false)
    };

    [(UPSTREAM_PROTOCOL_H2, "h2"), (UPSTREAM_PROTOCOL_H2C, "h2c"), (UPSTREAM_PROTOCOL_TLS, "tls")]
        .into_iter()
        .find(|(key, _)| matches(key))
        .map(|(_, protocol)| protocol)
}
