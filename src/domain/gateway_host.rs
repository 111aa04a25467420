//! GatewayHost and ServiceRoute resources
//!
//! The routing custom resources. A GatewayHost with a `virtualHost` block is
//! a root; one without is only reachable as a delegation target. A
//! ServiceRoute contributes routes to the root that owns its fqdn.

use super::filter::FilterRef;
use super::identity::Identity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHost {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: GatewayHostSpec,
}

impl GatewayHost {
    pub fn identity(&self) -> Identity {
        Identity::from_meta(&self.metadata)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayHostSpec {
    pub virtual_host: Option<VirtualHostSpec>,
    pub routes: Vec<RouteSpec>,
    pub tcp_proxy: Option<TcpProxySpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualHostSpec {
    pub fqdn: String,
    pub tls: Option<TlsSpec>,
    /// Host-scoped HTTP filters
    pub filters: Vec<FilterRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsSpec {
    /// Secret holding the serving keypair, `name` or `namespace/name`
    pub secret_name: Option<String>,
    pub minimum_protocol_version: Option<String>,
    /// Forward TLS untouched to the TCP proxy upstream
    pub passthrough: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteSpec {
    pub conditions: Vec<ConditionSpec>,
    pub services: Vec<ServiceSpec>,
    pub delegate: Option<DelegateSpec>,
    pub enable_websockets: bool,
    pub permit_insecure: bool,
    pub prefix_rewrite: Option<String>,
    pub retry_policy: Option<RetryPolicySpec>,
    pub timeout_policy: Option<TimeoutPolicySpec>,
    pub filters: Vec<FilterRef>,
    pub disable_external_authorization: bool,
}

/// One match condition. At most one of the fields is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionSpec {
    pub prefix: Option<String>,
    pub regex: Option<String>,
    pub header: Option<HeaderConditionSpec>,
}

impl ConditionSpec {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()), ..Default::default() }
    }

    pub fn header(header: HeaderConditionSpec) -> Self {
        Self { header: Some(header), ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeaderConditionSpec {
    pub name: String,
    pub present: bool,
    pub exact: Option<String>,
    pub not_exact: Option<String>,
    pub contains: Option<String>,
    pub not_contains: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,
    pub port: i32,
    pub weight: i64,
    pub strategy: Option<String>,
    /// Overrides the protocol annotated on the Service
    pub protocol: Option<String>,
    pub health_check: Option<HealthCheckSpec>,
    pub upstream_validation: Option<UpstreamValidationSpec>,
    pub client_validation: Option<ClientValidationSpec>,
    /// Cluster-scoped route filters
    pub filters: Vec<FilterRef>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, port: i32) -> Self {
        Self { name: name.into(), port, ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthCheckSpec {
    pub path: String,
    pub host: Option<String>,
    pub interval_seconds: i64,
    pub timeout_seconds: i64,
    pub unhealthy_threshold_count: u32,
    pub healthy_threshold_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamValidationSpec {
    pub ca_secret: String,
    pub subject_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientValidationSpec {
    pub secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelegateSpec {
    pub name: String,
    /// Defaults to the delegating object's namespace
    pub namespace: Option<String>,
}

impl DelegateSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: None }
    }

    pub fn target(&self, namespace: &str) -> Identity {
        Identity::new(self.namespace.as_deref().unwrap_or(namespace), self.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TcpProxySpec {
    pub services: Vec<ServiceSpec>,
    pub delegate: Option<DelegateSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicySpec {
    pub count: u32,
    pub per_try_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutPolicySpec {
    pub response: Option<String>,
    pub idle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRoute {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceRouteSpec,
}

impl ServiceRoute {
    pub fn identity(&self) -> Identity {
        Identity::from_meta(&self.metadata)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceRouteSpec {
    pub fqdn: String,
    pub routes: Vec<RouteSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_camel_case_manifest() {
        let host: GatewayHost = serde_yaml::from_str(
            r#"
metadata:
  name: www
  namespace: roots
spec:
  virtualHost:
    fqdn: www.example.com
    tls:
      secretName: shared/wildcard
  routes:
    - conditions:
        - prefix: /api
        - header: { name: x-canary, exact: "true" }
      services:
        - name: api
          port: 8080
          weight: 90
          healthCheck: { path: /healthz, intervalSeconds: 5 }
    - delegate: { name: blog, namespace: marketing }
"#,
        )
        .unwrap();

        assert_eq!(host.identity(), Identity::new("roots", "www"));
        let vhost = host.spec.virtual_host.as_ref().unwrap();
        assert_eq!(vhost.tls.as_ref().unwrap().secret_name.as_deref(), Some("shared/wildcard"));
        assert_eq!(host.spec.routes[0].conditions.len(), 2);
        assert_eq!(host.spec.routes[0].services[0].weight, 90);
        assert_eq!(
            host.spec.routes[0].services[0].health_check.as_ref().unwrap().interval_seconds,
            5
        );
        assert_eq!(
            host.spec.routes[1].delegate.as_ref().unwrap().target("roots"),
            Identity::new("marketing", "blog")
        );
    }

    #[test]
    fn delegate_defaults_to_caller_namespace() {
        assert_eq!(DelegateSpec::new("blog").target("roots"), Identity::new("roots", "blog"));
    }
}
