//! Domain layer
//!
//! The input resource model the graph builder consumes: identities, the
//! routing custom resources, filter objects and their typed settings, TLS
//! certificate delegations and the annotation vocabulary. Kubernetes
//! built-ins (Ingress, Service, Secret) are used directly from
//! `k8s-openapi`.
//!
//! ## Module Organization
//!
//! - `identity`: namespace/name keys and status owner references
//! - `gateway_host`: GatewayHost and ServiceRoute resources
//! - `filter`: HttpFilter/RouteFilter resources and `FilterSettings`
//! - `tls`: minimum TLS version and certificate delegation
//! - `annotations`: legacy annotation keys and readers

pub mod annotations;
pub mod filter;
pub mod gateway_host;
pub mod identity;
pub mod tls;

pub use filter::{
    FilterRef, FilterScope, FilterSettings, FilterSpec, FilterType, HostRewriteConfig, HttpFilter,
    RetryFilterConfig, RouteFilter, TimeoutFilterConfig,
};
pub use gateway_host::{
    ClientValidationSpec, ConditionSpec, DelegateSpec, GatewayHost, GatewayHostSpec,
    HeaderConditionSpec, HealthCheckSpec, RetryPolicySpec, RouteSpec, ServiceRoute,
    ServiceRouteSpec, ServiceSpec, TcpProxySpec, TimeoutPolicySpec, TlsSpec,
    UpstreamValidationSpec, VirtualHostSpec,
};
pub use identity::{Identity, ObjectKind, ObjectRef, DEFAULT_NAMESPACE};
pub use tls::{
    CertificateDelegation, MinTlsVersion, TlsCertificateDelegation, TlsCertificateDelegationSpec,
};
