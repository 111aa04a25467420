//! Cluster translation
//!
//! Every graph cluster becomes one Envoy cluster. Kubernetes services are
//! resolved through EDS over ADS; `ExternalName` services become strict DNS
//! clusters pointing at the external name.

use crate::config::TranslatorConfig;
use crate::dag::{self, HealthCheck as DagHealthCheck, LoadBalancerStrategy, TcpService};
use crate::xds::naming::{hash_prefix, hashname};
use crate::xds::resources::HTTP_PROTOCOL_OPTIONS_TYPE_URL;
use crate::xds::secret::secret_name;
use crate::xds::{ads_config_source, any_from_message, duration, upstream_tls_transport_socket};
use envoy_types::pb::envoy::config::cluster::v3::circuit_breakers::Thresholds as CircuitThresholds;
use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, DiscoveryType, EdsClusterConfig, LbPolicy,
};
use envoy_types::pb::envoy::config::cluster::v3::{CircuitBreakers, Cluster};
use envoy_types::pb::envoy::config::core::v3::{
    address, data_source::Specifier, health_check, socket_address, Address, DataSource,
    HealthCheck, Http2ProtocolOptions, RoutingPriority, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, subject_alt_name_matcher::SanType,
    CertificateValidationContext, CommonTlsContext, SdsSecretConfig, SubjectAltNameMatcher,
    UpstreamTlsContext,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::http_protocol_options::explicit_http_config::ProtocolConfig;
use envoy_types::pb::envoy::extensions::upstreams::http::v3::http_protocol_options::{
    ExplicitHttpConfig, UpstreamProtocolOptions,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::HttpProtocolOptions;
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::google::protobuf::UInt32Value;
use std::collections::HashMap;
use std::time::Duration;

/// Host header of active health check requests unless overridden
pub const DEFAULT_HEALTH_CHECK_HOST: &str = "switchyard-envoy-healthcheck";

const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;
const DEFAULT_HEALTHY_THRESHOLD: u32 = 2;

/// Wire name of a cluster, `namespace/name/port/hash`.
///
/// The hash folds every setting that makes two clusters for the same
/// service port differ, so identical inputs always produce the same name
/// and different health checks or TLS validation never share one.
pub fn cluster_name(cluster: &dag::Cluster) -> String {
    let service = cluster.upstream.tcp();
    let mut fields = vec![format!("lb={}", cluster.strategy.as_str())];

    if let Some(check) = &cluster.health_check {
        fields.push(format!("timeout={}s", check.timeout_seconds.max(0)));
        fields.push(format!("interval={}s", check.interval_seconds.max(0)));
        fields.push(format!("unhealthy={}", check.unhealthy_threshold));
        fields.push(format!("healthy={}", check.healthy_threshold));
        fields.push(format!("path={}", check.path));
        fields.push(format!("host={}", check.host.as_deref().unwrap_or_default()));
    }
    if let Some(validation) = &cluster.upstream_validation {
        fields.push(format!("ca={}", validation.ca_secret.identity));
        fields.push(format!("subject={}", validation.subject_name));
    }
    if let Some(client) = &cluster.client_certificate {
        fields.push(format!("client={}", client.identity));
    }
    fields.push(format!("proto={}", cluster.upstream.protocol().as_str()));

    let port = service.port.port.to_string();
    let hash = hash_prefix(fields.join(";").as_bytes(), 5);
    hashname(60, &[&service.namespace, &service.name, &port, &hash])
}

/// Translate a graph cluster
pub fn cluster(cluster: &dag::Cluster, config: &TranslatorConfig) -> Cluster {
    let name = cluster_name(cluster);
    let service = cluster.upstream.tcp();
    let protocol = cluster.upstream.protocol();

    let mut envoy_cluster = Cluster {
        name: name.clone(),
        alt_stat_name: format!("{}_{}_{}", service.namespace, service.name, service.port.port),
        connect_timeout: Some(duration(Duration::from_millis(config.connect_timeout_ms))),
        lb_policy: lb_policy(cluster.strategy) as i32,
        ..Default::default()
    };

    match service.external_name.as_deref() {
        Some(external_name) => {
            envoy_cluster.cluster_discovery_type =
                Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32));
            envoy_cluster.load_assignment =
                Some(external_load_assignment(&name, external_name, service.port.port));
        }
        None => {
            envoy_cluster.cluster_discovery_type =
                Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32));
            envoy_cluster.eds_cluster_config = Some(EdsClusterConfig {
                eds_config: Some(ads_config_source()),
                service_name: service.eds_service_name(),
            });
        }
    }

    if service.has_circuit_breakers() {
        envoy_cluster.circuit_breakers = Some(circuit_breakers(service));
    }

    if let Some(check) = &cluster.health_check {
        envoy_cluster.health_checks = vec![health_check(check)];
    }

    if protocol.uses_http2() {
        envoy_cluster.typed_extension_protocol_options = http2_protocol_options();
    }

    if protocol.uses_tls() {
        envoy_cluster.transport_socket = Some(upstream_tls_transport_socket(upstream_tls_context(
            cluster,
            protocol.uses_http2(),
        )));
    }

    envoy_cluster
}

fn lb_policy(strategy: LoadBalancerStrategy) -> LbPolicy {
    match strategy {
        LoadBalancerStrategy::RoundRobin => LbPolicy::RoundRobin,
        LoadBalancerStrategy::WeightedLeastRequest => LbPolicy::LeastRequest,
        LoadBalancerStrategy::Random => LbPolicy::Random,
        LoadBalancerStrategy::RingHash | LoadBalancerStrategy::Cookie => LbPolicy::RingHash,
        LoadBalancerStrategy::Maglev => LbPolicy::Maglev,
    }
}

fn external_load_assignment(cluster_name: &str, host: &str, port: i32) -> ClusterLoadAssignment {
    let socket_address = SocketAddress {
        address: host.to_string(),
        port_specifier: Some(socket_address::PortSpecifier::PortValue(port.max(0) as u32)),
        ..Default::default()
    };

    ClusterLoadAssignment {
        cluster_name: cluster_name.to_string(),
        endpoints: vec![LocalityLbEndpoints {
            lb_endpoints: vec![LbEndpoint {
                host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
                    address: Some(Address {
                        address: Some(address::Address::SocketAddress(socket_address)),
                    }),
                    ..Default::default()
                })),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn uint32(value: u32) -> Option<UInt32Value> {
    (value > 0).then_some(UInt32Value { value })
}

fn circuit_breakers(service: &TcpService) -> CircuitBreakers {
    CircuitBreakers {
        thresholds: vec![CircuitThresholds {
            priority: RoutingPriority::Default as i32,
            max_connections: uint32(service.max_connections),
            max_pending_requests: uint32(service.max_pending_requests),
            max_requests: uint32(service.max_requests),
            max_retries: uint32(service.max_retries),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn seconds_or(value: i64, default: Duration) -> Duration {
    if value > 0 {
        Duration::from_secs(value as u64)
    } else {
        default
    }
}

fn threshold_or(value: u32, default: u32) -> Option<UInt32Value> {
    Some(UInt32Value { value: if value > 0 { value } else { default } })
}

fn health_check(check: &DagHealthCheck) -> HealthCheck {
    let host = check
        .host
        .clone()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| DEFAULT_HEALTH_CHECK_HOST.to_string());

    HealthCheck {
        timeout: Some(duration(seconds_or(check.timeout_seconds, DEFAULT_HEALTH_CHECK_TIMEOUT))),
        interval: Some(duration(seconds_or(check.interval_seconds, DEFAULT_HEALTH_CHECK_INTERVAL))),
        unhealthy_threshold: threshold_or(check.unhealthy_threshold, DEFAULT_UNHEALTHY_THRESHOLD),
        healthy_threshold: threshold_or(check.healthy_threshold, DEFAULT_HEALTHY_THRESHOLD),
        health_checker: Some(health_check::HealthChecker::HttpHealthCheck(
            health_check::HttpHealthCheck {
                host,
                path: check.path.clone(),
                ..Default::default()
            },
        )),
        ..Default::default()
    }
}

/// `typed_extension_protocol_options` switching the upstream to HTTP/2
fn http2_protocol_options() -> HashMap<String, envoy_types::pb::google::protobuf::Any> {
    let options = HttpProtocolOptions {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(
            ExplicitHttpConfig {
                protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(
                    Http2ProtocolOptions::default(),
                )),
            },
        )),
        ..Default::default()
    };

    let mut map = HashMap::new();
    map.insert(
        "envoy.extensions.upstreams.http.v3.HttpProtocolOptions".to_string(),
        any_from_message(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &options),
    );
    map
}

fn upstream_tls_context(cluster: &dag::Cluster, http2: bool) -> UpstreamTlsContext {
    let mut common = CommonTlsContext::default();
    if http2 {
        common.alpn_protocols = vec!["h2".to_string()];
    }

    if let Some(validation) = &cluster.upstream_validation {
        common.validation_context_type =
            Some(ValidationContextType::ValidationContext(CertificateValidationContext {
                trusted_ca: Some(DataSource {
                    specifier: Some(Specifier::InlineBytes(validation.ca_secret.ca_bundle().to_vec())),
                    ..Default::default()
                }),
                match_typed_subject_alt_names: vec![SubjectAltNameMatcher {
                    san_type: SanType::Dns as i32,
                    matcher: Some(StringMatcher {
                        match_pattern: Some(MatchPattern::Exact(validation.subject_name.clone())),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }));
    }

    if let Some(client) = &cluster.client_certificate {
        common.tls_certificate_sds_secret_configs = vec![SdsSecretConfig {
            name: secret_name(client),
            sds_config: Some(ads_config_source()),
        }];
    }

    UpstreamTlsContext {
        common_tls_context: Some(common),
        sni: cluster.sni.clone().unwrap_or_default(),
        ..Default::default()
    }
}
