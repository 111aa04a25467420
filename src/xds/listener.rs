//! Listener translation
//!
//! The plaintext listener carries a single HTTP connection manager shared by
//! every insecure virtual host. The TLS listener inspects the client hello
//! and selects a filter chain per server name: an HTTP connection manager
//! behind a terminating TLS socket, or a TCP proxy for passthrough and TLS
//! terminated TCP forwarding.

use crate::config::TranslatorConfig;
use crate::dag::{self, Filter as DagFilter, SecureVirtualHost};
use crate::domain::{FilterScope, MinTlsVersion};
use crate::xds::cluster::cluster_name;
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{build_http_filters, merge_by_name, ChainEntry};
use crate::xds::resources::DOWNSTREAM_TLS_CONTEXT_TYPE_URL;
use crate::xds::route::{route_chain_entries, ListenerRole};
use crate::xds::secret::secret_name;
use crate::xds::{ads_config_source, TLS_TRANSPORT_SOCKET_NAME};
use envoy_types::pb::envoy::config::accesslog::v3::{
    access_log::ConfigType as AccessLogConfigType, AccessLog,
};
use envoy_types::pb::envoy::config::core::v3::{
    address, socket_address::PortSpecifier, transport_socket::ConfigType as TransportSocketConfigType,
    Address, SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter, listener_filter, Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::envoy::extensions::access_loggers::file::v3::FileAccessLog;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy, TcpProxy,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    tls_parameters::TlsProtocol, CommonTlsContext, DownstreamTlsContext, SdsSecretConfig,
    TlsParameters,
};
use envoy_types::pb::google::protobuf::BoolValue;

pub const HTTP_CONNECTION_MANAGER_NAME: &str = "envoy.filters.network.http_connection_manager";
pub const TCP_PROXY_NAME: &str = "envoy.filters.network.tcp_proxy";
pub const TLS_INSPECTOR_NAME: &str = "envoy.filters.listener.tls_inspector";
const FILE_ACCESS_LOG_NAME: &str = "envoy.access_loggers.file";

const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
const FILE_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";

/// Plaintext listener serving every insecure virtual host through one
/// connection manager.
///
/// Host filters are placed disabled and switched on by each host's
/// per-filter overrides.
pub fn insecure_listener(config: &TranslatorConfig, hosts: &[&dag::VirtualHost]) -> Listener {
    let mut entries = enabled_entries(&config.default_http_filters, FilterScope::VirtualHost);
    for host in hosts {
        entries.extend(
            host.filters
                .iter()
                .filter_map(|filter| ChainEntry::from_filter(filter, FilterScope::VirtualHost, true)),
        );
        entries.extend(route_chain_entries(host));
    }

    let role = ListenerRole::Insecure;
    Listener {
        name: role.route_config_name().to_string(),
        address: Some(socket_address(&config.http_address, config.http_port)),
        filter_chains: vec![FilterChain {
            filters: vec![http_connection_manager(
                role.route_config_name(),
                build_http_filters(entries),
                &config.access_log_path,
            )],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// TLS listener with one SNI-matched filter chain per secure host
pub fn secure_listener(config: &TranslatorConfig, filter_chains: Vec<FilterChain>) -> Listener {
    Listener {
        name: ListenerRole::Secure.route_config_name().to_string(),
        address: Some(socket_address(&config.https_address, config.https_port)),
        listener_filters: vec![tls_inspector()],
        filter_chains,
        ..Default::default()
    }
}

/// Filter chain serving `host` on the TLS listener, `None` when the host
/// has nothing to serve
pub fn secure_filter_chain(config: &TranslatorConfig, host: &SecureVirtualHost) -> Option<FilterChain> {
    let virtual_host = &host.virtual_host;
    let transport_socket =
        host.secret.as_ref().map(|secret| downstream_tls_transport_socket(secret, host.min_tls_version));

    let filter = if let Some(proxy) = &virtual_host.tcp_proxy {
        tcp_proxy_filter(ListenerRole::Secure.route_config_name(), proxy)
    } else if !virtual_host.routes.is_empty() && transport_socket.is_some() {
        let mut entries = merged_host_entries(&config.default_http_filters, &virtual_host.filters);
        entries.extend(route_chain_entries(virtual_host));
        http_connection_manager(
            ListenerRole::Secure.route_config_name(),
            build_http_filters(entries),
            &config.access_log_path,
        )
    } else {
        return None;
    };

    Some(FilterChain {
        filter_chain_match: Some(FilterChainMatch {
            server_names: vec![host.name().to_string()],
            ..Default::default()
        }),
        filters: vec![filter],
        transport_socket,
        ..Default::default()
    })
}

fn enabled_entries(filters: &[DagFilter], scope: FilterScope) -> Vec<ChainEntry> {
    filters.iter().filter_map(|filter| ChainEntry::from_filter(filter, scope, false)).collect()
}

/// Defaults overlaid by the host's own filters, all enabled
fn merged_host_entries(defaults: &[DagFilter], host: &[DagFilter]) -> Vec<ChainEntry> {
    merge_by_name([defaults, host])
        .values()
        .filter_map(|filter| ChainEntry::from_filter(filter, FilterScope::VirtualHost, false))
        .collect()
}

fn socket_address(host: &str, port: u32) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: host.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
    }
}

fn tls_inspector() -> ListenerFilter {
    ListenerFilter {
        name: TLS_INSPECTOR_NAME.to_string(),
        config_type: Some(listener_filter::ConfigType::TypedConfig(any_from_message(
            TLS_INSPECTOR_TYPE_URL,
            &TlsInspector::default(),
        ))),
        ..Default::default()
    }
}

/// HTTP connection manager fetching `route_config_name` over ADS
pub fn http_connection_manager(
    route_config_name: &str,
    http_filters: Vec<HttpFilter>,
    access_log_path: &str,
) -> Filter {
    let manager = HttpConnectionManager {
        stat_prefix: route_config_name.to_string(),
        codec_type: CodecType::Auto as i32,
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            route_config_name: route_config_name.to_string(),
            config_source: Some(ads_config_source()),
        })),
        http_filters,
        access_log: vec![file_access_log(access_log_path)],
        use_remote_address: Some(BoolValue { value: true }),
        ..Default::default()
    };

    Filter {
        name: HTTP_CONNECTION_MANAGER_NAME.to_string(),
        config_type: Some(filter::ConfigType::TypedConfig(any_from_message(
            HTTP_CONNECTION_MANAGER_TYPE_URL,
            &manager,
        ))),
    }
}

fn file_access_log(path: &str) -> AccessLog {
    let file_log = FileAccessLog { path: path.to_string(), ..Default::default() };
    AccessLog {
        name: FILE_ACCESS_LOG_NAME.to_string(),
        filter: None,
        config_type: Some(AccessLogConfigType::TypedConfig(any_from_message(
            FILE_ACCESS_LOG_TYPE_URL,
            &file_log,
        ))),
    }
}

/// TCP proxy forwarding to the proxy's clusters. Weights follow the route
/// rules: all-zero weights become uniform.
pub fn tcp_proxy_filter(stat_prefix: &str, proxy: &dag::TcpProxy) -> Filter {
    let cluster_specifier = match proxy.clusters.as_slice() {
        [only] => tcp_proxy::ClusterSpecifier::Cluster(cluster_name(only)),
        clusters => {
            let uniform = clusters.iter().all(|cluster| cluster.weight == 0);
            let mut weighted: Vec<tcp_proxy::weighted_cluster::ClusterWeight> = clusters
                .iter()
                .map(|cluster| tcp_proxy::weighted_cluster::ClusterWeight {
                    name: cluster_name(cluster),
                    weight: if uniform { 1 } else { cluster.weight },
                    ..Default::default()
                })
                .collect();
            weighted.sort_by(|a, b| a.name.cmp(&b.name));
            tcp_proxy::ClusterSpecifier::WeightedClusters(tcp_proxy::WeightedCluster {
                clusters: weighted,
                ..Default::default()
            })
        }
    };

    let proxy = TcpProxy {
        stat_prefix: stat_prefix.to_string(),
        cluster_specifier: Some(cluster_specifier),
        ..Default::default()
    };

    Filter {
        name: TCP_PROXY_NAME.to_string(),
        config_type: Some(filter::ConfigType::TypedConfig(any_from_message(
            TCP_PROXY_TYPE_URL,
            &proxy,
        ))),
    }
}

/// Terminating TLS socket presenting `secret` over SDS
pub fn downstream_tls_transport_socket(secret: &dag::Secret, min_version: MinTlsVersion) -> TransportSocket {
    let minimum = TlsProtocol::from_str_name(min_version.envoy_name()).unwrap_or(TlsProtocol::TlsAuto);
    let common = CommonTlsContext {
        tls_params: Some(TlsParameters {
            tls_minimum_protocol_version: minimum as i32,
            ..Default::default()
        }),
        tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
            name: secret_name(secret),
            sds_config: Some(ads_config_source()),
        }],
        alpn_protocols: vec!["h2".to_string(), "http/1.1".to_string()],
        ..Default::default()
    };

    let downstream = DownstreamTlsContext { common_tls_context: Some(common), ..Default::default() };

    TransportSocket {
        name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(any_from_message(
            DOWNSTREAM_TLS_CONTEXT_TYPE_URL,
            &downstream,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{HttpService, PathCondition, Route, Service, ServicePortRef, TcpService, UpstreamProtocol};
    use crate::domain::{FilterType, Identity};
    use crate::xds::filters::http::ROUTER_FILTER_NAME;
    use prost::Message;
    use std::collections::BTreeMap;

    fn cluster(name: &str) -> dag::Cluster {
        dag::Cluster::new(Service::Http(HttpService {
            tcp: TcpService {
                name: name.to_string(),
                namespace: "default".to_string(),
                port: ServicePortRef { name: None, port: 80 },
                max_connections: 0,
                max_pending_requests: 0,
                max_requests: 0,
                max_retries: 0,
                external_name: None,
            },
            protocol: UpstreamProtocol::Plaintext,
        }))
    }

    fn keypair() -> dag::Secret {
        let mut data = BTreeMap::new();
        data.insert("tls.crt".to_string(), b"cert".to_vec());
        data.insert("tls.key".to_string(), b"key".to_vec());
        dag::Secret { identity: Identity::new("default", "tls"), data }
    }

    fn routed_host(name: &str) -> dag::VirtualHost {
        let mut host = dag::VirtualHost::new(name);
        let mut route = Route::new(PathCondition::default());
        route.clusters.push(cluster("kuard"));
        host.add_route(route);
        host
    }

    fn decode_manager(filter: &Filter) -> HttpConnectionManager {
        let Some(filter::ConfigType::TypedConfig(any)) = &filter.config_type else {
            panic!("expected typed filter config");
        };
        assert_eq!(any.type_url, HTTP_CONNECTION_MANAGER_TYPE_URL);
        HttpConnectionManager::decode(any.value.as_slice()).unwrap()
    }

    #[test]
    fn insecure_listener_shares_one_manager() {
        let mut first = routed_host("a.example.com");
        first.filters.push(DagFilter::new("gzip", FilterType::Compression, ""));
        let second = routed_host("b.example.com");
        let config = TranslatorConfig::default();

        let listener = insecure_listener(&config, &[&first, &second]);
        assert_eq!(listener.name, "ingress_http");
        assert_eq!(listener.filter_chains.len(), 1);
        assert!(listener.listener_filters.is_empty());

        let manager = decode_manager(&listener.filter_chains[0].filters[0]);
        let names: Vec<_> = manager.http_filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["gzip", ROUTER_FILTER_NAME]);
        assert!(manager.http_filters[0].disabled);
        assert_eq!(manager.access_log.len(), 1);
        match manager.route_specifier {
            Some(RouteSpecifier::Rds(rds)) => assert_eq!(rds.route_config_name, "ingress_http"),
            other => panic!("expected RDS, got {:?}", other),
        }
    }

    #[test]
    fn secure_chain_matches_server_name() {
        let mut host = SecureVirtualHost::new("www.example.com");
        host.virtual_host = routed_host("www.example.com");
        host.secret = Some(keypair());

        let chain = secure_filter_chain(&TranslatorConfig::default(), &host).unwrap();
        assert_eq!(chain.filter_chain_match.unwrap().server_names, vec!["www.example.com"]);
        assert!(chain.transport_socket.is_some());
        assert_eq!(chain.filters[0].name, HTTP_CONNECTION_MANAGER_NAME);
    }

    #[test]
    fn passthrough_chain_has_no_socket() {
        let mut host = SecureVirtualHost::new("db.example.com");
        host.virtual_host.tcp_proxy = Some(dag::TcpProxy { clusters: vec![cluster("db")] });

        let chain = secure_filter_chain(&TranslatorConfig::default(), &host).unwrap();
        assert!(chain.transport_socket.is_none());
        assert_eq!(chain.filters[0].name, TCP_PROXY_NAME);
    }

    #[test]
    fn host_without_content_has_no_chain() {
        let mut host = SecureVirtualHost::new("empty.example.com");
        host.secret = Some(keypair());
        assert!(secure_filter_chain(&TranslatorConfig::default(), &host).is_none());
    }

    #[test]
    fn secure_listener_inspects_tls() {
        let listener = secure_listener(&TranslatorConfig::default(), Vec::new());
        assert_eq!(listener.name, "ingress_https");
        assert_eq!(listener.listener_filters[0].name, TLS_INSPECTOR_NAME);
    }

    #[test]
    fn minimum_tls_version_is_applied() {
        let socket = downstream_tls_transport_socket(&keypair(), MinTlsVersion::V1_2);
        let Some(TransportSocketConfigType::TypedConfig(any)) = socket.config_type else {
            panic!("expected typed transport socket");
        };
        let context = DownstreamTlsContext::decode(any.value.as_slice()).unwrap();
        let params = context.common_tls_context.unwrap().tls_params.unwrap();
        let minimum = TlsProtocol::try_from(params.tls_minimum_protocol_version).unwrap();
        assert_eq!(minimum.as_str_name(), "TLSv1_2");
    }
}
