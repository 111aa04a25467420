//! # Envoy resource translation
//!
//! Maps a built [`Graph`] onto Envoy xDS resources: clusters, route
//! configurations, listeners and secrets. Translation is a pure function of
//! the graph and the [`TranslatorConfig`]; it keeps no state between calls
//! and never fails.

pub mod cluster;
pub mod filters;
pub mod listener;
pub mod naming;
pub mod resources;
pub mod route;
pub mod secret;

pub use cluster::{cluster, cluster_name};
pub use filters::any_from_message;
pub use resources::{BuiltResource, ResourceSnapshot};
pub use route::{route_configuration, virtual_host, ListenerRole};
pub use secret::{secret, secret_name};

use crate::config::TranslatorConfig;
use crate::dag::{Graph, Listener as DagListener, SecureVirtualHost, VirtualHost as DagVirtualHost, Visitor};
use crate::xds_span;
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, transport_socket::ConfigType as TransportSocketConfigType,
    AggregatedConfigSource, ApiVersion, ConfigSource, TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::FilterChain;
use envoy_types::pb::envoy::config::route::v3::VirtualHost;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{Secret, UpstreamTlsContext};
use envoy_types::pb::google::protobuf::Duration as ProtoDuration;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, Span};

/// Transport socket name of every TLS socket
pub const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";

/// Config source pointing at the aggregated discovery stream
pub fn ads_config_source() -> ConfigSource {
    ConfigSource {
        resource_api_version: ApiVersion::V3 as i32,
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        ..Default::default()
    }
}

pub(crate) fn duration(value: Duration) -> ProtoDuration {
    ProtoDuration { seconds: value.as_secs() as i64, nanos: value.subsec_nanos() as i32 }
}

pub(crate) fn upstream_tls_transport_socket(context: UpstreamTlsContext) -> TransportSocket {
    TransportSocket {
        name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(any_from_message(
            resources::UPSTREAM_TLS_CONTEXT_TYPE_URL,
            &context,
        ))),
    }
}

/// Translates graphs into Envoy resources
#[derive(Debug, Clone)]
pub struct Translator {
    config: TranslatorConfig,
    span: Span,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(TranslatorConfig::default(), xds_span!("translate"))
    }
}

impl Translator {
    /// Every event emitted by a translation is parented on `span`
    pub fn new(config: TranslatorConfig, span: Span) -> Self {
        Self { config, span }
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn translate(&self, graph: &Graph) -> ResourceSnapshot {
        self.span.in_scope(|| {
            let mut collector = Collector::new(&self.config);
            graph.accept(&mut collector);
            let snapshot = collector.finish();

            info!(
                clusters = snapshot.clusters.len(),
                route_configurations = snapshot.route_configurations.len(),
                listeners = snapshot.listeners.len(),
                secrets = snapshot.secrets.len(),
                "Translated graph into Envoy resources"
            );
            snapshot
        })
    }
}

/// Accumulates translated resources while walking the graph
struct Collector<'a> {
    config: &'a TranslatorConfig,
    clusters: BTreeMap<String, Cluster>,
    secrets: BTreeMap<String, Secret>,
    insecure_hosts: Vec<DagVirtualHost>,
    secure_virtual_hosts: Vec<VirtualHost>,
    secure_chains: Vec<FilterChain>,
}

impl<'a> Collector<'a> {
    fn new(config: &'a TranslatorConfig) -> Self {
        Self {
            config,
            clusters: BTreeMap::new(),
            secrets: BTreeMap::new(),
            insecure_hosts: Vec::new(),
            secure_virtual_hosts: Vec::new(),
            secure_chains: Vec::new(),
        }
    }

    fn add_secret(&mut self, secret: &crate::dag::Secret) {
        let name = secret_name(secret);
        self.secrets.entry(name).or_insert_with(|| secret::secret(secret));
    }

    fn finish(self) -> ResourceSnapshot {
        let mut snapshot = ResourceSnapshot {
            clusters: self.clusters.into_values().collect(),
            secrets: self.secrets.into_values().collect(),
            ..Default::default()
        };

        if !self.insecure_hosts.is_empty() {
            let hosts: Vec<&DagVirtualHost> = self.insecure_hosts.iter().collect();
            snapshot.listeners.push(listener::insecure_listener(self.config, &hosts));
            snapshot.route_configurations.push(route_configuration(
                ListenerRole::Insecure.route_config_name(),
                self.insecure_hosts
                    .iter()
                    .map(|host| virtual_host(host, ListenerRole::Insecure))
                    .collect(),
            ));
        }

        if !self.secure_chains.is_empty() {
            snapshot.listeners.push(listener::secure_listener(self.config, self.secure_chains));
            if !self.secure_virtual_hosts.is_empty() {
                snapshot.route_configurations.push(route_configuration(
                    ListenerRole::Secure.route_config_name(),
                    self.secure_virtual_hosts,
                ));
            }
        }

        snapshot
    }
}

impl Visitor for Collector<'_> {
    fn visit_virtual_host(&mut self, _listener: &DagListener, host: &DagVirtualHost) {
        debug!(vhost = %host.name, routes = host.routes.len(), "Translating insecure virtual host");
        self.insecure_hosts.push(host.clone());
    }

    fn visit_secure_virtual_host(&mut self, _listener: &DagListener, host: &SecureVirtualHost) {
        let Some(chain) = listener::secure_filter_chain(self.config, host) else {
            debug!(vhost = %host.name(), "Secure virtual host has nothing to serve");
            return;
        };

        debug!(vhost = %host.name(), passthrough = host.secret.is_none(), "Translating secure virtual host");
        if let Some(secret) = &host.secret {
            self.add_secret(secret);
        }
        if host.virtual_host.tcp_proxy.is_none() {
            self.secure_virtual_hosts.push(virtual_host(&host.virtual_host, ListenerRole::Secure));
        }
        self.secure_chains.push(chain);
    }

    fn visit_cluster(&mut self, dag_cluster: &crate::dag::Cluster) {
        let name = cluster_name(dag_cluster);
        if !self.clusters.contains_key(&name) {
            debug!(cluster = %name, "Translating cluster");
            self.clusters.insert(name, cluster(dag_cluster, self.config));
        }
        if let Some(client) = &dag_cluster.client_certificate {
            self.add_secret(client);
        }
    }
}
