//! # Routing Graph
//!
//! The output of one [`GraphBuilder`](builder::GraphBuilder) run: root
//! listeners holding virtual hosts, virtual hosts holding routes, routes
//! holding weighted clusters, plus the status ledger describing every
//! routing object the build looked at.
//!
//! Every map in the graph is ordered so two builds over the same cache
//! contents compare equal regardless of the order objects were inserted.
//!
//! ## Module Organization
//!
//! - `builder`: GraphBuilder, resolves delegation and records statuses
//! - `conditions`: path and header condition merging and validation
//! - `policy`: retry and timeout normalization
//! - `status`: the first-write-wins status ledger

pub mod builder;
pub mod conditions;
pub mod policy;
pub mod status;

pub use builder::GraphBuilder;
pub use policy::{RetryPolicy, Timeout, TimeoutPolicy};
pub use status::{Status, StatusKind, StatusLedger};

use crate::domain::{FilterScope, FilterSettings, FilterType, Identity, MinTlsVersion};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role port of the insecure listener
pub const INSECURE_LISTENER_PORT: u32 = 80;
/// Role port of the secure listener
pub const SECURE_LISTENER_PORT: u32 = 443;
/// Host name of the catch-all virtual host
pub const WILDCARD_HOST: &str = "*";

/// A named filter attached to a virtual host, route or cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub name: String,
    pub filter_type: FilterType,
    /// Opaque YAML/JSON settings document
    #[serde(default)]
    pub config: String,
}

impl Filter {
    pub fn new(name: impl Into<String>, filter_type: FilterType, config: impl Into<String>) -> Self {
        Self { name: name.into(), filter_type, config: config.into() }
    }

    /// Decode the configuration for a filter attached at `scope`
    pub fn settings(&self, scope: FilterScope) -> Result<FilterSettings> {
        FilterSettings::parse(self.filter_type, scope, &self.config)
    }
}

/// Application protocol spoken to an upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum UpstreamProtocol {
    #[default]
    Plaintext,
    H2,
    H2c,
    Tls,
}

impl UpstreamProtocol {
    /// Parse a protocol name; unknown names yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "" | "plaintext" => Some(Self::Plaintext),
            "h2" => Some(Self::H2),
            "h2c" => Some(Self::H2c),
            "tls" => Some(Self::Tls),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "",
            Self::H2 => "h2",
            Self::H2c => "h2c",
            Self::Tls => "tls",
        }
    }

    /// Whether connections carry a TLS transport socket
    pub fn uses_tls(self) -> bool {
        matches!(self, Self::Tls | Self::H2)
    }

    /// Whether the cluster speaks HTTP/2 upstream
    pub fn uses_http2(self) -> bool {
        matches!(self, Self::H2 | Self::H2c)
    }
}

/// The service port a cluster points at
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServicePortRef {
    pub name: Option<String>,
    pub port: i32,
}

/// A backend service resolved from the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpService {
    pub name: String,
    pub namespace: String,
    pub port: ServicePortRef,
    pub max_connections: u32,
    pub max_pending_requests: u32,
    pub max_requests: u32,
    pub max_retries: u32,
    /// DNS name of an `ExternalName` service
    pub external_name: Option<String>,
}

impl TcpService {
    pub fn identity(&self) -> Identity {
        Identity::new(&self.namespace, &self.name)
    }

    /// EDS service name, `namespace/name/port-name`
    pub fn eds_service_name(&self) -> String {
        match self.port.name.as_deref() {
            Some(port_name) if !port_name.is_empty() => {
                format!("{}/{}/{}", self.namespace, self.name, port_name)
            }
            _ => format!("{}/{}", self.namespace, self.name),
        }
    }

    /// Whether any circuit breaker threshold is configured
    pub fn has_circuit_breakers(&self) -> bool {
        self.max_connections > 0
            || self.max_pending_requests > 0
            || self.max_requests > 0
            || self.max_retries > 0
    }
}

/// A TCP service reached over an application protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpService {
    pub tcp: TcpService,
    pub protocol: UpstreamProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Service {
    Tcp(TcpService),
    Http(HttpService),
}

impl Service {
    pub fn tcp(&self) -> &TcpService {
        match self {
            Service::Tcp(tcp) => tcp,
            Service::Http(http) => &http.tcp,
        }
    }

    pub fn protocol(&self) -> UpstreamProtocol {
        match self {
            Service::Tcp(_) => UpstreamProtocol::Plaintext,
            Service::Http(http) => http.protocol,
        }
    }
}

/// Certificate material copied out of a cached Secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub identity: Identity,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn certificate_chain(&self) -> &[u8] {
        self.bytes(crate::cache::TLS_CERT_KEY)
    }

    pub fn private_key(&self) -> &[u8] {
        self.bytes(crate::cache::TLS_KEY_KEY)
    }

    pub fn ca_bundle(&self) -> &[u8] {
        self.bytes(crate::cache::CA_CERT_KEY)
    }

    /// Usable as a serving or client certificate
    pub fn has_keypair(&self) -> bool {
        !self.certificate_chain().is_empty() && !self.private_key().is_empty()
    }

    /// Usable as a certificate authority bundle
    pub fn has_ca_bundle(&self) -> bool {
        !self.ca_bundle().is_empty()
    }

    fn bytes(&self, key: &str) -> &[u8] {
        self.data.get(key).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Request path match
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathCondition {
    Prefix(String),
    Regex(String),
}

impl Default for PathCondition {
    fn default() -> Self {
        PathCondition::Prefix("/".to_string())
    }
}

impl PathCondition {
    pub fn value(&self) -> &str {
        match self {
            PathCondition::Prefix(value) | PathCondition::Regex(value) => value,
        }
    }
}

impl fmt::Display for PathCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathCondition::Prefix(prefix) => write!(f, "prefix:{}", prefix),
            PathCondition::Regex(regex) => write!(f, "regex:{}", regex),
        }
    }
}

/// How a header condition compares the header value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeaderMatchKind {
    Present,
    Exact,
    Contains,
}

/// Request header match
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeaderCondition {
    pub name: String,
    /// Compared value, empty for `Present`
    pub value: String,
    pub kind: HeaderMatchKind,
    pub invert: bool,
}

impl fmt::Display for HeaderCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negation = if self.invert { "!" } else { "" };
        match self.kind {
            HeaderMatchKind::Present => write!(f, "header:{}{}", negation, self.name),
            HeaderMatchKind::Exact => {
                write!(f, "header:{}{}={}", self.name, negation, self.value)
            }
            HeaderMatchKind::Contains => {
                write!(f, "header:{}{}~{}", self.name, negation, self.value)
            }
        }
    }
}

/// A single match condition of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Path(PathCondition),
    Header(HeaderCondition),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Path(path) => path.fmt(f),
            Condition::Header(header) => header.fmt(f),
        }
    }
}

/// Load balancing strategy of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LoadBalancerStrategy {
    #[default]
    RoundRobin,
    WeightedLeastRequest,
    Random,
    RingHash,
    Maglev,
    /// Ring hash keyed on a session affinity cookie
    Cookie,
}

impl LoadBalancerStrategy {
    /// Parse a strategy name; unknown or empty names fall back to round robin
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("WeightedLeastRequest") => Self::WeightedLeastRequest,
            Some("Random") => Self::Random,
            Some("RingHash") => Self::RingHash,
            Some("Maglev") => Self::Maglev,
            Some("Cookie") => Self::Cookie,
            _ => Self::RoundRobin,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "RoundRobin",
            Self::WeightedLeastRequest => "WeightedLeastRequest",
            Self::Random => "Random",
            Self::RingHash => "RingHash",
            Self::Maglev => "Maglev",
            Self::Cookie => "Cookie",
        }
    }
}

/// Active HTTP health check; zero values select the translator defaults
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HealthCheck {
    pub path: String,
    pub host: Option<String>,
    pub interval_seconds: i64,
    pub timeout_seconds: i64,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

/// Verification of the certificate an upstream presents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamValidation {
    pub ca_secret: Secret,
    pub subject_name: String,
}

/// One weighted upstream of a route or TCP proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub upstream: Service,
    pub strategy: LoadBalancerStrategy,
    pub weight: u32,
    pub health_check: Option<HealthCheck>,
    pub upstream_validation: Option<UpstreamValidation>,
    /// Client certificate presented to the upstream
    pub client_certificate: Option<Secret>,
    pub filters: Vec<Filter>,
    pub sni: Option<String>,
}

impl Cluster {
    pub fn new(upstream: Service) -> Self {
        let sni = upstream.tcp().external_name.clone();
        Self {
            upstream,
            strategy: LoadBalancerStrategy::default(),
            weight: 0,
            health_check: None,
            upstream_validation: None,
            client_certificate: None,
            filters: Vec::new(),
            sni,
        }
    }
}

/// A routing rule of a virtual host
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Route {
    pub path: PathCondition,
    pub headers: Vec<HeaderCondition>,
    pub clusters: Vec<Cluster>,
    /// Redirect plaintext requests to HTTPS
    pub https_upgrade: bool,
    pub websocket: bool,
    pub prefix_rewrite: Option<String>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_policy: Option<TimeoutPolicy>,
    pub filters: Vec<Filter>,
    pub disable_external_authorization: bool,
}

impl Route {
    pub fn new(path: PathCondition) -> Self {
        Self { path, ..Default::default() }
    }

    pub fn conditions(&self) -> impl Iterator<Item = Condition> + '_ {
        std::iter::once(Condition::Path(self.path.clone()))
            .chain(self.headers.iter().cloned().map(Condition::Header))
    }

    /// Merged condition string identifying this route within its host
    pub fn key(&self) -> String {
        self.conditions().map(|condition| condition.to_string()).collect::<Vec<_>>().join(",")
    }
}

/// Non-terminated TLS forwarding to one or more upstreams
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TcpProxy {
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHost {
    pub name: String,
    pub routes: BTreeMap<String, Route>,
    pub tcp_proxy: Option<TcpProxy>,
    pub filters: Vec<Filter>,
}

impl VirtualHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), routes: BTreeMap::new(), tcp_proxy: None, filters: Vec::new() }
    }

    /// Insert `route`, replacing any route with the same conditions
    pub fn add_route(&mut self, route: Route) {
        self.routes.insert(route.key(), route);
    }

    /// Add host filters, replacing same-named ones already attached
    pub fn add_filters(&mut self, filters: &[Filter]) {
        for filter in filters {
            match self.filters.iter_mut().find(|existing| existing.name == filter.name) {
                Some(existing) => *existing = filter.clone(),
                None => self.filters.push(filter.clone()),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureVirtualHost {
    pub virtual_host: VirtualHost,
    pub secret: Option<Secret>,
    pub min_tls_version: MinTlsVersion,
}

impl SecureVirtualHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            virtual_host: VirtualHost::new(name),
            secret: None,
            min_tls_version: MinTlsVersion::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.virtual_host.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Virtual(VirtualHost),
    Secure(SecureVirtualHost),
}

impl Host {
    pub fn name(&self) -> &str {
        match self {
            Host::Virtual(host) => &host.name,
            Host::Secure(host) => host.name(),
        }
    }

    fn retained(&self) -> bool {
        match self {
            Host::Virtual(host) => !host.routes.is_empty(),
            Host::Secure(host) => host.secret.is_some() || host.virtual_host.tcp_proxy.is_some(),
        }
    }
}

/// A root listener. `port` identifies the role (80 insecure, 443 secure),
/// not the bind port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub port: u32,
    pub hosts: BTreeMap<String, Host>,
}

impl Listener {
    pub fn new(port: u32) -> Self {
        Self { port, hosts: BTreeMap::new() }
    }

    pub fn is_secure(&self) -> bool {
        self.port == SECURE_LISTENER_PORT
    }

    /// Drop hosts that carry nothing to serve
    fn prune(&mut self) {
        self.hosts.retain(|_, host| host.retained());
    }
}

/// Walks a [`Graph`] depth first. Every method defaults to a no-op.
pub trait Visitor {
    fn visit_listener(&mut self, _listener: &Listener) {}
    fn visit_virtual_host(&mut self, _listener: &Listener, _host: &VirtualHost) {}
    fn visit_secure_virtual_host(&mut self, _listener: &Listener, _host: &SecureVirtualHost) {}
    fn visit_route(&mut self, _route: &Route) {}
    fn visit_tcp_proxy(&mut self, _proxy: &TcpProxy) {}
    fn visit_cluster(&mut self, _cluster: &Cluster) {}
}

/// Result of one build
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Graph {
    pub listeners: Vec<Listener>,
    pub statuses: StatusLedger,
}

impl Graph {
    pub(crate) fn new(listeners: impl IntoIterator<Item = Listener>, statuses: StatusLedger) -> Self {
        let listeners = listeners
            .into_iter()
            .map(|mut listener| {
                listener.prune();
                listener
            })
            .filter(|listener| !listener.hosts.is_empty())
            .collect();
        Self { listeners, statuses }
    }

    pub fn listener(&self, port: u32) -> Option<&Listener> {
        self.listeners.iter().find(|listener| listener.port == port)
    }

    pub fn statuses(&self) -> impl Iterator<Item = &Status> {
        self.statuses.iter()
    }

    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        for listener in &self.listeners {
            visitor.visit_listener(listener);
            for host in listener.hosts.values() {
                let virtual_host = match host {
                    Host::Virtual(host) => {
                        visitor.visit_virtual_host(listener, host);
                        host
                    }
                    Host::Secure(host) => {
                        visitor.visit_secure_virtual_host(listener, host);
                        &host.virtual_host
                    }
                };
                for route in virtual_host.routes.values() {
                    visitor.visit_route(route);
                    for cluster in &route.clusters {
                        visitor.visit_cluster(cluster);
                    }
                }
                if let Some(proxy) = &virtual_host.tcp_proxy {
                    visitor.visit_tcp_proxy(proxy);
                    for cluster in &proxy.clusters {
                        visitor.visit_cluster(cluster);
                    }
                }
            }
        }
    }
}

/// Identities visited along one delegation chain, root first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DelegationPath(Vec<Identity>);

impl DelegationPath {
    /// A new path extended by `identity`; `self` is left untouched
    pub fn push(&self, identity: Identity) -> Self {
        let mut path = self.0.clone();
        path.push(identity);
        Self(path)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.0.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `ns/a -> ns/b -> ns/a` for a path closed by `target`
    pub fn cycle_description(&self, target: &Identity) -> String {
        self.0
            .iter()
            .chain(std::iter::once(target))
            .map(Identity::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
