//! # Graph Builder
//!
//! Resolves the cached routing objects into a [`Graph`]. A build runs in
//! three passes over one cache snapshot:
//!
//! 1. secure virtual hosts are seeded from ingress TLS blocks
//! 2. ingress rules become routes
//! 3. root GatewayHosts are walked, following route and TCP proxy
//!    delegation into child GatewayHosts and merging ServiceRoutes
//!
//! Problems are never returned to the caller. They drop the affected route,
//! cluster or TLS setting and record an Invalid status on the owning object.

use super::conditions::{
    has_regex, header_conditions_valid, merge_header_conditions, merge_path_conditions,
    path_conditions_valid,
};
use super::policy::{
    ingress_retry_policy, ingress_timeout_policy, retry_policy, timeout_policy,
};
use super::{
    Cluster, DelegationPath, Filter, Graph, HealthCheck, Host, HttpService, Listener,
    LoadBalancerStrategy, PathCondition, Route, Secret, SecureVirtualHost, Service,
    ServicePortRef, Status, StatusKind, StatusLedger, TcpProxy, TcpService, UpstreamProtocol,
    UpstreamValidation, VirtualHost, INSECURE_LISTENER_PORT, SECURE_LISTENER_PORT, WILDCARD_HOST,
};
use crate::cache::{CacheSnapshot, ResourceCache};
use crate::dag_span;
use crate::domain::{
    annotations, ConditionSpec, FilterRef, FilterScope, GatewayHost, HealthCheckSpec, Identity,
    MinTlsVersion, ObjectKind, ObjectRef, RouteSpec, ServiceRoute, ServiceSpec,
};
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::api::networking::v1::IngressBackend;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn, Span};

/// Characters that turn an ingress path into a regex match
const INGRESS_REGEX_CHARS: &[char] = &['^', '+', '*', '[', ']', '%'];

/// How a backend reference names a service port
#[derive(Debug, Clone, Copy)]
enum PortSelector<'a> {
    Number(i32),
    Name(&'a str),
}

impl PortSelector<'_> {
    fn matches(&self, port: &k8s_openapi::api::core::v1::ServicePort) -> bool {
        match self {
            PortSelector::Number(number) => port.port == *number,
            PortSelector::Name(name) => port.name.as_deref() == Some(*name),
        }
    }
}

/// A service port resolved during this build
#[derive(Debug, Clone)]
struct ResolvedService {
    tcp: TcpService,
    /// Protocol from the service's upstream-protocol annotations
    annotated_protocol: Option<UpstreamProtocol>,
}

/// Builds one [`Graph`] from a [`ResourceCache`]. Single use.
pub struct GraphBuilder {
    span: Span,
    insecure: BTreeMap<String, VirtualHost>,
    secure: BTreeMap<String, SecureVirtualHost>,
    services: BTreeMap<(Identity, i32), ResolvedService>,
    secrets: BTreeMap<Identity, Secret>,
    statuses: StatusLedger,
    orphans: BTreeSet<Identity>,
    merged_service_routes: BTreeSet<Identity>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(dag_span!("build"))
    }
}

impl GraphBuilder {
    /// Every event emitted by the build is parented on `span`
    pub fn new(span: Span) -> Self {
        Self {
            span,
            insecure: BTreeMap::new(),
            secure: BTreeMap::new(),
            services: BTreeMap::new(),
            secrets: BTreeMap::new(),
            statuses: StatusLedger::default(),
            orphans: BTreeSet::new(),
            merged_service_routes: BTreeSet::new(),
        }
    }

    /// Build the graph. The cache stays read-locked until this returns.
    pub fn build(self, cache: &ResourceCache) -> Graph {
        let span = self.span.clone();
        span.in_scope(move || {
            let snapshot = cache.snapshot();
            self.run(&snapshot)
        })
    }

    fn run(mut self, snapshot: &CacheSnapshot<'_>) -> Graph {
        self.compute_secure_virtual_hosts(snapshot);
        self.compute_ingresses(snapshot);
        self.compute_gateway_hosts(snapshot);
        self.finalize(snapshot)
    }

    fn insecure_host(&mut self, host: &str) -> &mut VirtualHost {
        self.insecure.entry(host.to_string()).or_insert_with(|| VirtualHost::new(host))
    }

    fn secure_host(&mut self, host: &str) -> &mut SecureVirtualHost {
        self.secure.entry(host.to_string()).or_insert_with(|| SecureVirtualHost::new(host))
    }

    fn set_status(&mut self, object: &ObjectRef, kind: StatusKind, description: String, vhost: &str) {
        self.statuses.record(Status {
            object: object.clone(),
            kind,
            description,
            vhost: vhost.to_string(),
        });
    }

    fn invalid(&mut self, object: &ObjectRef, description: impl Into<String>, vhost: &str) {
        let description = description.into();
        warn!(object = %object, vhost = %vhost, reason = %description, "Routing object is invalid");
        self.set_status(object, StatusKind::Invalid, description, vhost);
    }

    fn valid(&mut self, object: &ObjectRef, vhost: &str) {
        let description = format!("valid {}", object.kind);
        self.set_status(object, StatusKind::Valid, description, vhost);
    }

    /// Secret by identity, copied into the build on first use
    fn lookup_secret(&mut self, snapshot: &CacheSnapshot<'_>, identity: &Identity) -> Option<Secret> {
        if let Some(secret) = self.secrets.get(identity) {
            return Some(secret.clone());
        }

        let cached = snapshot.secret(identity)?;
        let data = cached
            .data
            .iter()
            .flatten()
            .map(|(key, value)| (key.clone(), value.0.clone()))
            .collect();
        let secret = Secret { identity: identity.clone(), data };
        debug!(secret = %identity, "Resolved secret");
        self.secrets.insert(identity.clone(), secret.clone());
        Some(secret)
    }

    fn lookup_keypair(&mut self, snapshot: &CacheSnapshot<'_>, identity: &Identity) -> Option<Secret> {
        self.lookup_secret(snapshot, identity).filter(Secret::has_keypair)
    }

    fn lookup_ca_bundle(&mut self, snapshot: &CacheSnapshot<'_>, identity: &Identity) -> Option<Secret> {
        self.lookup_secret(snapshot, identity).filter(Secret::has_ca_bundle)
    }

    /// Service port by identity, built on first use and reused afterwards
    fn lookup_service(
        &mut self,
        snapshot: &CacheSnapshot<'_>,
        identity: &Identity,
        selector: PortSelector<'_>,
    ) -> Option<ResolvedService> {
        let service = snapshot.service(identity)?;
        let port = service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.iter().find(|port| selector.matches(port)))?;

        let key = (identity.clone(), port.port);
        if let Some(resolved) = self.services.get(&key) {
            return Some(resolved.clone());
        }

        let resolved = resolve_service(identity, service, port);
        debug!(service = %identity, port = port.port, "Resolved service");
        self.services.insert(key, resolved.clone());
        Some(resolved)
    }

    /// HTTP service; an explicit protocol wins over the service annotations
    fn lookup_http_service(
        &mut self,
        snapshot: &CacheSnapshot<'_>,
        identity: &Identity,
        selector: PortSelector<'_>,
        protocol: Option<UpstreamProtocol>,
    ) -> Option<HttpService> {
        let resolved = self.lookup_service(snapshot, identity, selector)?;
        Some(HttpService {
            protocol: protocol.or(resolved.annotated_protocol).unwrap_or_default(),
            tcp: resolved.tcp,
        })
    }

    fn lookup_tcp_service(
        &mut self,
        snapshot: &CacheSnapshot<'_>,
        identity: &Identity,
        port: i32,
    ) -> Option<TcpService> {
        self.lookup_service(snapshot, identity, PortSelector::Number(port)).map(|resolved| resolved.tcp)
    }

    /// Resolve filter references, dropping (and reporting) any that are
    /// missing or whose settings do not decode
    fn resolve_filters(
        &mut self,
        snapshot: &CacheSnapshot<'_>,
        object: &ObjectRef,
        refs: &[FilterRef],
        scope: FilterScope,
        vhost: &str,
    ) -> Vec<Filter> {
        let mut filters = Vec::with_capacity(refs.len());
        for filter_ref in refs {
            let target = filter_ref.target(&object.identity.namespace);
            let spec = match scope {
                FilterScope::VirtualHost => snapshot.http_filter(&target).map(|f| &f.spec),
                FilterScope::Route | FilterScope::Cluster => {
                    snapshot.route_filter(&target).map(|f| &f.spec)
                }
            };
            let Some(spec) = spec else {
                self.invalid(object, format!("{} filter {} not found", scope, target), vhost);
                continue;
            };

            let filter = Filter::new(target.name.clone(), spec.filter_type, spec.config.clone());
            if let Err(e) = filter.settings(scope) {
                self.invalid(object, format!("filter {}: {}", target, e), vhost);
                continue;
            }
            filters.push(filter);
        }
        filters
    }

    fn compute_secure_virtual_hosts(&mut self, snapshot: &CacheSnapshot<'_>) {
        for (identity, ingress) in snapshot.ingresses() {
            let Some(tls_blocks) = ingress.spec.as_ref().and_then(|spec| spec.tls.as_ref()) else {
                continue;
            };
            let min_tls_version = MinTlsVersion::parse_or_default(annotations::annotation(
                &ingress.metadata,
                annotations::TLS_MINIMUM_PROTOCOL_VERSION,
            ));

            for tls in tls_blocks {
                let Some(secret_name) = tls.secret_name.as_deref().filter(|n| !n.is_empty()) else {
                    continue;
                };
                let secret_id = Identity::parse_reference(secret_name, &identity.namespace);
                let Some(secret) = self.lookup_keypair(snapshot, &secret_id) else {
                    debug!(ingress = %identity, secret = %secret_id, "TLS secret not found or malformed");
                    continue;
                };
                if !snapshot.delegation_permitted(&secret_id, &identity.namespace) {
                    warn!(ingress = %identity, secret = %secret_id, "Certificate delegation not permitted");
                    continue;
                }

                for host in tls.hosts.iter().flatten() {
                    let secure = self.secure_host(host);
                    secure.secret = Some(secret.clone());
                    secure.min_tls_version = min_tls_version;
                }
            }
        }
    }

    fn compute_ingresses(&mut self, snapshot: &CacheSnapshot<'_>) {
        for (identity, ingress) in snapshot.ingresses() {
            let Some(spec) = ingress.spec.as_ref() else {
                continue;
            };
            let meta = &ingress.metadata;

            let mut paths: Vec<(&str, &str, &IngressBackend)> = Vec::new();
            if let Some(backend) = spec.default_backend.as_ref() {
                paths.push((WILDCARD_HOST, "/", backend));
            }
            for rule in spec.rules.iter().flatten() {
                let host = rule.host.as_deref().filter(|h| !h.is_empty()).unwrap_or(WILDCARD_HOST);
                for path in rule.http.iter().flat_map(|http| http.paths.iter()) {
                    let value = path.path.as_deref().filter(|p| !p.is_empty()).unwrap_or("/");
                    paths.push((host, value, &path.backend));
                }
            }

            let tls_required = annotations::tls_required(meta);
            let http_allowed = annotations::http_allowed(meta);
            let websocket_routes = annotations::websocket_routes(meta);

            for (host, path, backend) in paths {
                let Some(backend) = backend.service.as_ref() else {
                    continue;
                };
                let selector = match backend.port.as_ref() {
                    Some(port) => match (port.number, port.name.as_deref()) {
                        (Some(number), _) => PortSelector::Number(number),
                        (None, Some(name)) => PortSelector::Name(name),
                        (None, None) => continue,
                    },
                    None => continue,
                };
                let service_id = Identity::new(&identity.namespace, &backend.name);
                let Some(service) = self.lookup_http_service(snapshot, &service_id, selector, None)
                else {
                    debug!(ingress = %identity, service = %service_id, "Ingress backend not found");
                    continue;
                };

                let condition = if path.contains(INGRESS_REGEX_CHARS) {
                    PathCondition::Regex(path.to_string())
                } else {
                    PathCondition::Prefix(path.to_string())
                };
                let mut route = Route::new(condition);
                route.https_upgrade = tls_required;
                route.websocket = websocket_routes.contains(path);
                route.retry_policy = ingress_retry_policy(meta);
                route.timeout_policy = ingress_timeout_policy(meta);
                route.clusters = vec![Cluster::new(Service::Http(service))];

                // Port 80 serves plaintext traffic, or the redirect to HTTPS
                if http_allowed || tls_required {
                    self.insecure_host(host).add_route(route.clone());
                }
                if host != WILDCARD_HOST {
                    if let Some(secure) = self.secure.get_mut(host) {
                        route.https_upgrade = false;
                        secure.virtual_host.add_route(route);
                    }
                }
            }
        }
    }

    fn compute_gateway_hosts(&mut self, snapshot: &CacheSnapshot<'_>) {
        let mut roots_by_fqdn: BTreeMap<&str, Vec<Identity>> = BTreeMap::new();
        for (identity, host) in snapshot.gateway_hosts() {
            match host.spec.virtual_host.as_ref() {
                Some(vhost) => {
                    roots_by_fqdn.entry(vhost.fqdn.trim()).or_default().push(identity.clone())
                }
                None => {
                    self.orphans.insert(identity.clone());
                }
            }
        }

        let mut duplicates = BTreeSet::new();
        for (fqdn, members) in roots_by_fqdn.iter().filter(|(_, members)| members.len() > 1) {
            let names = members.iter().map(Identity::to_string).collect::<Vec<_>>().join(", ");
            for member in members {
                let object = ObjectRef::new(ObjectKind::GatewayHost, member.clone());
                self.invalid(
                    &object,
                    format!("fqdn {:?} is used in multiple GatewayHosts: {}", fqdn, names),
                    fqdn,
                );
                duplicates.insert(member.clone());
            }
        }

        for (identity, host) in snapshot.gateway_hosts() {
            if host.spec.virtual_host.is_some() && !duplicates.contains(identity) {
                self.process_root(snapshot, identity, host);
            }
        }
    }

    fn process_root(&mut self, snapshot: &CacheSnapshot<'_>, identity: &Identity, root: &GatewayHost) {
        let Some(vhost) = root.spec.virtual_host.as_ref() else {
            return;
        };
        let object = ObjectRef::new(ObjectKind::GatewayHost, identity.clone());
        let fqdn = vhost.fqdn.trim();

        if !snapshot.is_root_namespace(&identity.namespace) {
            self.invalid(&object, "root GatewayHost cannot be defined in this namespace", fqdn);
            return;
        }
        if fqdn.is_empty() {
            self.invalid(&object, "Spec.VirtualHost.Fqdn must be specified", fqdn);
            return;
        }
        if fqdn.contains('*') && vhost.tls.is_some() {
            self.invalid(
                &object,
                format!("Spec.VirtualHost.Fqdn {:?} cannot use wildcards with TLS", fqdn),
                fqdn,
            );
            return;
        }

        let mut enforce_tls = false;
        let mut passthrough = false;
        let mut host_filters: Option<Vec<Filter>> = None;
        if let Some(tls) = vhost.tls.as_ref() {
            let secret_name = tls.secret_name.as_deref().filter(|name| !name.trim().is_empty());
            match (secret_name, tls.passthrough) {
                (Some(_), true) => {
                    self.invalid(
                        &object,
                        "Spec.VirtualHost.TLS: both secretName and passthrough cannot be specified",
                        fqdn,
                    );
                    return;
                }
                (Some(secret_name), false) => {
                    let secret_id = Identity::parse_reference(secret_name, &identity.namespace);
                    match self.lookup_keypair(snapshot, &secret_id) {
                        Some(_) if !snapshot.delegation_permitted(&secret_id, &identity.namespace) => {
                            self.invalid(
                                &object,
                                format!("{} certificate delegation not permitted", secret_id),
                                fqdn,
                            );
                            return;
                        }
                        Some(secret) => {
                            let filters = self.resolve_filters(
                                snapshot,
                                &object,
                                &vhost.filters,
                                FilterScope::VirtualHost,
                                fqdn,
                            );
                            let secure = self.secure_host(fqdn);
                            secure.secret = Some(secret);
                            secure.min_tls_version = MinTlsVersion::parse_or_default(
                                tls.minimum_protocol_version.as_deref(),
                            );
                            secure.virtual_host.add_filters(&filters);
                            host_filters = Some(filters);
                            enforce_tls = true;
                        }
                        None => {
                            self.invalid(
                                &object,
                                format!("TLS Secret {} not found or is malformed", secret_id),
                                fqdn,
                            );
                            return;
                        }
                    }
                }
                (None, true) => {
                    passthrough = true;
                    self.secure_host(fqdn);
                }
                (None, false) => {
                    self.invalid(
                        &object,
                        "Spec.VirtualHost.TLS must specify either secretName or passthrough",
                        fqdn,
                    );
                    return;
                }
            }
        }

        if root.spec.tcp_proxy.is_some() && (enforce_tls || passthrough) {
            self.process_tcp_proxy(snapshot, root, DelegationPath::default(), fqdn);
            return;
        }

        let filters = match host_filters {
            Some(filters) => filters,
            None => self.resolve_filters(snapshot, &object, &vhost.filters, FilterScope::VirtualHost, fqdn),
        };
        self.insecure_host(fqdn).add_filters(&filters);
        self.process_routes(snapshot, root, DelegationPath::default(), &[], fqdn, enforce_tls);
    }

    fn process_routes(
        &mut self,
        snapshot: &CacheSnapshot<'_>,
        owner: &GatewayHost,
        visited: DelegationPath,
        inherited: &[ConditionSpec],
        host: &str,
        enforce_tls: bool,
    ) {
        let identity = owner.identity();
        let object = ObjectRef::new(ObjectKind::GatewayHost, identity.clone());
        let visited = visited.push(identity.clone());

        for route in &owner.spec.routes {
            if let Err(reason) = validate_conditions(&route.conditions) {
                self.invalid(&object, reason, host);
                return;
            }
            if route.delegate.is_some() && !route.services.is_empty() {
                self.invalid(&object, "route: cannot specify services and delegate in the same route", host);
                return;
            }

            let mut conditions = inherited.to_vec();
            conditions.extend(route.conditions.iter().cloned());

            let Some(delegate) = route.delegate.as_ref() else {
                if let Some(built) = self.build_route(snapshot, &object, route, &conditions, host) {
                    self.attach_route(host, built, enforce_tls, route.permit_insecure);
                }
                continue;
            };

            if has_regex(&route.conditions) {
                self.invalid(&object, "route: regex conditions cannot be delegated", host);
                return;
            }
            let target = delegate.target(&identity.namespace);
            let Some(child) = snapshot.gateway_host(&target) else {
                debug!(object = %object, delegate = %target, "Route delegate not found");
                continue;
            };
            self.orphans.remove(&target);

            if visited.contains(&target) {
                self.invalid(
                    &object,
                    format!("route creates a delegation cycle: {}", visited.cycle_description(&target)),
                    host,
                );
                return;
            }
            if child.spec.virtual_host.is_some() {
                self.invalid(
                    &object,
                    format!("root GatewayHost cannot delegate to another root GatewayHost {}", target),
                    host,
                );
                return;
            }

            self.process_routes(snapshot, child, visited.clone(), &conditions, host, enforce_tls);
        }

        if visited.len() == 1 {
            self.merge_service_routes(snapshot, host, enforce_tls);
        }

        self.valid(&object, host);
    }

    /// Merge the routes of every ServiceRoute claiming `host`
    fn merge_service_routes(&mut self, snapshot: &CacheSnapshot<'_>, host: &str, enforce_tls: bool) {
        let matching: Vec<(&Identity, &ServiceRoute)> = snapshot
            .service_routes()
            .filter(|(_, service_route)| service_route.spec.fqdn.trim() == host)
            .collect();

        for (identity, service_route) in matching {
            self.merged_service_routes.insert(identity.clone());
            let object = ObjectRef::new(ObjectKind::ServiceRoute, identity.clone());

            let mut accepted = true;
            for route in &service_route.spec.routes {
                if let Err(reason) = validate_conditions(&route.conditions) {
                    self.invalid(&object, reason, host);
                    accepted = false;
                    break;
                }
                if route.delegate.is_some() {
                    self.invalid(&object, "ServiceRoute routes cannot delegate", host);
                    accepted = false;
                    break;
                }
                if let Some(built) =
                    self.build_route(snapshot, &object, route, &route.conditions, host)
                {
                    self.attach_route(host, built, enforce_tls, route.permit_insecure);
                }
            }

            if accepted {
                self.valid(&object, host);
            }
        }
    }

    /// Build a route out of a service-listing route entry. Services that do
    /// not resolve are skipped; a route left without clusters is dropped.
    fn build_route(
        &mut self,
        snapshot: &CacheSnapshot<'_>,
        object: &ObjectRef,
        spec: &RouteSpec,
        conditions: &[ConditionSpec],
        host: &str,
    ) -> Option<Route> {
        if spec.services.is_empty() {
            self.invalid(object, "route: must specify at least one service or a delegate", host);
            return None;
        }

        let mut route = Route::new(merge_path_conditions(conditions));
        route.headers = merge_header_conditions(conditions);
        route.websocket = spec.enable_websockets;
        route.prefix_rewrite = spec.prefix_rewrite.clone().filter(|rewrite| !rewrite.is_empty());
        route.retry_policy = retry_policy(spec.retry_policy.as_ref());
        route.timeout_policy = timeout_policy(spec.timeout_policy.as_ref());
        route.disable_external_authorization = spec.disable_external_authorization;
        route.filters = self.resolve_filters(snapshot, object, &spec.filters, FilterScope::Route, host);

        for service in &spec.services {
            if let Some(cluster) = self.build_cluster(snapshot, object, service, host) {
                route.clusters.push(cluster);
            }
        }

        if route.clusters.is_empty() {
            debug!(object = %object, route = %route.key(), "Dropping route without clusters");
            return None;
        }
        Some(route)
    }

    fn build_cluster(
        &mut self,
        snapshot: &CacheSnapshot<'_>,
        object: &ObjectRef,
        service: &ServiceSpec,
        host: &str,
    ) -> Option<Cluster> {
        let namespace = object.identity.namespace.clone();
        if !(1..=65535).contains(&service.port) {
            self.invalid(
                object,
                format!("service {}: port must be in the range 1-65535", service.name),
                host,
            );
            return None;
        }
        if service.weight < 0 {
            self.invalid(
                object,
                format!("service {}: weight must be greater than or equal to zero", service.name),
                host,
            );
            return None;
        }

        let protocol = match service.protocol.as_deref() {
            None => None,
            Some(value) => match UpstreamProtocol::parse(value) {
                Some(protocol) => Some(protocol),
                None => {
                    self.invalid(
                        object,
                        format!("service {}: unsupported protocol {:?}", service.name, value),
                        host,
                    );
                    return None;
                }
            },
        };

        let service_id = Identity::new(&namespace, &service.name);
        let Some(upstream) = self.lookup_http_service(
            snapshot,
            &service_id,
            PortSelector::Number(service.port),
            protocol,
        ) else {
            self.invalid(
                object,
                format!("Service [{}:{}] is invalid or missing", service.name, service.port),
                host,
            );
            return None;
        };

        let effective_protocol = upstream.protocol;
        let mut cluster = Cluster::new(Service::Http(upstream));
        cluster.strategy = LoadBalancerStrategy::parse(service.strategy.as_deref());
        cluster.weight = u32::try_from(service.weight).unwrap_or(u32::MAX);
        cluster.health_check = service.health_check.as_ref().map(health_check);

        if effective_protocol == UpstreamProtocol::Tls {
            if let Some(validation) = service.upstream_validation.as_ref() {
                let ca_id = Identity::parse_reference(&validation.ca_secret, &namespace);
                let ca_secret = self.lookup_ca_bundle(snapshot, &ca_id);
                match ca_secret {
                    Some(ca_secret) if !validation.subject_name.trim().is_empty() => {
                        cluster.upstream_validation = Some(UpstreamValidation {
                            ca_secret,
                            subject_name: validation.subject_name.clone(),
                        });
                    }
                    Some(_) => {
                        self.invalid(
                            object,
                            format!(
                                "Service [{}:{}] TLS upstream validation policy error: subjectName is required",
                                service.name, service.port
                            ),
                            host,
                        );
                        return None;
                    }
                    None => {
                        self.invalid(
                            object,
                            format!(
                                "Service [{}:{}] TLS upstream validation policy error: CA secret {} not found or is malformed",
                                service.name, service.port, ca_id
                            ),
                            host,
                        );
                        return None;
                    }
                }
            }

            if let Some(validation) = service.client_validation.as_ref() {
                let secret_id = Identity::parse_reference(&validation.secret_name, &namespace);
                match self.lookup_keypair(snapshot, &secret_id) {
                    Some(secret) => cluster.client_certificate = Some(secret),
                    None => {
                        self.invalid(
                            object,
                            format!(
                                "Service [{}:{}] client certificate {} not found or is malformed",
                                service.name, service.port, secret_id
                            ),
                            host,
                        );
                        return None;
                    }
                }
            }
        }

        cluster.filters =
            self.resolve_filters(snapshot, object, &service.filters, FilterScope::Cluster, host);
        Some(cluster)
    }

    /// Routes always land on the insecure host, redirecting to HTTPS when
    /// TLS is enforced, and on the secure host when TLS is enforced
    fn attach_route(&mut self, host: &str, route: Route, enforce_tls: bool, permit_insecure: bool) {
        let mut insecure = route.clone();
        insecure.https_upgrade = enforce_tls && !permit_insecure;
        self.insecure_host(host).add_route(insecure);

        if enforce_tls {
            self.secure_host(host).virtual_host.add_route(route);
        }
    }

    fn process_tcp_proxy(
        &mut self,
        snapshot: &CacheSnapshot<'_>,
        owner: &GatewayHost,
        visited: DelegationPath,
        host: &str,
    ) {
        let identity = owner.identity();
        let object = ObjectRef::new(ObjectKind::GatewayHost, identity.clone());
        let Some(tcp_proxy) = owner.spec.tcp_proxy.as_ref() else {
            self.invalid(&object, "tcpproxy: delegate target has no tcpproxy block", host);
            return;
        };
        let visited = visited.push(identity.clone());

        if !tcp_proxy.services.is_empty() && tcp_proxy.delegate.is_some() {
            self.invalid(
                &object,
                "tcpproxy: cannot specify services and delegate in the same tcpproxy block",
                host,
            );
            return;
        }

        if !tcp_proxy.services.is_empty() {
            let mut proxy = TcpProxy::default();
            for service in &tcp_proxy.services {
                let service_id = Identity::new(&identity.namespace, &service.name);
                let Some(upstream) = self.lookup_tcp_service(snapshot, &service_id, service.port)
                else {
                    self.invalid(
                        &object,
                        format!("tcpproxy: service {}/{}: not found", service_id, service.port),
                        host,
                    );
                    return;
                };
                let mut cluster = Cluster::new(Service::Tcp(upstream));
                cluster.strategy = LoadBalancerStrategy::parse(service.strategy.as_deref());
                proxy.clusters.push(cluster);
            }

            self.secure_host(host).virtual_host.tcp_proxy = Some(proxy);
            self.valid(&object, host);
            return;
        }

        let Some(delegate) = tcp_proxy.delegate.as_ref() else {
            self.invalid(&object, "tcpproxy: either services or delegate must be specified", host);
            return;
        };
        let target = delegate.target(&identity.namespace);
        let Some(child) = snapshot.gateway_host(&target) else {
            self.invalid(&object, format!("tcpproxy: unresolved delegate {}", target), host);
            return;
        };
        self.orphans.remove(&target);

        if visited.contains(&target) {
            self.invalid(
                &object,
                format!("tcpproxy creates a delegation cycle: {}", visited.cycle_description(&target)),
                host,
            );
            return;
        }

        self.process_tcp_proxy(snapshot, child, visited, host);
        self.valid(&object, host);
    }

    fn finalize(mut self, snapshot: &CacheSnapshot<'_>) -> Graph {
        let orphans = std::mem::take(&mut self.orphans);
        for identity in orphans {
            if snapshot.gateway_host(&identity).is_none() {
                continue;
            }
            let object = ObjectRef::new(ObjectKind::GatewayHost, identity);
            self.set_status(
                &object,
                StatusKind::Orphaned,
                "this GatewayHost is not part of a delegation chain from a root GatewayHost"
                    .to_string(),
                "",
            );
        }

        let unmerged: Vec<(Identity, String)> = snapshot
            .service_routes()
            .filter(|(identity, _)| !self.merged_service_routes.contains(*identity))
            .map(|(identity, route)| (identity.clone(), route.spec.fqdn.clone()))
            .collect();
        for (identity, fqdn) in unmerged {
            let object = ObjectRef::new(ObjectKind::ServiceRoute, identity);
            self.set_status(
                &object,
                StatusKind::Orphaned,
                format!("no root GatewayHost serves fqdn {:?}", fqdn),
                &fqdn,
            );
        }

        let mut insecure = Listener::new(INSECURE_LISTENER_PORT);
        insecure.hosts = self
            .insecure
            .into_iter()
            .map(|(name, host)| (name, Host::Virtual(host)))
            .collect();
        let mut secure = Listener::new(SECURE_LISTENER_PORT);
        secure.hosts =
            self.secure.into_iter().map(|(name, host)| (name, Host::Secure(host))).collect();

        let graph = Graph::new([insecure, secure], self.statuses);
        debug!(
            listeners = graph.listeners.len(),
            statuses = graph.statuses.len(),
            "Graph build complete"
        );
        graph
    }
}

fn validate_conditions(conditions: &[ConditionSpec]) -> Result<(), String> {
    path_conditions_valid(conditions)?;
    header_conditions_valid(conditions)
}

fn resolve_service(
    identity: &Identity,
    service: &KubeService,
    port: &k8s_openapi::api::core::v1::ServicePort,
) -> ResolvedService {
    let meta = &service.metadata;
    let external_name = service
        .spec
        .as_ref()
        .filter(|spec| spec.type_.as_deref() == Some("ExternalName"))
        .and_then(|spec| spec.external_name.clone())
        .filter(|name| !name.is_empty());

    ResolvedService {
        tcp: TcpService {
            name: identity.name.clone(),
            namespace: identity.namespace.clone(),
            port: ServicePortRef { name: port.name.clone(), port: port.port },
            max_connections: annotations::parse_u32(meta, annotations::MAX_CONNECTIONS),
            max_pending_requests: annotations::parse_u32(meta, annotations::MAX_PENDING_REQUESTS),
            max_requests: annotations::parse_u32(meta, annotations::MAX_REQUESTS),
            max_retries: annotations::parse_u32(meta, annotations::MAX_RETRIES),
            external_name,
        },
        annotated_protocol: annotations::upstream_protocol(meta, port)
            .and_then(UpstreamProtocol::parse),
    }
}

fn health_check(spec: &HealthCheckSpec) -> HealthCheck {
    HealthCheck {
        path: spec.path.clone(),
        host: spec.host.clone().filter(|host| !host.is_empty()),
        interval_seconds: spec.interval_seconds,
        timeout_seconds: spec.timeout_seconds,
        unhealthy_threshold: spec.unhealthy_threshold_count,
        healthy_threshold: spec.healthy_threshold_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::domain::{DelegateSpec, GatewayHostSpec, TlsSpec, VirtualHostSpec};
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec as KubeServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use tracing_test::traced_test;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        }
    }

    fn service(name: &str, port: i32) -> KubeService {
        KubeService {
            metadata: meta(name),
            spec: Some(KubeServiceSpec {
                ports: Some(vec![ServicePort { port, ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn route_to(name: &str, port: i32) -> RouteSpec {
        RouteSpec { services: vec![ServiceSpec::new(name, port)], ..Default::default() }
    }

    fn root(name: &str, fqdn: &str, routes: Vec<RouteSpec>) -> GatewayHost {
        GatewayHost {
            metadata: meta(name),
            spec: GatewayHostSpec {
                virtual_host: Some(VirtualHostSpec { fqdn: fqdn.to_string(), ..Default::default() }),
                routes,
                ..Default::default()
            },
        }
    }

    fn status_of(graph: &Graph, name: &str) -> Option<StatusKind> {
        let object = ObjectRef::new(ObjectKind::GatewayHost, Identity::new("default", name));
        graph.statuses.get(&object).map(|status| status.kind)
    }

    #[test]
    fn builder_is_fresh_per_build() {
        let cache = ResourceCache::new(CacheConfig::default());
        assert_eq!(GraphBuilder::default().build(&cache), Graph::default());
    }

    #[test]
    fn missing_service_marks_root_invalid() {
        let cache = ResourceCache::new(CacheConfig::default());
        cache.insert(root("app", "app.example.com", vec![route_to("missing", 80)]));

        let graph = GraphBuilder::default().build(&cache);
        assert!(graph.listeners.is_empty());
        assert_eq!(status_of(&graph, "app"), Some(StatusKind::Invalid));
    }

    #[test]
    fn out_of_range_port_is_invalid() {
        let cache = ResourceCache::new(CacheConfig::default());
        cache.insert(service("kuard", 80));
        cache.insert(root(
            "app",
            "app.example.com",
            vec![route_to("kuard", 70000), route_to("kuard", 80)],
        ));

        let graph = GraphBuilder::default().build(&cache);
        let status = graph.statuses().next().unwrap();
        assert_eq!(status.kind, StatusKind::Invalid);
        assert!(status.description.contains("port must be in the range"));
        assert_eq!(graph.listeners.len(), 1);
    }

    #[test]
    fn services_and_delegate_are_exclusive() {
        let cache = ResourceCache::new(CacheConfig::default());
        cache.insert(service("kuard", 80));
        let mut route = route_to("kuard", 80);
        route.delegate = Some(DelegateSpec::new("child"));
        cache.insert(root("app", "app.example.com", vec![route]));

        let graph = GraphBuilder::default().build(&cache);
        assert_eq!(status_of(&graph, "app"), Some(StatusKind::Invalid));
        assert!(graph.listeners.is_empty());
    }

    #[test]
    fn passthrough_with_secret_is_invalid() {
        let cache = ResourceCache::new(CacheConfig::default());
        let mut host = root("app", "app.example.com", vec![]);
        if let Some(vhost) = host.spec.virtual_host.as_mut() {
            vhost.tls = Some(TlsSpec {
                secret_name: Some("cert".to_string()),
                passthrough: true,
                ..Default::default()
            });
        }
        cache.insert(host);

        let graph = GraphBuilder::default().build(&cache);
        assert_eq!(status_of(&graph, "app"), Some(StatusKind::Invalid));
    }

    #[test]
    fn protocol_override_wins_over_annotation() {
        let cache = ResourceCache::new(CacheConfig::default());
        let mut annotated = service("grpc", 9000);
        annotated.metadata.annotations = Some(
            [(annotations::UPSTREAM_PROTOCOL_H2C.to_string(), "9000".to_string())].into(),
        );
        cache.insert(annotated);

        let mut explicit = ServiceSpec::new("grpc", 9000);
        explicit.protocol = Some("h2".to_string());
        cache.insert(root(
            "app",
            "app.example.com",
            vec![
                RouteSpec { services: vec![explicit], ..Default::default() },
                RouteSpec {
                    conditions: vec![ConditionSpec::prefix("/plain")],
                    ..route_to("grpc", 9000)
                },
            ],
        ));

        let graph = GraphBuilder::default().build(&cache);
        let listener = graph.listener(INSECURE_LISTENER_PORT).unwrap();
        let Host::Virtual(host) = &listener.hosts["app.example.com"] else {
            panic!("expected an insecure host");
        };
        assert_eq!(host.routes["prefix:/"].clusters[0].upstream.protocol(), UpstreamProtocol::H2);
        assert_eq!(
            host.routes["prefix:/plain"].clusters[0].upstream.protocol(),
            UpstreamProtocol::H2c
        );
    }

    #[test]
    #[traced_test]
    fn dropped_routes_are_logged() {
        let cache = ResourceCache::new(CacheConfig::default());
        cache.insert(root("app", "app.example.com", vec![route_to("missing", 80)]));

        GraphBuilder::default().build(&cache);
        assert!(logs_contain("Routing object is invalid"));
    }

    #[test]
    #[traced_test]
    fn tls_root_filters_are_resolved_once() {
        use crate::cache::{TLS_CERT_KEY, TLS_KEY_KEY};
        use k8s_openapi::api::core::v1::Secret as KubeSecret;
        use k8s_openapi::ByteString;

        let cache = ResourceCache::new(CacheConfig::default());
        cache.insert(service("kuard", 80));
        cache.insert(KubeSecret {
            metadata: meta("tls"),
            data: Some(BTreeMap::from([
                (TLS_CERT_KEY.to_string(), ByteString(b"cert".to_vec())),
                (TLS_KEY_KEY.to_string(), ByteString(b"key".to_vec())),
            ])),
            ..Default::default()
        });
        let mut host = root("app", "app.example.com", vec![route_to("kuard", 80)]);
        if let Some(vhost) = host.spec.virtual_host.as_mut() {
            vhost.tls = Some(TlsSpec { secret_name: Some("tls".to_string()), ..Default::default() });
            vhost.filters = vec![FilterRef::new("absent")];
        }
        cache.insert(host);

        let graph = GraphBuilder::default().build(&cache);
        assert_eq!(status_of(&graph, "app"), Some(StatusKind::Invalid));
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("filter default/absent not found")).count() {
                1 => Ok(()),
                n => Err(format!("missing filter reported {} times", n)),
            }
        });
    }
}
