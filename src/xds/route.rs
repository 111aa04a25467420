//! Route configuration translation
//!
//! Each listener role gets one route configuration holding a virtual host
//! per graph host. Routes carry their cluster action, policies and the
//! per-route overrides of route and cluster scoped filters.

use crate::dag::{
    self, Cluster as DagCluster, Filter, HeaderCondition, HeaderMatchKind, LoadBalancerStrategy,
    PathCondition, RetryPolicy as DagRetryPolicy, Timeout, TimeoutPolicy, WILDCARD_HOST,
};
use crate::dag::policy::{retry_filter_policy, timeout_filter_policy};
use crate::domain::{FilterScope, FilterSettings};
use crate::xds::cluster::cluster_name;
use crate::xds::filters::http::ChainEntry;
use crate::xds::filters::{any_from_message, per_route_filter_config};
use crate::xds::naming::hashname;
use crate::xds::duration;
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier,
    redirect_action::{RedirectResponseCode, SchemeRewriteSpecifier},
    route::Action,
    route_action::{
        hash_policy::{Cookie, PolicySpecifier},
        ClusterSpecifier, HashPolicy, HostRewriteSpecifier, UpgradeConfig,
    },
    route_match::PathSpecifier,
    weighted_cluster::ClusterWeight,
    HeaderMatcher, RedirectAction, RetryPolicy, Route, RouteAction, RouteConfiguration, RouteMatch,
    VirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::extensions::filters::http::ext_authz::v3::{
    ext_authz_per_route::Override as ExtAuthzOverride, ExtAuthzPerRoute,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatcher, StringMatcher,
};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration as ProtoDuration, UInt32Value};
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Route configuration (and listener) name of the plaintext role
pub const HTTP_ROUTE_CONFIG_NAME: &str = "ingress_http";
/// Route configuration (and listener) name of the TLS role
pub const HTTPS_ROUTE_CONFIG_NAME: &str = "ingress_https";

/// Cookie carrying the session affinity hash of `Cookie` balanced routes
pub const SESSION_AFFINITY_COOKIE: &str = "X-Switchyard-Session-Affinity";

/// Name of the external authorization filter routes may opt out of
pub const EXT_AUTHZ_FILTER_NAME: &str = "envoy.filters.http.ext_authz";
const EXT_AUTHZ_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthzPerRoute";

/// Which listener a virtual host is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerRole {
    Insecure,
    Secure,
}

impl ListenerRole {
    pub fn route_config_name(self) -> &'static str {
        match self {
            ListenerRole::Insecure => HTTP_ROUTE_CONFIG_NAME,
            ListenerRole::Secure => HTTPS_ROUTE_CONFIG_NAME,
        }
    }
}

/// Assemble a route configuration from translated virtual hosts
pub fn route_configuration(name: &str, mut virtual_hosts: Vec<VirtualHost>) -> RouteConfiguration {
    virtual_hosts.sort_by(|a, b| a.name.cmp(&b.name));
    RouteConfiguration { name: name.to_string(), virtual_hosts, ..Default::default() }
}

/// Envoy virtual host name of a graph host
pub fn virtual_host_name(host: &str) -> String {
    hashname(60, &[host])
}

/// Envoy domains matched by a graph host
pub fn domains(host: &str) -> Vec<String> {
    if host == WILDCARD_HOST {
        vec![host.to_string()]
    } else {
        vec![host.to_string(), format!("{}:*", host)]
    }
}

/// Translate a graph virtual host for `role`.
///
/// On the plaintext role, routes flagged for a TLS upgrade become redirects
/// and the host's own filters are switched on through per-host overrides,
/// since the plaintext connection manager is shared by every host.
pub fn virtual_host(host: &dag::VirtualHost, role: ListenerRole) -> VirtualHost {
    let mut routes: Vec<&dag::Route> = host.routes.values().collect();
    routes.sort_by(|a, b| route_order(a, b));

    let mut virtual_host = VirtualHost {
        name: virtual_host_name(&host.name),
        domains: domains(&host.name),
        routes: routes.into_iter().map(|route| route_entry(route, role)).collect(),
        ..Default::default()
    };

    if role == ListenerRole::Insecure {
        virtual_host.typed_per_filter_config =
            per_filter_overrides(&host.filters, FilterScope::VirtualHost);
    }

    virtual_host
}

/// Chain entries the routes of `host` need in their connection manager.
/// They are placed disabled and switched on per route or per cluster.
pub fn route_chain_entries(host: &dag::VirtualHost) -> Vec<ChainEntry> {
    let mut entries = Vec::new();
    for route in host.routes.values() {
        entries.extend(
            route.filters.iter().filter_map(|filter| ChainEntry::from_filter(filter, FilterScope::Route, true)),
        );
        for cluster in &route.clusters {
            entries.extend(
                cluster
                    .filters
                    .iter()
                    .filter_map(|filter| ChainEntry::from_filter(filter, FilterScope::Cluster, true)),
            );
        }
    }
    entries
}

/// Regex routes first, then longer prefixes, then routes with more header
/// conditions, and finally by key so the order is total.
fn route_order(a: &dag::Route, b: &dag::Route) -> Ordering {
    let rank = |route: &dag::Route| match route.path {
        PathCondition::Regex(_) => 0,
        PathCondition::Prefix(_) => 1,
    };

    rank(a)
        .cmp(&rank(b))
        .then_with(|| b.path.value().len().cmp(&a.path.value().len()))
        .then_with(|| b.headers.len().cmp(&a.headers.len()))
        .then_with(|| a.key().cmp(&b.key()))
}

fn route_entry(route: &dag::Route, role: ListenerRole) -> Route {
    let action = if role == ListenerRole::Insecure && route.https_upgrade {
        Action::Redirect(RedirectAction {
            scheme_rewrite_specifier: Some(SchemeRewriteSpecifier::HttpsRedirect(true)),
            response_code: RedirectResponseCode::MovedPermanently as i32,
            ..Default::default()
        })
    } else {
        Action::Route(route_action(route))
    };

    let mut typed_per_filter_config = per_filter_overrides(&route.filters, FilterScope::Route);
    if let [only] = route.clusters.as_slice() {
        typed_per_filter_config.extend(per_filter_overrides(&only.filters, FilterScope::Cluster));
    }
    if route.disable_external_authorization {
        typed_per_filter_config.insert(
            EXT_AUTHZ_FILTER_NAME.to_string(),
            any_from_message(
                EXT_AUTHZ_PER_ROUTE_TYPE_URL,
                &ExtAuthzPerRoute { r#override: Some(ExtAuthzOverride::Disabled(true)) },
            ),
        );
    }

    Route {
        r#match: Some(route_match(route)),
        action: Some(action),
        typed_per_filter_config,
        ..Default::default()
    }
}

fn route_match(route: &dag::Route) -> RouteMatch {
    let path_specifier = match &route.path {
        PathCondition::Prefix(prefix) => PathSpecifier::Prefix(prefix.clone()),
        PathCondition::Regex(regex) => {
            PathSpecifier::SafeRegex(RegexMatcher { regex: regex.clone(), ..Default::default() })
        }
    };

    RouteMatch {
        path_specifier: Some(path_specifier),
        headers: route.headers.iter().map(header_matcher).collect(),
        ..Default::default()
    }
}

fn header_matcher(condition: &HeaderCondition) -> HeaderMatcher {
    let specifier = match condition.kind {
        HeaderMatchKind::Present => HeaderMatchSpecifier::PresentMatch(true),
        HeaderMatchKind::Exact => HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Exact(condition.value.clone())),
            ..Default::default()
        }),
        HeaderMatchKind::Contains => HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Contains(condition.value.clone())),
            ..Default::default()
        }),
    };

    HeaderMatcher {
        name: condition.name.clone(),
        invert_match: condition.invert,
        header_match_specifier: Some(specifier),
        ..Default::default()
    }
}

fn route_action(route: &dag::Route) -> RouteAction {
    #[allow(deprecated)]
    let mut route_action = RouteAction {
        cluster_specifier: Some(cluster_specifier(&route.clusters)),
        prefix_rewrite: route.prefix_rewrite.clone().unwrap_or_default(),
        ..Default::default()
    };

    if let Some(policy) = &route.retry_policy {
        route_action.retry_policy = Some(retry_policy(policy));
    }
    if let Some(policy) = &route.timeout_policy {
        apply_timeout_policy(&mut route_action, policy);
    }

    if route.clusters.iter().any(|cluster| cluster.strategy == LoadBalancerStrategy::Cookie) {
        route_action.hash_policy = vec![HashPolicy {
            policy_specifier: Some(PolicySpecifier::Cookie(Cookie {
                name: SESSION_AFFINITY_COOKIE.to_string(),
                ttl: Some(ProtoDuration { seconds: 0, nanos: 0 }),
                path: "/".to_string(),
                ..Default::default()
            })),
            ..Default::default()
        }];
    }

    if route.websocket {
        route_action.upgrade_configs =
            vec![UpgradeConfig { upgrade_type: "websocket".to_string(), ..Default::default() }];
    }

    for filter in &route.filters {
        apply_route_filter(&mut route_action, filter);
    }
    if let [only] = route.clusters.as_slice() {
        for filter in &only.filters {
            apply_route_filter(&mut route_action, filter);
        }
    }

    route_action
}

/// Clusters sharing a wire name are folded into one weighted entry whose
/// weight is the sum of theirs.
fn cluster_specifier(clusters: &[DagCluster]) -> ClusterSpecifier {
    if let [only] = clusters {
        return ClusterSpecifier::Cluster(cluster_name(only));
    }

    let uniform = clusters.iter().all(|cluster| cluster.weight == 0);
    let mut weighted: BTreeMap<String, ClusterWeight> = BTreeMap::new();
    for cluster in clusters {
        let weight = if uniform { 1 } else { cluster.weight };
        match weighted.entry(cluster_name(cluster)) {
            Entry::Occupied(mut entry) => {
                if let Some(total) = entry.get_mut().weight.as_mut() {
                    total.value = total.value.saturating_add(weight);
                }
            }
            Entry::Vacant(entry) => {
                let name = entry.key().clone();
                entry.insert(ClusterWeight {
                    name,
                    weight: Some(UInt32Value { value: weight }),
                    typed_per_filter_config: per_filter_overrides(&cluster.filters, FilterScope::Cluster),
                    ..Default::default()
                });
            }
        }
    }

    ClusterSpecifier::WeightedClusters(WeightedCluster {
        clusters: weighted.into_values().collect(),
        ..Default::default()
    })
}

/// Envoy value of a normalized timeout; `None` keeps the proxy default
/// and a zero duration disables the timeout.
fn timeout(value: Timeout) -> Option<ProtoDuration> {
    match value {
        Timeout::UseDefault => None,
        Timeout::Infinity => Some(ProtoDuration { seconds: 0, nanos: 0 }),
        Timeout::After(after) => Some(duration(after)),
    }
}

fn retry_policy(policy: &DagRetryPolicy) -> RetryPolicy {
    RetryPolicy {
        retry_on: policy.retry_on.clone(),
        num_retries: Some(UInt32Value { value: policy.num_retries }),
        per_try_timeout: timeout(policy.per_try_timeout),
        ..Default::default()
    }
}

fn apply_timeout_policy(route_action: &mut RouteAction, policy: &TimeoutPolicy) {
    route_action.timeout = timeout(policy.response);
    route_action.idle_timeout = timeout(policy.idle);
}

/// Fold the route-action effect of a retry, timeout, host rewrite or rate
/// limit filter into `route_action`
fn apply_route_filter(route_action: &mut RouteAction, filter: &Filter) {
    let settings = match filter.settings(FilterScope::Route) {
        Ok(settings) => settings,
        Err(error) => {
            warn!(filter = %filter.name, %error, "Skipping route filter with invalid configuration");
            return;
        }
    };

    match settings {
        FilterSettings::Retry(config) => {
            route_action.retry_policy = Some(retry_policy(&retry_filter_policy(&config)));
        }
        FilterSettings::Timeout(config) => {
            apply_timeout_policy(route_action, &timeout_filter_policy(&config));
        }
        FilterSettings::HostRewrite(config) => {
            route_action.host_rewrite_specifier =
                Some(HostRewriteSpecifier::HostRewriteLiteral(config.host));
        }
        FilterSettings::RateLimit(config) => {
            route_action.rate_limits.extend(config.route_rate_limit());
        }
        _ => {}
    }
}

/// Per-filter overrides enabling the connection manager filters named by
/// `filters`, keyed by filter name
fn per_filter_overrides(filters: &[Filter], scope: FilterScope) -> HashMap<String, EnvoyAny> {
    let mut overrides = HashMap::new();
    for filter in filters.iter().filter(|filter| filter.filter_type.is_http_filter()) {
        let settings = match filter.settings(scope) {
            Ok(settings) => settings,
            Err(error) => {
                warn!(filter = %filter.name, %error, "Skipping filter override with invalid configuration");
                continue;
            }
        };
        // Route-only rate limit settings contribute actions, not a filter.
        if !matches!(settings.chain_config(), Ok(Some(_))) {
            continue;
        }

        match settings.per_route_config() {
            Ok(config) => {
                overrides.insert(filter.name.clone(), per_route_filter_config(config));
            }
            Err(error) => {
                warn!(filter = %filter.name, %error, "Skipping filter override with invalid configuration");
            }
        }
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{HttpService, Service, ServicePortRef, TcpService, UpstreamProtocol};
    use crate::domain::FilterType;
    use crate::xds::filters::FILTER_CONFIG_TYPE_URL;
    use std::time::Duration;

    fn cluster(name: &str, weight: u32) -> DagCluster {
        let mut cluster = DagCluster::new(Service::Http(HttpService {
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
        }));
        cluster.weight = weight;
        cluster
    }

    fn route(prefix: &str, clusters: Vec<DagCluster>) -> dag::Route {
        let mut route = dag::Route::new(PathCondition::Prefix(prefix.to_string()));
        route.clusters = clusters;
        route
    }

    fn host_with(routes: Vec<dag::Route>) -> dag::VirtualHost {
        let mut host = dag::VirtualHost::new("www.example.com");
        for route in routes {
            host.add_route(route);
        }
        host
    }

    fn action(route: &Route) -> &RouteAction {
        match route.action.as_ref() {
            Some(Action::Route(action)) => action,
            other => panic!("expected route action, got {:?}", other),
        }
    }

    #[test]
    fn wildcard_domains() {
        assert_eq!(domains("*"), vec!["*"]);
        assert_eq!(domains("www.example.com"), vec!["www.example.com", "www.example.com:*"]);
    }

    #[test]
    fn routes_are_ordered_by_specificity() {
        let mut with_header = route("/", vec![cluster("a", 0)]);
        with_header.headers.push(HeaderCondition {
            name: "x-canary".to_string(),
            value: String::new(),
            kind: HeaderMatchKind::Present,
            invert: false,
        });
        let mut regex = route("/", vec![cluster("a", 0)]);
        regex.path = PathCondition::Regex("/v[0-9]+".to_string());

        let host = host_with(vec![
            route("/", vec![cluster("a", 0)]),
            route("/api/v1", vec![cluster("a", 0)]),
            with_header,
            regex,
            route("/api", vec![cluster("a", 0)]),
        ]);
        let translated = virtual_host(&host, ListenerRole::Secure);

        let paths: Vec<String> = translated
            .routes
            .iter()
            .map(|route| match route.r#match.as_ref().and_then(|m| m.path_specifier.as_ref()) {
                Some(PathSpecifier::Prefix(prefix)) => prefix.clone(),
                Some(PathSpecifier::SafeRegex(regex)) => format!("regex:{}", regex.regex),
                other => panic!("unexpected path specifier {:?}", other),
            })
            .collect();
        assert_eq!(paths, ["regex:/v[0-9]+", "/api/v1", "/api", "/", "/"]);
        assert_eq!(translated.routes[3].r#match.as_ref().unwrap().headers.len(), 1);
    }

    #[test]
    fn all_zero_weights_become_uniform() {
        let host = host_with(vec![route("/", vec![cluster("a", 0), cluster("b", 0)])]);
        let translated = virtual_host(&host, ListenerRole::Secure);

        let Some(ClusterSpecifier::WeightedClusters(weighted)) =
            &action(&translated.routes[0]).cluster_specifier
        else {
            panic!("expected weighted clusters");
        };
        assert!(weighted.clusters.iter().all(|c| c.weight == Some(UInt32Value { value: 1 })));
    }

    #[test]
    fn explicit_zero_weight_is_kept() {
        let host = host_with(vec![route("/", vec![cluster("a", 0), cluster("b", 20)])]);
        let translated = virtual_host(&host, ListenerRole::Secure);

        let Some(ClusterSpecifier::WeightedClusters(weighted)) =
            &action(&translated.routes[0]).cluster_specifier
        else {
            panic!("expected weighted clusters");
        };
        let weights: Vec<u32> =
            weighted.clusters.iter().map(|c| c.weight.as_ref().map_or(0, |w| w.value)).collect();
        assert_eq!(weights.iter().sum::<u32>(), 20);
        assert!(weights.contains(&0));
    }

    #[test]
    fn repeated_service_weights_are_summed() {
        let host = host_with(vec![route("/", vec![cluster("a", 30), cluster("b", 20), cluster("a", 50)])]);
        let translated = virtual_host(&host, ListenerRole::Secure);

        let Some(ClusterSpecifier::WeightedClusters(weighted)) =
            &action(&translated.routes[0]).cluster_specifier
        else {
            panic!("expected weighted clusters");
        };
        let entries: Vec<(String, u32)> = weighted
            .clusters
            .iter()
            .map(|c| (c.name.clone(), c.weight.as_ref().map_or(0, |w| w.value)))
            .collect();
        assert_eq!(
            entries,
            vec![(cluster_name(&cluster("a", 0)), 80), (cluster_name(&cluster("b", 0)), 20)]
        );
    }

    #[test]
    fn upgrade_becomes_redirect_only_on_plaintext() {
        let mut upgraded = route("/", vec![cluster("a", 0)]);
        upgraded.https_upgrade = true;
        let host = host_with(vec![upgraded]);

        let insecure = virtual_host(&host, ListenerRole::Insecure);
        match insecure.routes[0].action.as_ref() {
            Some(Action::Redirect(redirect)) => {
                assert_eq!(
                    redirect.scheme_rewrite_specifier,
                    Some(SchemeRewriteSpecifier::HttpsRedirect(true))
                );
            }
            other => panic!("expected redirect, got {:?}", other),
        }

        let secure = virtual_host(&host, ListenerRole::Secure);
        assert!(matches!(secure.routes[0].action, Some(Action::Route(_))));
    }

    #[test]
    fn cookie_strategy_adds_hash_policy() {
        let mut sticky = cluster("a", 0);
        sticky.strategy = LoadBalancerStrategy::Cookie;
        let host = host_with(vec![route("/", vec![sticky])]);
        let translated = virtual_host(&host, ListenerRole::Secure);

        let hash_policy = &action(&translated.routes[0]).hash_policy;
        assert_eq!(hash_policy.len(), 1);
        match &hash_policy[0].policy_specifier {
            Some(PolicySpecifier::Cookie(cookie)) => {
                assert_eq!(cookie.name, SESSION_AFFINITY_COOKIE);
                assert_eq!(cookie.path, "/");
            }
            other => panic!("expected cookie hash policy, got {:?}", other),
        }
    }

    #[test]
    fn policies_and_websockets() {
        let mut policed = route("/", vec![cluster("a", 0)]);
        policed.websocket = true;
        policed.retry_policy = Some(DagRetryPolicy {
            retry_on: "gateway-error".to_string(),
            num_retries: 3,
            per_try_timeout: Timeout::After(Duration::from_millis(150)),
        });
        policed.timeout_policy =
            Some(TimeoutPolicy { response: Timeout::Infinity, idle: Timeout::UseDefault });
        let host = host_with(vec![policed]);
        let translated = virtual_host(&host, ListenerRole::Secure);
        let action = action(&translated.routes[0]);

        assert_eq!(action.upgrade_configs[0].upgrade_type, "websocket");
        let retry = action.retry_policy.as_ref().unwrap();
        assert_eq!(retry.retry_on, "gateway-error");
        assert_eq!(retry.num_retries, Some(UInt32Value { value: 3 }));
        assert_eq!(retry.per_try_timeout, Some(ProtoDuration { seconds: 0, nanos: 150_000_000 }));
        assert_eq!(action.timeout, Some(ProtoDuration { seconds: 0, nanos: 0 }));
        assert_eq!(action.idle_timeout, None);
    }

    #[test]
    fn route_filters_shape_the_action() {
        let mut filtered = route("/", vec![cluster("a", 0)]);
        filtered.filters = vec![
            Filter::new("retries", FilterType::Retry, "retry_on: reset\nnum_retries: 0"),
            Filter::new("rewrite", FilterType::HostRewrite, "host: upstream.internal"),
            Filter::new("gzip", FilterType::Compression, ""),
        ];
        let host = host_with(vec![filtered]);
        let translated = virtual_host(&host, ListenerRole::Secure);
        let entry = &translated.routes[0];
        let action = action(entry);

        let retry = action.retry_policy.as_ref().unwrap();
        assert_eq!(retry.retry_on, "reset");
        assert_eq!(retry.num_retries, Some(UInt32Value { value: 1 }));
        assert_eq!(
            action.host_rewrite_specifier,
            Some(HostRewriteSpecifier::HostRewriteLiteral("upstream.internal".to_string()))
        );
        assert_eq!(entry.typed_per_filter_config["gzip"].type_url, FILTER_CONFIG_TYPE_URL);
        assert!(!entry.typed_per_filter_config.contains_key("retries"));

        let entries = route_chain_entries(&host);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "gzip");
        assert!(entries[0].disabled);
    }

    #[test]
    fn external_authorization_opt_out() {
        let mut open = route("/public", vec![cluster("a", 0)]);
        open.disable_external_authorization = true;
        let host = host_with(vec![open]);
        let translated = virtual_host(&host, ListenerRole::Secure);

        let any = &translated.routes[0].typed_per_filter_config[EXT_AUTHZ_FILTER_NAME];
        assert_eq!(any.type_url, EXT_AUTHZ_PER_ROUTE_TYPE_URL);
    }

    #[test]
    fn configuration_sorts_virtual_hosts() {
        let config = route_configuration(
            HTTP_ROUTE_CONFIG_NAME,
            vec![
                VirtualHost { name: "b".to_string(), ..Default::default() },
                VirtualHost { name: "a".to_string(), ..Default::default() },
            ],
        );
        let names: Vec<_> = config.virtual_hosts.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
