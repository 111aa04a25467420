//! Shared fixtures for the integration tests.
//!
//! Builders for the Kubernetes objects the cache accepts, plus helpers to
//! run a build and pull hosts and statuses out of the resulting graph.

#![allow(dead_code)]

use k8s_openapi::api::core::v1::{Secret, Service, ServicePort, ServiceSpec as KubeServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use switchyard::cache::{ResourceCache, TLS_CERT_KEY, TLS_KEY_KEY};
use switchyard::config::CacheConfig;
use switchyard::dag::{
    Graph, GraphBuilder, Host, SecureVirtualHost, Status, VirtualHost, INSECURE_LISTENER_PORT,
    SECURE_LISTENER_PORT,
};
use switchyard::domain::{
    DelegateSpec, FilterRef, FilterSpec, FilterType, GatewayHost, GatewayHostSpec, HttpFilter,
    Identity, ObjectKind, ObjectRef, RouteFilter, RouteSpec, ServiceRoute, ServiceRouteSpec,
    ServiceSpec, TlsSpec, VirtualHostSpec,
};

pub const NAMESPACE: &str = "default";

pub fn meta(name: &str) -> ObjectMeta {
    meta_in(NAMESPACE, name)
}

pub fn meta_in(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub fn empty_cache() -> ResourceCache {
    ResourceCache::new(CacheConfig::default())
}

pub fn build(cache: &ResourceCache) -> Graph {
    GraphBuilder::default().build(cache)
}

pub fn service(name: &str, port: i32) -> Service {
    service_in(NAMESPACE, name, port)
}

pub fn service_in(namespace: &str, name: &str, port: i32) -> Service {
    Service {
        metadata: meta_in(namespace, name),
        spec: Some(KubeServiceSpec {
            ports: Some(vec![ServicePort { port, ..Default::default() }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn keypair_secret(namespace: &str, name: &str) -> Secret {
    Secret {
        metadata: meta_in(namespace, name),
        data: Some(BTreeMap::from([
            (TLS_CERT_KEY.to_string(), ByteString(format!("{name}-cert").into_bytes())),
            (TLS_KEY_KEY.to_string(), ByteString(format!("{name}-key").into_bytes())),
        ])),
        ..Default::default()
    }
}

pub fn route_to(name: &str, port: i32) -> RouteSpec {
    RouteSpec { services: vec![ServiceSpec::new(name, port)], ..Default::default() }
}

pub fn delegate_to(name: &str) -> RouteSpec {
    RouteSpec { delegate: Some(DelegateSpec::new(name)), ..Default::default() }
}

pub fn root(name: &str, fqdn: &str, routes: Vec<RouteSpec>) -> GatewayHost {
    GatewayHost {
        metadata: meta(name),
        spec: GatewayHostSpec {
            virtual_host: Some(VirtualHostSpec { fqdn: fqdn.to_string(), ..Default::default() }),
            routes,
            ..Default::default()
        },
    }
}

pub fn tls_root(name: &str, fqdn: &str, secret: &str, routes: Vec<RouteSpec>) -> GatewayHost {
    let mut host = root(name, fqdn, routes);
    if let Some(vhost) = host.spec.virtual_host.as_mut() {
        vhost.tls = Some(TlsSpec { secret_name: Some(secret.to_string()), ..Default::default() });
    }
    host
}

pub fn child(name: &str, routes: Vec<RouteSpec>) -> GatewayHost {
    GatewayHost {
        metadata: meta(name),
        spec: GatewayHostSpec { routes, ..Default::default() },
    }
}

pub fn service_route(name: &str, fqdn: &str, routes: Vec<RouteSpec>) -> ServiceRoute {
    ServiceRoute {
        metadata: meta(name),
        spec: ServiceRouteSpec { fqdn: fqdn.to_string(), routes },
    }
}

pub fn http_filter(name: &str, filter_type: FilterType, config: &str) -> HttpFilter {
    HttpFilter { metadata: meta(name), spec: FilterSpec { filter_type, config: config.to_string() } }
}

pub fn route_filter(name: &str, filter_type: FilterType, config: &str) -> RouteFilter {
    RouteFilter { metadata: meta(name), spec: FilterSpec { filter_type, config: config.to_string() } }
}

pub fn filter_ref(name: &str) -> FilterRef {
    FilterRef::new(name)
}

/// Ingress routing `rules` (host, path, service, port) with an optional
/// default backend
pub fn ingress(
    name: &str,
    default_backend: Option<(&str, i32)>,
    rules: &[(&str, &str, &str, i32)],
) -> Ingress {
    let backend = |service: &str, port: i32| IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.to_string(),
            port: Some(ServiceBackendPort { number: Some(port), ..Default::default() }),
        }),
        ..Default::default()
    };

    let rules = rules
        .iter()
        .map(|(host, path, service, port)| IngressRule {
            host: Some(host.to_string()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(path.to_string()),
                    path_type: "Prefix".to_string(),
                    backend: backend(service, *port),
                }],
            }),
        })
        .collect::<Vec<_>>();

    Ingress {
        metadata: meta(name),
        spec: Some(IngressSpec {
            default_backend: default_backend.map(|(service, port)| backend(service, port)),
            rules: (!rules.is_empty()).then_some(rules),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn with_ingress_tls(mut ingress: Ingress, hosts: &[&str], secret: &str) -> Ingress {
    if let Some(spec) = ingress.spec.as_mut() {
        spec.tls = Some(vec![IngressTLS {
            hosts: Some(hosts.iter().map(|host| host.to_string()).collect()),
            secret_name: Some(secret.to_string()),
        }]);
    }
    ingress
}

pub fn annotate<'a>(object: &'a mut ObjectMeta, key: &str, value: &str) -> &'a mut ObjectMeta {
    object
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    object
}

pub fn gateway_host_ref(name: &str) -> ObjectRef {
    ObjectRef::new(ObjectKind::GatewayHost, Identity::new(NAMESPACE, name))
}

pub fn service_route_ref(name: &str) -> ObjectRef {
    ObjectRef::new(ObjectKind::ServiceRoute, Identity::new(NAMESPACE, name))
}

pub fn status_of<'a>(graph: &'a Graph, object: &ObjectRef) -> Option<&'a Status> {
    graph.statuses.get(object)
}

pub fn insecure_host<'a>(graph: &'a Graph, name: &str) -> Option<&'a VirtualHost> {
    match graph.listener(INSECURE_LISTENER_PORT)?.hosts.get(name)? {
        Host::Virtual(host) => Some(host),
        Host::Secure(_) => None,
    }
}

pub fn secure_host<'a>(graph: &'a Graph, name: &str) -> Option<&'a SecureVirtualHost> {
    match graph.listener(SECURE_LISTENER_PORT)?.hosts.get(name)? {
        Host::Secure(host) => Some(host),
        Host::Virtual(_) => None,
    }
}
