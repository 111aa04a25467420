//! # Resource Cache
//!
//! Holds the latest version of every resource the graph builder reads,
//! keyed by [`Identity`]. Writers take the lock per mutation; a build holds
//! one [`CacheSnapshot`] for its whole duration so it sees a single
//! point-in-time view.

use crate::config::CacheConfig;
use crate::domain::{
    annotations, GatewayHost, HttpFilter, Identity, RouteFilter, ServiceRoute,
    TlsCertificateDelegation,
};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

/// Secret data key of a TLS certificate chain
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Secret data key of a TLS private key
pub const TLS_KEY_KEY: &str = "tls.key";
/// Secret data key of a CA bundle
pub const CA_CERT_KEY: &str = "ca.crt";

/// Every object kind the cache accepts
#[derive(Debug, Clone, PartialEq)]
pub enum KubernetesObject {
    Ingress(Ingress),
    GatewayHost(GatewayHost),
    ServiceRoute(ServiceRoute),
    Service(Service),
    Secret(Secret),
    HttpFilter(HttpFilter),
    RouteFilter(RouteFilter),
    TlsCertificateDelegation(TlsCertificateDelegation),
}

impl KubernetesObject {
    fn kind(&self) -> &'static str {
        match self {
            Self::Ingress(_) => "Ingress",
            Self::GatewayHost(_) => "GatewayHost",
            Self::ServiceRoute(_) => "ServiceRoute",
            Self::Service(_) => "Service",
            Self::Secret(_) => "Secret",
            Self::HttpFilter(_) => "HttpFilter",
            Self::RouteFilter(_) => "RouteFilter",
            Self::TlsCertificateDelegation(_) => "TlsCertificateDelegation",
        }
    }

    fn identity(&self) -> Identity {
        match self {
            Self::Ingress(ingress) => Identity::from_meta(&ingress.metadata),
            Self::GatewayHost(host) => host.identity(),
            Self::ServiceRoute(route) => route.identity(),
            Self::Service(service) => Identity::from_meta(&service.metadata),
            Self::Secret(secret) => Identity::from_meta(&secret.metadata),
            Self::HttpFilter(filter) => filter.identity(),
            Self::RouteFilter(filter) => filter.identity(),
            Self::TlsCertificateDelegation(delegation) => delegation.identity(),
        }
    }
}

macro_rules! impl_from_object {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for KubernetesObject {
                fn from(object: $ty) -> Self {
                    Self::$variant(object)
                }
            }
        )*
    };
}

impl_from_object!(
    Ingress => Ingress,
    GatewayHost => GatewayHost,
    ServiceRoute => ServiceRoute,
    Service => Service,
    Secret => Secret,
    HttpFilter => HttpFilter,
    RouteFilter => RouteFilter,
    TlsCertificateDelegation => TlsCertificateDelegation,
);

#[derive(Debug, Default)]
struct CacheState {
    ingresses: BTreeMap<Identity, Ingress>,
    gateway_hosts: BTreeMap<Identity, GatewayHost>,
    service_routes: BTreeMap<Identity, ServiceRoute>,
    services: BTreeMap<Identity, Service>,
    secrets: BTreeMap<Identity, Secret>,
    http_filters: BTreeMap<Identity, HttpFilter>,
    route_filters: BTreeMap<Identity, RouteFilter>,
    delegations: BTreeMap<Identity, TlsCertificateDelegation>,
}

/// Reader/writer-locked store of cluster resources
#[derive(Debug, Default)]
pub struct ResourceCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config, state: RwLock::new(CacheState::default()) }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or replace an object. Returns false when the object is not
    /// relevant to this instance (foreign ingress class, non-TLS secret).
    pub fn insert(&self, object: impl Into<KubernetesObject>) -> bool {
        let object = object.into();
        if !self.accepts(&object) {
            debug!(kind = object.kind(), object = %object.identity(), "ignoring object");
            return false;
        }

        let identity = object.identity();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match object {
            KubernetesObject::Ingress(o) => {
                state.ingresses.insert(identity, o);
            }
            KubernetesObject::GatewayHost(o) => {
                state.gateway_hosts.insert(identity, o);
            }
            KubernetesObject::ServiceRoute(o) => {
                state.service_routes.insert(identity, o);
            }
            KubernetesObject::Service(o) => {
                state.services.insert(identity, o);
            }
            KubernetesObject::Secret(o) => {
                state.secrets.insert(identity, o);
            }
            KubernetesObject::HttpFilter(o) => {
                state.http_filters.insert(identity, o);
            }
            KubernetesObject::RouteFilter(o) => {
                state.route_filters.insert(identity, o);
            }
            KubernetesObject::TlsCertificateDelegation(o) => {
                state.delegations.insert(identity, o);
            }
        }
        true
    }

    /// Remove the object with the same kind and identity. Returns whether
    /// anything was removed.
    pub fn remove(&self, object: impl Into<KubernetesObject>) -> bool {
        let object = object.into();
        let identity = object.identity();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match object {
            KubernetesObject::Ingress(_) => state.ingresses.remove(&identity).is_some(),
            KubernetesObject::GatewayHost(_) => state.gateway_hosts.remove(&identity).is_some(),
            KubernetesObject::ServiceRoute(_) => state.service_routes.remove(&identity).is_some(),
            KubernetesObject::Service(_) => state.services.remove(&identity).is_some(),
            KubernetesObject::Secret(_) => state.secrets.remove(&identity).is_some(),
            KubernetesObject::HttpFilter(_) => state.http_filters.remove(&identity).is_some(),
            KubernetesObject::RouteFilter(_) => state.route_filters.remove(&identity).is_some(),
            KubernetesObject::TlsCertificateDelegation(_) => {
                state.delegations.remove(&identity).is_some()
            }
        }
    }

    /// Acquire the read lock for the lifetime of the returned handle
    pub fn snapshot(&self) -> CacheSnapshot<'_> {
        CacheSnapshot {
            state: self.state.read().unwrap_or_else(PoisonError::into_inner),
            config: &self.config,
        }
    }

    fn accepts(&self, object: &KubernetesObject) -> bool {
        match object {
            KubernetesObject::Ingress(ingress) => {
                let class = annotations::ingress_class(&ingress.metadata).or_else(|| {
                    ingress.spec.as_ref().and_then(|spec| spec.ingress_class_name.as_deref())
                });
                self.config.matches_ingress_class(class)
            }
            KubernetesObject::GatewayHost(host) => {
                self.config.matches_ingress_class(annotations::ingress_class(&host.metadata))
            }
            KubernetesObject::ServiceRoute(route) => {
                self.config.matches_ingress_class(annotations::ingress_class(&route.metadata))
            }
            KubernetesObject::Secret(secret) => {
                let data = secret.data.as_ref();
                let has = |key: &str| data.map(|d| d.contains_key(key)).unwrap_or(false);
                (has(TLS_CERT_KEY) && has(TLS_KEY_KEY)) || has(CA_CERT_KEY)
            }
            _ => true,
        }
    }
}

/// Scoped read view of the cache. The read lock is released on drop.
pub struct CacheSnapshot<'a> {
    state: RwLockReadGuard<'a, CacheState>,
    config: &'a CacheConfig,
}

impl CacheSnapshot<'_> {
    /// Whether root GatewayHosts may live in `namespace`
    pub fn is_root_namespace(&self, namespace: &str) -> bool {
        self.config.root_namespaces.is_empty()
            || self.config.root_namespaces.iter().any(|ns| ns == namespace)
    }

    pub fn ingresses(&self) -> impl Iterator<Item = (&Identity, &Ingress)> {
        self.state.ingresses.iter()
    }

    pub fn gateway_hosts(&self) -> impl Iterator<Item = (&Identity, &GatewayHost)> {
        self.state.gateway_hosts.iter()
    }

    pub fn gateway_host(&self, identity: &Identity) -> Option<&GatewayHost> {
        self.state.gateway_hosts.get(identity)
    }

    pub fn service_routes(&self) -> impl Iterator<Item = (&Identity, &ServiceRoute)> {
        self.state.service_routes.iter()
    }

    pub fn service_route(&self, identity: &Identity) -> Option<&ServiceRoute> {
        self.state.service_routes.get(identity)
    }

    pub fn service(&self, identity: &Identity) -> Option<&Service> {
        self.state.services.get(identity)
    }

    pub fn secret(&self, identity: &Identity) -> Option<&Secret> {
        self.state.secrets.get(identity)
    }

    pub fn http_filter(&self, identity: &Identity) -> Option<&HttpFilter> {
        self.state.http_filters.get(identity)
    }

    pub fn route_filter(&self, identity: &Identity) -> Option<&RouteFilter> {
        self.state.route_filters.get(identity)
    }

    /// Whether the secret `secret` may be referenced from `namespace`.
    /// Same-namespace references are always allowed.
    pub fn delegation_permitted(&self, secret: &Identity, namespace: &str) -> bool {
        if secret.namespace == namespace {
            return true;
        }

        self.state
            .delegations
            .iter()
            .filter(|(identity, _)| identity.namespace == secret.namespace)
            .any(|(_, delegation)| delegation.permits(&secret.name, namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CertificateDelegation, TlsCertificateDelegationSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    fn tls_secret(namespace: &str, name: &str) -> Secret {
        Secret {
            metadata: meta(namespace, name),
            data: Some(BTreeMap::from([
                (TLS_CERT_KEY.to_string(), ByteString(b"cert".to_vec())),
                (TLS_KEY_KEY.to_string(), ByteString(b"key".to_vec())),
            ])),
            ..Default::default()
        }
    }

    #[test]
    fn insert_and_remove_services() {
        let cache = ResourceCache::default();
        let service = Service { metadata: meta("apps", "kuard"), ..Default::default() };

        assert!(cache.insert(service.clone()));
        assert!(cache.snapshot().service(&Identity::new("apps", "kuard")).is_some());

        assert!(cache.remove(service.clone()));
        assert!(!cache.remove(service));
        assert!(cache.snapshot().service(&Identity::new("apps", "kuard")).is_none());
    }

    #[test]
    fn foreign_ingress_class_is_ignored() {
        let cache = ResourceCache::default();
        let mut ingress = Ingress { metadata: meta("apps", "web"), ..Default::default() };
        ingress.metadata.annotations = Some(BTreeMap::from([(
            annotations::KUBERNETES_INGRESS_CLASS.to_string(),
            "nginx".to_string(),
        )]));

        assert!(!cache.insert(ingress));
        assert_eq!(cache.snapshot().ingresses().count(), 0);
    }

    #[test]
    fn secrets_without_tls_material_are_ignored() {
        let cache = ResourceCache::default();
        let opaque = Secret { metadata: meta("apps", "opaque"), ..Default::default() };

        assert!(!cache.insert(opaque));
        assert!(cache.insert(tls_secret("apps", "cert")));
    }

    #[test]
    fn cross_namespace_secrets_need_delegation() {
        let cache = ResourceCache::default();
        let secret = Identity::new("shared", "wildcard");
        assert!(!cache.snapshot().delegation_permitted(&secret, "apps"));
        assert!(cache.snapshot().delegation_permitted(&secret, "shared"));

        cache.insert(TlsCertificateDelegation {
            metadata: meta("shared", "delegation"),
            spec: TlsCertificateDelegationSpec {
                delegations: vec![CertificateDelegation {
                    secret_name: "wildcard".to_string(),
                    target_namespaces: vec!["apps".to_string()],
                }],
            },
        });

        let snapshot = cache.snapshot();
        assert!(snapshot.delegation_permitted(&secret, "apps"));
        assert!(!snapshot.delegation_permitted(&secret, "other"));
    }

    #[test]
    fn empty_root_namespace_list_allows_all() {
        let cache = ResourceCache::default();
        assert!(cache.snapshot().is_root_namespace("anything"));

        let cache = ResourceCache::new(CacheConfig {
            root_namespaces: vec!["roots".to_string()],
            ..Default::default()
        });
        assert!(cache.snapshot().is_root_namespace("roots"));
        assert!(!cache.snapshot().is_root_namespace("apps"));
    }
}
