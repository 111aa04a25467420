//! Translated resources and their xDS type URLs

use crate::xds::filters::any_from_message;
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;
use envoy_types::pb::google::protobuf::Any;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";
pub const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
pub const UPSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";
pub const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    pub fn into_any(self) -> Any {
        self.resource
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}

/// Every resource produced by one translation, each list sorted by name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSnapshot {
    pub clusters: Vec<Cluster>,
    pub route_configurations: Vec<RouteConfiguration>,
    pub listeners: Vec<Listener>,
    pub secrets: Vec<Secret>,
}

impl ResourceSnapshot {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
            && self.route_configurations.is_empty()
            && self.listeners.is_empty()
            && self.secrets.is_empty()
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|cluster| cluster.name == name)
    }

    pub fn route_configuration(&self, name: &str) -> Option<&RouteConfiguration> {
        self.route_configurations.iter().find(|config| config.name == name)
    }

    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|listener| listener.name == name)
    }

    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets.iter().find(|secret| secret.name == name)
    }

    /// Encode every resource for delivery, clusters first, then routes,
    /// listeners and secrets
    pub fn built_resources(&self) -> Vec<BuiltResource> {
        let clusters = self.clusters.iter().map(|cluster| BuiltResource {
            name: cluster.name.clone(),
            resource: any_from_message(CLUSTER_TYPE_URL, cluster),
        });
        let routes = self.route_configurations.iter().map(|config| BuiltResource {
            name: config.name.clone(),
            resource: any_from_message(ROUTE_TYPE_URL, config),
        });
        let listeners = self.listeners.iter().map(|listener| BuiltResource {
            name: listener.name.clone(),
            resource: any_from_message(LISTENER_TYPE_URL, listener),
        });
        let secrets = self.secrets.iter().map(|secret| BuiltResource {
            name: secret.name.clone(),
            resource: any_from_message(SECRET_TYPE_URL, secret),
        });

        clusters.chain(routes).chain(listeners).chain(secrets).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn built_resources_carry_type_urls() {
        let snapshot = ResourceSnapshot {
            clusters: vec![Cluster { name: "default/kuard/80/abc".to_string(), ..Default::default() }],
            listeners: vec![Listener { name: "ingress_http".to_string(), ..Default::default() }],
            ..Default::default()
        };

        let built = snapshot.built_resources();
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].type_url(), CLUSTER_TYPE_URL);
        assert_eq!(built[1].type_url(), LISTENER_TYPE_URL);

        let decoded = Cluster::decode(built[0].clone().into_any().value.as_slice()).unwrap();
        assert_eq!(decoded.name, "default/kuard/80/abc");
    }

    #[test]
    fn empty_snapshot() {
        assert!(ResourceSnapshot::default().is_empty());
        assert!(ResourceSnapshot::default().built_resources().is_empty());
    }
}
