//! Object identities
//!
//! Every cached resource is addressed by its namespace and name. The
//! derived `Ord` orders by namespace first, which keeps the status ledger
//! and every map keyed by identity stable across builds.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace used when an object's metadata leaves it unset
pub const DEFAULT_NAMESPACE: &str = "default";

/// (namespace, name) pair identifying a cached object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub namespace: String,
    pub name: String,
}

impl Identity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Identity of the object described by `meta`
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    /// Resolve a possibly cross-namespace reference of the form `name` or
    /// `namespace/name`, relative to `namespace`.
    pub fn parse_reference(reference: &str, namespace: &str) -> Self {
        match reference.split_once('/') {
            Some((ns, name)) if !ns.is_empty() => Self::new(ns, name),
            _ => Self::new(namespace, reference.trim_start_matches('/')),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The kinds of object that carry a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ObjectKind {
    GatewayHost,
    ServiceRoute,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::GatewayHost => write!(f, "GatewayHost"),
            ObjectKind::ServiceRoute => write!(f, "ServiceRoute"),
        }
    }
}

/// Reference to a routing object owning a status entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub identity: Identity,
    pub kind: ObjectKind,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, identity: Identity) -> Self {
        Self { identity, kind }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.identity)
    }
}
