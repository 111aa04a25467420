//! TLS settings shared by ingress and GatewayHost processing

use super::identity::Identity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest TLS protocol version a secure virtual host accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum MinTlsVersion {
    #[default]
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

impl MinTlsVersion {
    /// Parse a version string, falling back to the lowest supported version
    pub fn parse_or_default(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("1.2") => Self::V1_2,
            Some("1.3") => Self::V1_3,
            _ => Self::V1_1,
        }
    }

    /// Envoy `TlsParameters.TlsProtocol` enum name
    pub fn envoy_name(self) -> &'static str {
        match self {
            Self::V1_1 => "TLSv1_1",
            Self::V1_2 => "TLSv1_2",
            Self::V1_3 => "TLSv1_3",
        }
    }
}

impl fmt::Display for MinTlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1_1 => write!(f, "1.1"),
            Self::V1_2 => write!(f, "1.2"),
            Self::V1_3 => write!(f, "1.3"),
        }
    }
}

/// Grants other namespaces permission to reference secrets in this one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsCertificateDelegation {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TlsCertificateDelegationSpec,
}

impl TlsCertificateDelegation {
    pub fn identity(&self) -> Identity {
        Identity::from_meta(&self.metadata)
    }

    /// Whether this delegation lets `namespace` use the secret `secret_name`
    /// living in the delegation's own namespace.
    pub fn permits(&self, secret_name: &str, namespace: &str) -> bool {
        self.spec.delegations.iter().any(|delegation| {
            delegation.secret_name == secret_name
                && delegation.target_namespaces.iter().any(|ns| ns == "*" || ns == namespace)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsCertificateDelegationSpec {
    pub delegations: Vec<CertificateDelegation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CertificateDelegation {
    pub secret_name: String,
    pub target_namespaces: Vec<String>,
}
