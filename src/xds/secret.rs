//! Secret translation for SDS
//!
//! TLS keypairs referenced by secure virtual hosts and client certificates
//! are delivered inline: certificate chain and private key bytes are
//! embedded in the Envoy `Secret`.

use crate::dag;
use crate::xds::naming::{hash_prefix, hashname};
use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, Secret, TlsCertificate,
};

/// Wire name of a secret, `namespace/name/hash`, where the hash follows the
/// certificate bytes so a rotated certificate gets a new name.
pub fn secret_name(secret: &dag::Secret) -> String {
    let hash = hash_prefix(secret.certificate_chain(), 5);
    hashname(60, &[&secret.identity.namespace, &secret.identity.name, &hash])
}

/// Translate a keypair secret
pub fn secret(secret: &dag::Secret) -> Secret {
    Secret {
        name: secret_name(secret),
        r#type: Some(secret::Type::TlsCertificate(TlsCertificate {
            certificate_chain: Some(inline_bytes(secret.certificate_chain())),
            private_key: Some(inline_bytes(secret.private_key())),
            ..Default::default()
        })),
    }
}

fn inline_bytes(bytes: &[u8]) -> DataSource {
    DataSource { specifier: Some(Specifier::InlineBytes(bytes.to_vec())), ..Default::default() }
}
