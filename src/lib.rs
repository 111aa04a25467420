//! # Switchyard
//!
//! Switchyard is the compiler at the heart of an API gateway control plane.
//! It takes the routing objects cached from Kubernetes (Ingress, GatewayHost,
//! ServiceRoute, Service, Secret, filter and certificate delegation objects)
//! and turns them into Envoy configuration in two steps:
//!
//! ```text
//! ResourceCache ──GraphBuilder──▶ Graph + Statuses ──Translator──▶ Clusters / Routes / Listeners / Secrets
//! ```
//!
//! ## Core Components
//!
//! - **ResourceCache**: typed, lock-protected store of the watched objects
//! - **GraphBuilder**: resolves delegation, conditions, services and TLS into
//!   an immutable [`dag::Graph`] and a status ledger for every object seen
//! - **Translator**: maps the graph onto Envoy xDS resources with
//!   deterministic names
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use switchyard::cache::ResourceCache;
//! use switchyard::dag::GraphBuilder;
//! use switchyard::xds::Translator;
//! use switchyard::Config;
//!
//! let config = Config::from_env()?;
//! let cache = ResourceCache::new(config.cache.clone());
//! let graph = GraphBuilder::default().build(&cache);
//! let resources = Translator::default().translate(&graph);
//! for resource in resources.built_resources() {
//!     println!("{} {}", resource.type_url(), resource.name);
//! }
//! # Ok::<(), switchyard::Error>(())
//! ```

pub mod cache;
pub mod config;
pub mod dag;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod xds;

pub use config::Config;
pub use errors::{Error, Result};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "switchyard");
    }
}
