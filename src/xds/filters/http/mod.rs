//! HTTP filter chain assembly
//!
//! Connection managers carry filters in a fixed order regardless of how
//! they were declared: scripting, compression, gRPC-Web, CORS, rate
//! limiting, then the terminal router. Individual filters live in dedicated
//! submodules.

pub mod compressor;
pub mod cors;
pub mod grpc_web;
pub mod lua;
pub mod rate_limit;

use crate::dag::Filter;
use crate::domain::FilterScope;
use crate::xds::filters::any_from_message;
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router as RouterFilter;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType as HttpFilterConfigType;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use std::collections::BTreeMap;
use tracing::warn;

/// Envoy's canonical router filter name
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";

/// A filter ready to be placed in a connection manager
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEntry {
    pub name: String,
    /// Position class in the fixed order
    pub rank: u8,
    pub config: EnvoyAny,
    pub disabled: bool,
}

impl ChainEntry {
    /// Chain entry for `filter` attached at `scope`. `None` when the filter
    /// type has no connection manager filter, when its settings cannot stand
    /// as one, or when the configuration does not decode.
    pub fn from_filter(filter: &Filter, scope: FilterScope, disabled: bool) -> Option<Self> {
        let rank = filter.filter_type.chain_rank()?;
        match filter.settings(scope).and_then(|settings| settings.chain_config()) {
            Ok(Some(config)) => Some(Self { name: filter.name.clone(), rank, config, disabled }),
            Ok(None) => None,
            Err(error) => {
                warn!(filter = %filter.name, %error, "Skipping filter with invalid configuration");
                None
            }
        }
    }
}

/// Merge filter layers by name. A filter in a later layer replaces a
/// same-named filter from an earlier one.
pub fn merge_by_name<'a, I>(layers: I) -> BTreeMap<String, Filter>
where
    I: IntoIterator<Item = &'a [Filter]>,
{
    let mut merged = BTreeMap::new();
    for layer in layers {
        for filter in layer {
            merged.insert(filter.name.clone(), filter.clone());
        }
    }
    merged
}

/// Build the ordered Envoy HTTP filter list with the router filter last.
///
/// Each name appears once. An enabled entry replaces a disabled one of the
/// same name, otherwise the first entry seen is kept.
pub fn build_http_filters(entries: Vec<ChainEntry>) -> Vec<HttpFilter> {
    let mut by_name: BTreeMap<String, ChainEntry> = BTreeMap::new();
    for entry in entries {
        match by_name.get(&entry.name) {
            Some(existing) if !existing.disabled || entry.disabled => {}
            _ => {
                by_name.insert(entry.name.clone(), entry);
            }
        }
    }

    let mut ordered: Vec<ChainEntry> = by_name.into_values().collect();
    ordered.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)));

    let mut filters: Vec<HttpFilter> = ordered
        .into_iter()
        .map(|entry| HttpFilter {
            name: entry.name,
            is_optional: false,
            disabled: entry.disabled,
            config_type: Some(HttpFilterConfigType::TypedConfig(entry.config)),
        })
        .collect();

    filters.push(default_router_filter());
    filters
}

fn default_router_filter() -> HttpFilter {
    HttpFilter {
        name: ROUTER_FILTER_NAME.to_string(),
        is_optional: false,
        disabled: false,
        config_type: Some(HttpFilterConfigType::TypedConfig(any_from_message(
            ROUTER_TYPE_URL,
            &RouterFilter::default(),
        ))),
    }
}
