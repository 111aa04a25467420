//! Lua HTTP filter configuration helpers

use crate::xds::filters::{any_from_message, invalid_config};
use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::filters::http::lua::v3::{
    lua_per_route::Override, Lua as LuaProto, LuaPerRoute as LuaPerRouteProto,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use serde::{Deserialize, Serialize};

pub const LUA_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.lua.v3.Lua";
pub const LUA_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.lua.v3.LuaPerRoute";

/// Inline Lua script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LuaConfig {
    /// Script source defining `envoy_on_request` and/or `envoy_on_response`
    #[serde(default)]
    pub inline_code: String,
    /// Optional statistics prefix
    #[serde(default)]
    pub stat_prefix: Option<String>,
}

impl LuaConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.inline_code.trim().is_empty() {
            return Err(invalid_config("Lua inline_code cannot be empty"));
        }
        Ok(())
    }

    fn source(&self) -> DataSource {
        DataSource {
            specifier: Some(Specifier::InlineString(self.inline_code.clone())),
            ..Default::default()
        }
    }

    /// Convert to the filter-chain Any payload
    pub fn to_any(&self) -> Result<EnvoyAny, crate::Error> {
        self.validate()?;

        let proto = LuaProto {
            default_source_code: Some(self.source()),
            stat_prefix: self.stat_prefix.clone().unwrap_or_default(),
            ..Default::default()
        };

        Ok(any_from_message(LUA_TYPE_URL, &proto))
    }

    /// Convert to a per-route override running this script instead of the default one
    pub fn to_per_route_any(&self) -> Result<EnvoyAny, crate::Error> {
        self.validate()?;

        let proto = LuaPerRouteProto {
            r#override: Some(Override::SourceCode(self.source())),
            ..Default::default()
        };
        Ok(any_from_message(LUA_PER_ROUTE_TYPE_URL, &proto))
    }
}
