//! gRPC-Web HTTP filter configuration helpers

use crate::xds::filters::any_from_message;
use envoy_types::pb::envoy::extensions::filters::http::grpc_web::v3::GrpcWeb as GrpcWebProto;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use serde::{Deserialize, Serialize};

pub const GRPC_WEB_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.grpc_web.v3.GrpcWeb";

/// The gRPC-Web bridge takes no settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrpcWebConfig {}

impl GrpcWebConfig {
    pub fn to_any(&self) -> EnvoyAny {
        any_from_message(GRPC_WEB_TYPE_URL, &GrpcWebProto::default())
    }
}
