//! Response compression filter (gzip)

use crate::xds::filters::{any_from_message, invalid_config};
use envoy_types::pb::envoy::config::core::v3::{RuntimeFeatureFlag, TypedExtensionConfig};
use envoy_types::pb::envoy::extensions::compression::gzip::compressor::v3::Gzip;
use envoy_types::pb::envoy::extensions::filters::http::compressor::v3::{
    compressor::{CommonDirectionConfig, ResponseDirectionConfig},
    Compressor,
};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, BoolValue, UInt32Value};
use serde::{Deserialize, Serialize};

pub const COMPRESSOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.compressor.v3.Compressor";
const GZIP_COMPRESSOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.compression.gzip.compressor.v3.Gzip";

/// Compressed when a filter object lists no content types
pub const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "text/css",
    "text/plain",
    "application/javascript",
    "application/json",
    "image/svg+xml",
];

/// Settings of a `compression` filter object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressorConfig {
    /// Responses smaller than this many bytes are sent as is
    pub min_content_length: Option<u32>,
    pub content_type: Vec<String>,
    /// zlib level, 1 (fastest) to 9 (smallest); zlib's default when unset
    pub level: Option<u32>,
    pub disable_on_etag_header: bool,
}

impl CompressorConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.content_type.iter().any(|content_type| content_type.trim().is_empty()) {
            return Err(invalid_config("compression: content_type entries cannot be empty"));
        }
        if let Some(level) = self.level {
            if !(1..=9).contains(&level) {
                return Err(invalid_config(format!(
                    "compression: level must be between 1 and 9, got {}",
                    level
                )));
            }
        }
        Ok(())
    }

    fn content_types(&self) -> Vec<String> {
        if self.content_type.is_empty() {
            DEFAULT_CONTENT_TYPES.iter().map(|content_type| content_type.to_string()).collect()
        } else {
            self.content_type.iter().map(|content_type| content_type.trim().to_string()).collect()
        }
    }

    pub fn to_any(&self) -> Result<EnvoyAny, crate::Error> {
        self.validate()?;

        // Gzip's CompressionLevel values coincide with zlib levels, 0 is zlib's default
        let gzip = Gzip {
            compression_level: self.level.map(|level| level as i32).unwrap_or(0),
            ..Default::default()
        };
        let proto = Compressor {
            response_direction_config: Some(ResponseDirectionConfig {
                common_config: Some(CommonDirectionConfig {
                    enabled: Some(RuntimeFeatureFlag {
                        default_value: Some(BoolValue { value: true }),
                        runtime_key: String::new(),
                    }),
                    min_content_length: self.min_content_length.map(|value| UInt32Value { value }),
                    content_type: self.content_types(),
                    ..Default::default()
                }),
                disable_on_etag_header: self.disable_on_etag_header,
                ..Default::default()
            }),
            compressor_library: Some(TypedExtensionConfig {
                name: "gzip".to_string(),
                typed_config: Some(any_from_message(GZIP_COMPRESSOR_TYPE_URL, &gzip)),
            }),
            ..Default::default()
        };

        Ok(any_from_message(COMPRESSOR_TYPE_URL, &proto))
    }
}
