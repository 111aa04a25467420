//! # Observability Infrastructure
//!
//! Structured logging for the switchyard compiler. The builder and the
//! translator never log through a global handle of their own: callers create
//! a span with [`dag_span!`](crate::dag_span) or [`xds_span!`](crate::xds_span)
//! and hand it in, so every event of one build or translation is parented on
//! that span.

pub mod logging;

pub use logging::{init_logging, log_config_info};
