//! Shared machinery for the relayer tasks: the persistent store, settings
//! loading, tracing setup and process metrics.

#![forbid(unsafe_code)]
#![warn(unused_extern_crates)]

pub mod db;
mod macros;
pub mod metrics;
pub mod settings;

pub use metrics::CoreMetrics;
pub use settings::Settings;
