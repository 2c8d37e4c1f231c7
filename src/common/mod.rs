//! Common utilities and types shared across blobsync

pub mod config;
pub mod error;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, CoordinationBackend, CoordinationConfig, NodeConfig, SyncConfig};
pub use error::{Error, Result};
pub use utils::{blob_bucket, format_bytes, system_time_millis, timestamp_now_millis};
