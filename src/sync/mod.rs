//! Reconciliation of local blob stores against the cluster

pub mod download;
pub mod synchronizer;

pub use download::{download_missing_blob, download_updated_blob};
pub use synchronizer::{
    keys_to_delete, keys_to_download, start_sync_task, SyncHandle, SyncReport, Synchronizer,
};
