//! Error taxonomy for the sync subsystem

use thiserror::Error;

use crate::gateway::GatewayError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad task fields; raised before anything is written
    #[error("invalid task: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Update referencing an id that is not in the local store
    #[error("task not found: {0}")]
    NotFound(String),

    /// The local storage medium rejected the write
    #[error("local storage is full")]
    StorageFull,

    #[error("remote write failed: {0}")]
    RemoteWrite(#[source] GatewayError),

    #[error("remote read failed: {0}")]
    RemoteRead(#[source] GatewayError),

    /// Any other local storage failure
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
