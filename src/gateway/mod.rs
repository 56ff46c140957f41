//! Remote gateway: the contract the sync engine expects from a remote
//! document store

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod http;
mod memory;

pub use http::HttpGateway;
pub use memory::MemoryGateway;

/// Document store holding task records for many users.
///
/// Records are JSON objects keyed by id inside a named collection.
/// `list_all` may return other users' records; callers filter on the
/// `userId` field.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Every document in the collection, each carrying its `id`
    async fn list_all(&self, collection: &str) -> Result<Vec<Value>, GatewayError>;

    /// Insert or replace the document with this id
    async fn put(&self, collection: &str, id: &str, document: Value) -> Result<(), GatewayError>;

    /// Remove the document with this id; absent ids are not an error
    async fn delete(&self, collection: &str, id: &str) -> Result<(), GatewayError>;

    /// Authenticated user this gateway acts for
    fn user_id(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("could not encode document: {0}")]
    Encode(#[from] serde_json::Error),
}
