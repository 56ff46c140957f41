//! clario-sync - offline-first task synchronization for Clario
//!
//! Tasks are written to a local store first. A sync engine propagates
//! each mutation to a remote document store, queues it while offline or
//! when the remote write fails, and on reconnect drains the queue and
//! replaces the local list with the remote one.

pub mod api;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod models;
pub mod query;
pub mod queue;
pub mod store;
pub mod validation;

pub use connectivity::{ConnectivityObserver, ConnectivitySubscription, ManualConnectivity};
pub use engine::{SyncEngine, SyncEvent, SyncOutcome};
pub use error::{SyncError, SyncResult};
pub use gateway::{GatewayError, HttpGateway, MemoryGateway, RemoteGateway};
pub use models::{Priority, Status, Task, TaskDraft, TaskPatch};
