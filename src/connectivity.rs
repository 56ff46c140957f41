//! Network-state observation
//!
//! The engine never asks the platform whether it is online; it is told,
//! through a [`ConnectivityObserver`] injected at startup.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::SyncEngine;

/// Push-based source of online/offline transitions
pub trait ConnectivityObserver: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that is notified on every reported change
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity driven by hand: the CLI's health probe, tests, demos
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    pub fn set(&self, online: bool) {
        self.tx.send_replace(online);
    }
}

impl ConnectivityObserver for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Live link between an observer and an engine. Dropping it unsubscribes.
pub struct ConnectivitySubscription {
    handle: JoinHandle<()>,
}

impl ConnectivitySubscription {
    pub fn unsubscribe(self) {
        self.handle.abort();
    }
}

impl Drop for ConnectivitySubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl SyncEngine {
    /// Follow an observer's transitions.
    ///
    /// The online flag is flipped as each event arrives; the reconnect
    /// sequence runs on its own task, so rapid flapping lands on the
    /// in-progress guard instead of piling up behind it.
    pub fn watch_connectivity(
        self: &Arc<Self>,
        observer: &dyn ConnectivityObserver,
    ) -> ConnectivitySubscription {
        let mut rx = observer.subscribe();
        let engine = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut online = *rx.borrow_and_update();
            loop {
                if engine.transition(online) {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        // outcome is reported through the event channel
                        let _ = engine.reconnect().await;
                    });
                }
                if rx.changed().await.is_err() {
                    tracing::debug!("Connectivity source closed");
                    break;
                }
                online = *rx.borrow_and_update();
            }
        });

        ConnectivitySubscription { handle }
    }
}
