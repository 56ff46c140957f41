//! Sync engine: local-first mutations, remote propagation and reconnect
//! reconciliation
//!
//! Every mutation lands in the local store first and succeeds from the
//! caller's point of view once it is there. The engine then tries the
//! remote write; while offline, or when that write fails, the mutation is
//! queued instead. Going back online drains the queue and pulls the full
//! remote collection, which replaces the local list (remote wins).

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

use crate::db::Database;
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::models::{
    PendingAction, PendingOperation, Status, TASKS_COLLECTION, Task, TaskDraft, TaskPatch,
};
use crate::queue::{PendingQueue, replay};
use crate::store::LocalStore;
use crate::validation::{DefaultValidator, TaskValidator};

const EVENT_CAPACITY: usize = 64;

/// Result of a sync trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No sync was due
    Idle,
    /// Manual sync requested while offline
    Offline,
    /// Another drain/full sync was already running
    Skipped,
    Completed { replayed: usize, pulled: usize },
}

/// Notifications for the UI: connectivity changes and sync results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Online,
    Offline,
    Synced { replayed: usize, pulled: usize },
    SyncFailed { reason: String },
}

/// Clears the in-progress flag when the sync that set it ends
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One engine per session. Holds the only copies of the online and
/// sync-in-progress flags.
pub struct SyncEngine {
    store: LocalStore,
    queue: PendingQueue,
    gateway: Arc<dyn RemoteGateway>,
    validator: Box<dyn TaskValidator>,
    online: AtomicBool,
    sync_in_progress: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(db: Arc<Database>, gateway: Arc<dyn RemoteGateway>, online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: LocalStore::new(Arc::clone(&db)),
            queue: PendingQueue::new(db),
            gateway,
            validator: Box::new(DefaultValidator),
            online: AtomicBool::new(online),
            sync_in_progress: AtomicBool::new(false),
            events,
        }
    }

    pub fn with_validator(mut self, validator: impl TaskValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_in_progress.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Current local task list
    pub fn tasks(&self) -> Vec<Task> {
        self.store.get_all()
    }

    /// Mutations still waiting for the remote store
    pub fn pending(&self) -> Vec<PendingOperation> {
        self.queue.list()
    }

    pub async fn create(&self, draft: TaskDraft, user_id: &str) -> SyncResult<Task> {
        self.validator
            .validate_draft(&draft)
            .map_err(SyncError::Validation)?;

        let task = self
            .store
            .add(Task::from_draft(draft, user_id, Utc::now()))?;
        tracing::info!(task_id = %task.id, "Task created");

        self.propagate(PendingAction::Add { task: task.clone() }, user_id)
            .await?;
        Ok(self.store.get(&task.id).unwrap_or(task))
    }

    pub async fn update(&self, task_id: &str, patch: TaskPatch, user_id: &str) -> SyncResult<Task> {
        self.validator
            .validate_patch(&patch)
            .map_err(SyncError::Validation)?;

        let mut task = self
            .store
            .get(task_id)
            .ok_or_else(|| SyncError::NotFound(task_id.to_string()))?;
        task.apply(patch, Utc::now());
        self.store.replace(&task)?;
        tracing::info!(task_id, status = %task.status, "Task updated");

        self.propagate(PendingAction::Update { task: task.clone() }, user_id)
            .await?;
        Ok(self.store.get(&task.id).unwrap_or(task))
    }

    /// Flip completion: done tasks reopen, anything else becomes done
    pub async fn toggle(&self, task_id: &str, user_id: &str) -> SyncResult<Task> {
        let current = self
            .store
            .get(task_id)
            .ok_or_else(|| SyncError::NotFound(task_id.to_string()))?;
        let next = if current.is_completed() {
            Status::Todo
        } else {
            Status::Done
        };
        self.update(task_id, TaskPatch::status(next), user_id).await
    }

    /// Remove a task. Unknown ids are not an error; the remote delete is
    /// still issued.
    pub async fn delete(&self, task_id: &str, user_id: &str) -> SyncResult<()> {
        let removed = self.store.remove(task_id)?;
        tracing::info!(task_id, removed, "Task deleted");

        self.propagate(
            PendingAction::Delete {
                task_id: task_id.to_string(),
            },
            user_id,
        )
        .await
    }

    /// Push a local mutation to the remote store, or queue it.
    ///
    /// Remote failures never fail the mutation; they only queue it. While
    /// older entries are still queued the new one goes behind them so the
    /// remote store sees mutations in order.
    async fn propagate(&self, action: PendingAction, user_id: &str) -> SyncResult<()> {
        if !self.is_online() {
            return self.queue.enqueue(action, user_id);
        }

        if !self.queue.is_empty() {
            self.queue.enqueue(action, user_id)?;
            self.flush_queue().await;
            return Ok(());
        }

        let op = PendingOperation {
            action,
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        };
        let synced_at = Utc::now();

        match replay(self.gateway.as_ref(), &op, synced_at).await {
            Ok(()) => {
                if let PendingAction::Add { task } | PendingAction::Update { task } = &op.action {
                    self.store.mark_synced(&task.id, synced_at)?;
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    action = %op.action.kind(),
                    task_id = %op.action.task_id(),
                    error = %e,
                    "Remote write failed, queued for retry"
                );
                self.queue.enqueue(op.action, user_id)
            }
        }
    }

    /// Best-effort drain while online; failures leave the queue for the
    /// next sync.
    async fn flush_queue(&self) {
        let Some(_guard) = SyncGuard::acquire(&self.sync_in_progress) else {
            return;
        };
        if let Err(e) = self.queue.drain(self.gateway.as_ref()).await {
            tracing::debug!(error = %e, "Queue flush failed");
        }
    }

    /// Record a connectivity change. Returns true on an offline to online
    /// transition, which calls for a reconnect.
    pub(crate) fn transition(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        match (was_online, online) {
            (false, true) => {
                tracing::info!("Connection restored");
                self.emit(SyncEvent::Online);
                true
            }
            (true, false) => {
                tracing::info!("Offline mode");
                self.emit(SyncEvent::Offline);
                false
            }
            _ => false,
        }
    }

    /// Connectivity callback. Going online runs the reconnect sequence;
    /// going offline only flips the flag, in-flight calls keep running.
    pub async fn set_online(&self, online: bool) -> SyncResult<SyncOutcome> {
        if self.transition(online) {
            self.reconnect().await
        } else {
            Ok(SyncOutcome::Idle)
        }
    }

    /// Drain the queue, then replace local state with the remote collection.
    ///
    /// A failed drain skips the pull: the remote copy does not have the
    /// queued work yet and would overwrite it locally.
    pub async fn reconnect(&self) -> SyncResult<SyncOutcome> {
        let Some(_guard) = SyncGuard::acquire(&self.sync_in_progress) else {
            tracing::debug!("Sync already in progress, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let result = self.drain_then_pull().await;
        self.report(&result);
        result
    }

    async fn drain_then_pull(&self) -> SyncResult<SyncOutcome> {
        let replayed = self.queue.drain(self.gateway.as_ref()).await?;
        let pulled = self.pull().await?;
        Ok(SyncOutcome::Completed { replayed, pulled })
    }

    /// Replace local state with the remote collection, without draining
    pub async fn full_sync(&self) -> SyncResult<SyncOutcome> {
        let Some(_guard) = SyncGuard::acquire(&self.sync_in_progress) else {
            tracing::debug!("Sync already in progress, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let result = self
            .pull()
            .await
            .map(|pulled| SyncOutcome::Completed {
                replayed: 0,
                pulled,
            });
        self.report(&result);
        result
    }

    /// Manual sync request
    pub async fn sync_now(&self) -> SyncResult<SyncOutcome> {
        if !self.is_online() {
            tracing::info!("Manual sync requested while offline");
            return Ok(SyncOutcome::Offline);
        }
        self.reconnect().await
    }

    /// Application start: sync if online, otherwise (or on failure) serve
    /// the cached list.
    pub async fn startup_sync(&self) -> Vec<Task> {
        if self.is_online()
            && let Err(e) = self.reconnect().await
        {
            tracing::warn!(error = %e, "Startup sync failed, using cached tasks");
        }
        self.tasks()
    }

    async fn pull(&self) -> SyncResult<usize> {
        let documents = self
            .gateway
            .list_all(TASKS_COLLECTION)
            .await
            .map_err(SyncError::RemoteRead)?;

        let user_id = self.gateway.user_id();
        let received = documents.len();
        let mut tasks = Vec::with_capacity(received);
        for document in documents {
            match serde_json::from_value::<Task>(document) {
                Ok(task) if task.user_id.as_deref() == Some(user_id) => tasks.push(task),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable remote record"),
            }
        }

        self.store.save_all(&tasks)?;
        tracing::info!(received, kept = tasks.len(), "Full sync complete");
        Ok(tasks.len())
    }

    fn report(&self, result: &SyncResult<SyncOutcome>) {
        match result {
            Ok(SyncOutcome::Completed { replayed, pulled }) => self.emit(SyncEvent::Synced {
                replayed: *replayed,
                pulled: *pulled,
            }),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Sync failed");
                self.emit(SyncEvent::SyncFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }
}
