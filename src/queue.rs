//! Pending-operation queue: mutations not yet confirmed by the remote store
//!
//! The queue is an ordered log. It is never reordered or coalesced, and
//! a drain always starts from the head: entries replayed before a failure
//! stay queued and are replayed again on the next drain. This relies on
//! every remote write being an upsert-by-id or delete-by-id.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::Database;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{GatewayError, RemoteGateway};
use crate::models::{PendingAction, PendingOperation, TASKS_COLLECTION};
use crate::store::JsonSlot;

/// Key holding the serialized pending queue
pub const QUEUE_KEY: &str = "clario_pending_ops";

pub struct PendingQueue {
    slot: JsonSlot<PendingOperation>,
}

impl PendingQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            slot: JsonSlot::new(db, QUEUE_KEY),
        }
    }

    /// Append a mutation. Duplicates are kept.
    pub fn enqueue(&self, action: PendingAction, user_id: &str) -> SyncResult<()> {
        let op = PendingOperation {
            action,
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        };
        self.slot.update(|ops| {
            tracing::info!(
                action = %op.action.kind(),
                task_id = %op.action.task_id(),
                position = ops.len(),
                "Queued pending operation"
            );
            ops.push(op);
            Ok(((), true))
        })
    }

    pub fn list(&self) -> Vec<PendingOperation> {
        self.slot.load()
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replay every queued operation in order.
    ///
    /// On success the replayed entries are removed and their count is
    /// returned. The first failure aborts the drain and leaves the queue
    /// untouched. Entries enqueued while the drain is running are not
    /// replayed and survive it.
    pub async fn drain(&self, gateway: &dyn RemoteGateway) -> SyncResult<usize> {
        let ops = self.list();
        if ops.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = ops.len(), "Draining pending queue");

        for (position, op) in ops.iter().enumerate() {
            if let Err(e) = replay(gateway, op, Utc::now()).await {
                tracing::warn!(
                    position,
                    action = %op.action.kind(),
                    task_id = %op.action.task_id(),
                    error = %e,
                    "Drain aborted, queue kept for retry"
                );
                return Err(SyncError::RemoteWrite(e));
            }
        }

        self.remove_head(ops.len())?;
        tracing::info!(count = ops.len(), "Pending queue drained");
        Ok(ops.len())
    }

    fn remove_head(&self, n: usize) -> SyncResult<()> {
        self.slot.update(|ops| {
            let n = n.min(ops.len());
            *ops = ops.split_off(n);
            Ok(((), n > 0))
        })
    }
}

/// Apply one operation against the remote store, stamping `syncedAt`
/// and the owner on written records.
pub async fn replay(
    gateway: &dyn RemoteGateway,
    op: &PendingOperation,
    synced_at: DateTime<Utc>,
) -> Result<(), GatewayError> {
    match &op.action {
        PendingAction::Add { task } | PendingAction::Update { task } => {
            let mut record = task.clone();
            record.user_id = Some(op.user_id.clone());
            record.synced_at = Some(synced_at);
            let document = record.to_document()?;
            gateway.put(TASKS_COLLECTION, &record.id, document).await
        }
        PendingAction::Delete { task_id } => gateway.delete(TASKS_COLLECTION, task_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::models::{Task, TaskDraft};
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Notify;

    fn queue() -> PendingQueue {
        PendingQueue::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn add(title: &str) -> PendingAction {
        PendingAction::Add {
            task: Task::from_draft(TaskDraft::titled(title), "u1", Utc::now()),
        }
    }

    #[test]
    fn enqueue_preserves_order_and_duplicates() {
        let q = queue();
        let a = add("a");
        q.enqueue(a.clone(), "u1").unwrap();
        q.enqueue(a.clone(), "u1").unwrap();
        q.enqueue(PendingAction::Delete { task_id: "x".into() }, "u1")
            .unwrap();

        let ops = q.list();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].action, a);
        assert_eq!(ops[1].action, a);
        assert_eq!(ops[2].action.task_id(), "x");
    }

    #[tokio::test]
    async fn drain_replays_in_order_and_clears() {
        let q = queue();
        let gw = MemoryGateway::new("u1");
        let a = add("a");
        let id = a.task_id().to_string();
        q.enqueue(a, "u1").unwrap();
        q.enqueue(PendingAction::Delete { task_id: id.clone() }, "u1")
            .unwrap();

        assert_eq!(q.drain(&gw).await.unwrap(), 2);
        assert!(q.is_empty());
        // add then delete: the delete was applied last
        assert_eq!(gw.document(TASKS_COLLECTION, &id), None);
        assert_eq!(gw.write_count(), 2);
    }

    #[tokio::test]
    async fn partial_failure_keeps_every_entry() {
        let q = queue();
        let gw = MemoryGateway::new("u1");
        for title in ["a", "b", "c"] {
            q.enqueue(add(title), "u1").unwrap();
        }

        gw.fail_writes_after(Some(1));
        let err = q.drain(&gw).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteWrite(_)));
        assert_eq!(q.len(), 3);

        // retry starts from the head again
        gw.fail_writes_after(None);
        assert_eq!(q.drain(&gw).await.unwrap(), 3);
        assert!(q.is_empty());
        assert_eq!(gw.snapshot(TASKS_COLLECTION).len(), 3);
    }

    /// Holds every `put` until released
    struct HeldPuts {
        inner: MemoryGateway,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RemoteGateway for HeldPuts {
        async fn list_all(&self, collection: &str) -> Result<Vec<Value>, GatewayError> {
            self.inner.list_all(collection).await
        }

        async fn put(&self, collection: &str, id: &str, document: Value) -> Result<(), GatewayError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.put(collection, id, document).await
        }

        async fn delete(&self, collection: &str, id: &str) -> Result<(), GatewayError> {
            self.inner.delete(collection, id).await
        }

        fn user_id(&self) -> &str {
            self.inner.user_id()
        }
    }

    #[tokio::test]
    async fn entries_enqueued_during_a_drain_survive_it() {
        let q = queue();
        let gw = HeldPuts {
            inner: MemoryGateway::new("u1"),
            entered: Notify::new(),
            release: Notify::new(),
        };
        q.enqueue(add("first"), "u1").unwrap();
        let late = add("late");

        let (drained, ()) = tokio::join!(q.drain(&gw), async {
            gw.entered.notified().await;
            q.enqueue(late.clone(), "u1").unwrap();
            gw.release.notify_one();
        });

        assert_eq!(drained.unwrap(), 1);
        let left = q.list();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].action, late);
        assert_eq!(gw.inner.snapshot(TASKS_COLLECTION).len(), 1);
    }

    #[tokio::test]
    async fn replaying_twice_reaches_the_same_remote_state() {
        let gw_once = MemoryGateway::new("u1");
        let gw_twice = MemoryGateway::new("u1");
        let a = add("a");
        let id = a.task_id().to_string();
        let ops: Vec<PendingOperation> = [
            a,
            PendingAction::Update {
                task: Task::from_draft(TaskDraft::titled("b"), "u1", Utc::now()),
            },
            PendingAction::Delete { task_id: id },
        ]
        .into_iter()
        .map(|action| PendingOperation {
            action,
            user_id: "u1".into(),
            timestamp: Utc::now(),
        })
        .collect();

        let at = Utc::now();
        for op in &ops {
            replay(&gw_once, op, at).await.unwrap();
        }
        for _ in 0..2 {
            for op in &ops {
                replay(&gw_twice, op, at).await.unwrap();
            }
        }

        assert_eq!(
            gw_once.snapshot(TASKS_COLLECTION),
            gw_twice.snapshot(TASKS_COLLECTION)
        );
    }

    #[tokio::test]
    async fn replay_stamps_owner_and_sync_time() {
        let gw = MemoryGateway::new("u1");
        let a = add("a");
        let id = a.task_id().to_string();
        let op = PendingOperation {
            action: a,
            user_id: "owner".into(),
            timestamp: Utc::now(),
        };

        replay(&gw, &op, Utc::now()).await.unwrap();
        let doc = gw.document(TASKS_COLLECTION, &id).unwrap();
        assert_eq!(doc["userId"], "owner");
        assert!(doc["syncedAt"].is_string());
    }
}
