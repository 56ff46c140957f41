//! Local store: the device-resident copy of the task list

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::db::{Database, is_storage_full};
use crate::error::{SyncError, SyncResult};
use crate::models::Task;

/// Key holding the serialized task collection
pub const TASKS_KEY: &str = "clario_tasks_v2";

/// A JSON array persisted whole under one fixed key
pub(crate) struct JsonSlot<T> {
    db: Arc<Database>,
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonSlot<T> {
    pub(crate) fn new(db: Arc<Database>, key: &'static str) -> Self {
        Self {
            db,
            key,
            _marker: PhantomData,
        }
    }

    /// Never fails: a missing slot is empty, an unreadable one is logged
    /// and treated as empty.
    pub(crate) fn load(&self) -> Vec<T> {
        match self.db.kv_get(self.key) {
            Ok(raw) => decode(self.key, raw.as_deref()),
            Err(e) => {
                tracing::error!(key = self.key, error = %e, "Failed to read local slot");
                Vec::new()
            }
        }
    }

    pub(crate) fn save(&self, items: &[T]) -> SyncResult<()> {
        let raw = serde_json::to_string(items).map_err(anyhow::Error::from)?;
        self.db
            .kv_put(self.key, &raw)
            .map_err(|e| self.write_error(SyncError::Storage(e)))
    }

    /// Load, change and save the collection as one atomic step.
    ///
    /// `change` returns its result and whether it modified the items;
    /// unmodified collections are not written back.
    pub(crate) fn update<R>(
        &self,
        change: impl FnOnce(&mut Vec<T>) -> SyncResult<(R, bool)>,
    ) -> SyncResult<R> {
        let key = self.key;
        self.db
            .kv_update::<R, SyncError>(key, |raw| {
                let mut items = decode::<T>(key, raw.as_deref());
                let (result, modified) = change(&mut items)?;
                let next = if modified {
                    Some(serde_json::to_string(&items).map_err(anyhow::Error::from)?)
                } else {
                    None
                };
                Ok((next, result))
            })
            .map_err(|e| self.write_error(e))
    }

    fn write_error(&self, err: SyncError) -> SyncError {
        match err {
            SyncError::Storage(e) if is_storage_full(&e) => {
                tracing::error!(key = self.key, "Local storage full");
                SyncError::StorageFull
            }
            other => other,
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: Option<&str>) -> Vec<T> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(key, error = %e, "Corrupt local slot, treating as empty");
        Vec::new()
    })
}

/// Durable task list. Every call reads or rewrites the whole collection.
pub struct LocalStore {
    slot: JsonSlot<Task>,
}

impl LocalStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            slot: JsonSlot::new(db, TASKS_KEY),
        }
    }

    pub fn get_all(&self) -> Vec<Task> {
        self.slot.load()
    }

    pub fn save_all(&self, tasks: &[Task]) -> SyncResult<()> {
        self.slot.save(tasks)?;
        tracing::debug!(count = tasks.len(), "Local store saved");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.get_all().into_iter().find(|t| t.id == id)
    }

    /// Append a task, assigning an id if it has none
    pub fn add(&self, mut task: Task) -> SyncResult<Task> {
        if task.id.is_empty() {
            task.id = Task::new_id();
        }
        self.slot.update(|tasks| {
            tasks.push(task.clone());
            Ok((task, true))
        })
    }

    /// Overwrite the stored record with the same id
    pub fn replace(&self, task: &Task) -> SyncResult<()> {
        self.slot.update(|tasks| {
            let slot = tasks
                .iter_mut()
                .find(|t| t.id == task.id)
                .ok_or_else(|| SyncError::NotFound(task.id.clone()))?;
            *slot = task.clone();
            Ok(((), true))
        })
    }

    /// Remove a task; returns whether it was present
    pub fn remove(&self, id: &str) -> SyncResult<bool> {
        self.slot.update(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            let removed = tasks.len() != before;
            Ok((removed, removed))
        })
    }

    /// Record a confirmed remote write. A task deleted meanwhile is left alone.
    pub fn mark_synced(&self, id: &str, at: DateTime<Utc>) -> SyncResult<()> {
        self.slot.update(|tasks| {
            let found = tasks.iter_mut().find(|t| t.id == id).map(|task| {
                task.synced_at = Some(at);
            });
            Ok(((), found.is_some()))
        })
    }
}
