//! In-process gateway with injectable failures

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{GatewayError, RemoteGateway};

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Gateway backed by a map, for tests and offline demos
pub struct MemoryGateway {
    user_id: String,
    collections: Mutex<Collections>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Successful writes allowed before every write fails
    write_budget: Mutex<Option<usize>>,
    writes: AtomicUsize,
}

impl MemoryGateway {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            collections: Mutex::new(BTreeMap::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            write_budget: Mutex::new(None),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Let `n` more writes succeed, then fail until reset with `None`
    pub fn fail_writes_after(&self, n: Option<usize>) {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = n;
        }
    }

    /// Number of successful puts and deletes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Direct lookup, bypassing failure injection
    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .lock()
            .ok()?
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Snapshot of a collection, bypassing failure injection
    pub fn snapshot(&self, collection: &str) -> BTreeMap<String, Value> {
        self.collections
            .lock()
            .ok()
            .and_then(|c| c.get(collection).cloned())
            .unwrap_or_default()
    }

    /// Seed a document as if another device had written it
    pub fn insert(&self, collection: &str, id: &str, mut document: Value) {
        if let Some(object) = document.as_object_mut() {
            object.insert("id".to_string(), Value::String(id.to_string()));
        }
        if let Ok(mut collections) = self.collections.lock() {
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), document);
        }
    }

    fn check_write(&self) -> Result<(), GatewayError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated network error".into()));
        }
        let mut budget = self
            .write_budget
            .lock()
            .map_err(|_| GatewayError::Unavailable("gateway lock poisoned".into()))?;
        match budget.as_mut() {
            Some(0) => Err(GatewayError::Unavailable("simulated network error".into())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Collections>, GatewayError> {
        self.collections
            .lock()
            .map_err(|_| GatewayError::Unavailable("gateway lock poisoned".into()))
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn list_all(&self, collection: &str) -> Result<Vec<Value>, GatewayError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated network error".into()));
        }
        Ok(self
            .lock()?
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, collection: &str, id: &str, mut document: Value) -> Result<(), GatewayError> {
        self.check_write()?;
        let object = document.as_object_mut().ok_or_else(|| GatewayError::Rejected {
            status: 400,
            message: "document must be a JSON object".into(),
        })?;
        object.insert("id".to_string(), Value::String(id.to_string()));

        self.lock()?
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), GatewayError> {
        self.check_write()?;
        if let Some(docs) = self.lock()?.get_mut(collection) {
            docs.remove(id);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_is_an_upsert() {
        let gw = MemoryGateway::new("u1");
        gw.put("tasks", "a", json!({ "title": "one" })).await.unwrap();
        gw.put("tasks", "a", json!({ "title": "two" })).await.unwrap();

        let docs = gw.list_all("tasks").await.unwrap();
        assert_eq!(docs, vec![json!({ "id": "a", "title": "two" })]);
    }

    #[tokio::test]
    async fn delete_of_missing_document_succeeds() {
        let gw = MemoryGateway::new("u1");
        gw.delete("tasks", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn write_budget_runs_out() {
        let gw = MemoryGateway::new("u1");
        gw.fail_writes_after(Some(1));

        gw.put("tasks", "a", json!({})).await.unwrap();
        assert!(gw.put("tasks", "b", json!({})).await.is_err());
        assert!(gw.delete("tasks", "a").await.is_err());

        gw.fail_writes_after(None);
        gw.delete("tasks", "a").await.unwrap();
        assert_eq!(gw.write_count(), 2);
    }

    #[tokio::test]
    async fn read_failures_are_injectable() {
        let gw = MemoryGateway::new("u1");
        gw.fail_reads(true);
        assert!(matches!(
            gw.list_all("tasks").await,
            Err(GatewayError::Unavailable(_))
        ));
    }
}
