//! Persistent key-value storage for accounts, registrations, and scenario
//! program configuration. The engine depends only on the `Store` trait;
//! the reference implementation here is an in-memory map, suitable for
//! tests and for a single-process deployment without external state.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::SipResult;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> SipResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> SipResult<()>;
    async fn delete(&self, key: &str) -> SipResult<()>;
}

/// A `Store` backed by a `Mutex<HashMap>`, with no persistence across
/// process restarts.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> SipResult<Option<String>> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> SipResult<()> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> SipResult<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        store.put("/account/atlanta.com/alice", "{}").await.unwrap();
        assert_eq!(
            store.get("/account/atlanta.com/alice").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = MemoryStore::new();
        store.put("/k", "v").await.unwrap();
        store.delete("/k").await.unwrap();
        assert_eq!(store.get("/k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("/missing").await.unwrap(), None);
    }
}
