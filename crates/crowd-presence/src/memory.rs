use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{PresenceCache, build_key};

/// Process-local presence cache, used when no Redis URL is configured.
#[derive(Clone, Default)]
pub struct MemoryPresence {
    inner: Arc<MemoryPresenceInner>,
}

#[derive(Default)]
struct MemoryPresenceInner {
    /// key -> list of values
    lists: RwLock<HashMap<String, Vec<String>>>,

    /// key -> counter
    counters: RwLock<HashMap<String, i64>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceCache for MemoryPresence {
    async fn exists(&self, key: &str) -> Result<bool> {
        if self.inner.lists.read().await.contains_key(key) {
            return Ok(true);
        }
        Ok(self.inner.counters.read().await.contains_key(key))
    }

    async fn push_if_absent(&self, key: &str, values: &[String]) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let mut lists = self.inner.lists.write().await;
        if lists.contains_key(key) {
            return Ok(false);
        }
        lists.insert(key.to_string(), values.to_vec());
        Ok(true)
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lists
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_status(&self, namespace: &str, id: Uuid) -> Result<i64> {
        let key = build_key(namespace, id);
        Ok(self.inner.counters.read().await.get(&key).copied().unwrap_or(0))
    }

    async fn incr_status(&self, namespace: &str, id: Uuid) -> Result<i64> {
        let mut counters = self.inner.counters.write().await;
        let count = counters.entry(build_key(namespace, id)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn decr_status(&self, namespace: &str, id: Uuid) -> Result<i64> {
        let mut counters = self.inner.counters.write().await;
        let count = counters.entry(build_key(namespace, id)).or_insert(0);
        *count = (*count - 1).max(0);
        Ok(*count)
    }
}
