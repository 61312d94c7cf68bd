//! Presence cache: per-user online counters and per-conversation participant
//! lists, backed by Redis in production and by process memory otherwise.

pub mod memory;
pub mod redis_cache;

use std::fmt::Display;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::MemoryPresence;
pub use redis_cache::RedisPresence;

/// Namespace of the per-user open connection counters.
pub const ONLINE: &str = "online";

/// Namespace of the per-conversation participant username lists.
pub const CONVERSATION: &str = "conversation";

/// Key for `id` inside `namespace`, e.g. `conversation:<uuid>`.
pub fn build_key(namespace: &str, id: impl Display) -> String {
    format!("{}:{}", namespace, id)
}

#[async_trait]
pub trait PresenceCache: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Stores `values` as the list at `key` only if the key is absent.
    /// Check and write happen atomically. Returns whether anything was written.
    async fn push_if_absent(&self, key: &str, values: &[String]) -> Result<bool>;

    /// The list stored at `key`, empty when absent.
    async fn members(&self, key: &str) -> Result<Vec<String>>;

    /// Counter for `id` in `namespace`; 0 when never set.
    async fn get_status(&self, namespace: &str, id: Uuid) -> Result<i64>;

    /// Increments the counter and returns the new value.
    async fn incr_status(&self, namespace: &str, id: Uuid) -> Result<i64>;

    /// Decrements the counter, never below zero, and returns the new value.
    async fn decr_status(&self, namespace: &str, id: Uuid) -> Result<i64>;
}
