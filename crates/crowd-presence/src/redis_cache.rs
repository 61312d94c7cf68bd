use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;
use uuid::Uuid;

use crate::{PresenceCache, build_key};

/// RPUSH only when the key is absent, in one round trip.
const PUSH_IF_ABSENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('RPUSH', KEYS[1], unpack(ARGV))
return 1
";

/// DECR that clamps at zero.
const DECR_FLOOR: &str = r"
local value = redis.call('DECR', KEYS[1])
if value < 0 then
    redis.call('SET', KEYS[1], 0)
    return 0
end
return value
";

/// Redis-backed presence cache. Cloning shares the multiplexed connection.
#[derive(Clone)]
pub struct RedisPresence {
    manager: ConnectionManager,
}

impl RedisPresence {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).context("failed to parse Redis connection string")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;
        info!("Presence cache connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl PresenceCache for RedisPresence {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn push_if_absent(&self, key: &str, values: &[String]) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let mut conn = self.manager.clone();
        let script = redis::Script::new(PUSH_IF_ABSENT);
        let mut invocation = script.prepare_invoke();
        invocation.key(key);
        for value in values {
            invocation.arg(value);
        }
        let written: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(written == 1)
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let values: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(values)
    }

    async fn get_status(&self, namespace: &str, id: Uuid) -> Result<i64> {
        let mut conn = self.manager.clone();
        let value: Option<i64> = conn.get(build_key(namespace, id)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn incr_status(&self, namespace: &str, id: Uuid) -> Result<i64> {
        let mut conn = self.manager.clone();
        let value: i64 = conn.incr(build_key(namespace, id), 1).await?;
        Ok(value)
    }

    async fn decr_status(&self, namespace: &str, id: Uuid) -> Result<i64> {
        let mut conn = self.manager.clone();
        let value: i64 = redis::Script::new(DECR_FLOOR)
            .key(build_key(namespace, id))
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }
}
