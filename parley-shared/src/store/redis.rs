use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{StateStore, StoreResult};
use crate::timeout::{with_timeout, STORE_OP_TIMEOUT};

/// Redis-backed state store. A `ConnectionManager` reconnects on its own,
/// so cloning the handle per operation is cheap and safe. Every command is
/// raced against [`STORE_OP_TIMEOUT`].
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(url = %url, "connected to Redis");
        Ok(Self { conn })
    }

}

#[async_trait]
impl StateStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        with_timeout("PING", STORE_OP_TIMEOUT, async move {
            redis::cmd("PING").query_async::<_, ()>(&mut conn).await
        })
        .await??;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Ok(with_timeout("GET", STORE_OP_TIMEOUT, async move { conn.get(key).await }).await??)
    }

    async fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let value = value.to_owned();
        Ok(with_timeout("SETNX", STORE_OP_TIMEOUT, async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .query_async::<_, Option<String>>(&mut conn)
                .await
                .map(|reply| reply.is_some())
        })
        .await??)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        with_timeout("DEL", STORE_OP_TIMEOUT, async move {
            conn.del::<_, ()>(key).await
        })
        .await??;
        Ok(())
    }

    async fn hash_set(&self, key: &str, entries: &[(&str, String)]) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let entries: Vec<(String, String)> = entries
            .iter()
            .map(|(field, value)| ((*field).to_owned(), value.clone()))
            .collect();
        with_timeout("HSET", STORE_OP_TIMEOUT, async move {
            conn.hset_multiple::<_, _, _, ()>(key, &entries).await
        })
        .await??;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Ok(with_timeout("HGETALL", STORE_OP_TIMEOUT, async move {
            conn.hgetall(key).await
        })
        .await??)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let member = member.to_owned();
        with_timeout("SADD", STORE_OP_TIMEOUT, async move {
            conn.sadd::<_, _, ()>(key, member).await
        })
        .await??;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let member = member.to_owned();
        with_timeout("SREM", STORE_OP_TIMEOUT, async move {
            conn.srem::<_, _, ()>(key, member).await
        })
        .await??;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Ok(with_timeout("SMEMBERS", STORE_OP_TIMEOUT, async move {
            conn.smembers(key).await
        })
        .await??)
    }

    async fn set_len(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        Ok(with_timeout("SCARD", STORE_OP_TIMEOUT, async move {
            conn.scard(key).await
        })
        .await??)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let channel = channel.to_owned();
        let payload = payload.to_owned();
        with_timeout("PUBLISH", STORE_OP_TIMEOUT, async move {
            conn.publish::<_, _, ()>(channel, payload).await
        })
        .await??;
        Ok(())
    }
}
