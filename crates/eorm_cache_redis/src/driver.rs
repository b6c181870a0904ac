use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use eorm_core::{CacheBackend, CacheStatus, CachedPayload, EormError};

fn format_redis_error(err: redis::RedisError) -> EormError {
    EormError::Cache(err.to_string())
}

fn wire_key(repository: &str, key: &str) -> String {
    format!("eorm:{repository}:{key}")
}

fn repository_pattern(repository: &str) -> String {
    format!("eorm:{repository}:*")
}

/// `CacheBackend` over Redis: every payload round-trips through JSON so the
/// wire format matches whatever a caller inspecting the keyspace by hand
/// would see, rather than a backend-specific binary encoding.
pub struct RedisCacheBackend {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCacheBackend {
    pub fn connect(url: &str) -> Result<Self, EormError> {
        let client = redis::Client::open(url).map_err(format_redis_error)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    /// Returns a live multiplexed connection, reconnecting if the cached one
    /// has never been established or a prior call tore it down.
    async fn connection(&self) -> Result<MultiplexedConnection, EormError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(format_redis_error)?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the cached connection so the next call reconnects instead of
    /// repeatedly failing against a connection Redis has already closed.
    async fn discard_connection(&self) {
        *self.conn.lock().await = None;
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, EormError> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(format_redis_error)?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, repository: &str, key: &str) -> Result<Option<CachedPayload>, EormError> {
        let mut conn = self.connection().await?;
        let raw: Option<Vec<u8>> = conn
            .get(wire_key(repository, key))
            .await
            .map_err(format_redis_error)?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let payload: CachedPayload = serde_json::from_slice(&bytes)?;
                Ok(Some(payload))
            }
        }
    }

    async fn set(
        &self,
        repository: &str,
        key: &str,
        value: CachedPayload,
        ttl: Duration,
    ) -> Result<(), EormError> {
        let mut conn = self.connection().await?;
        let encoded = serde_json::to_vec(&value)?;
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(wire_key(repository, key), encoded, seconds)
            .await
            .map_err(format_redis_error)?;
        Ok(())
    }

    async fn delete(&self, repository: &str, key: &str) -> Result<(), EormError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(wire_key(repository, key))
            .await
            .map_err(format_redis_error)?;
        Ok(())
    }

    async fn clear_repository(&self, repository: &str) -> Result<(), EormError> {
        let keys = self.scan_keys(&repository_pattern(repository)).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: () = conn.del(keys).await.map_err(format_redis_error)?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), EormError> {
        let keys = self.scan_keys("eorm:*").await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: () = conn.del(keys).await.map_err(format_redis_error)?;
        Ok(())
    }

    async fn status(&self) -> Result<CacheStatus, EormError> {
        let conn = match self.connection().await {
            Ok(conn) => conn,
            Err(_) => {
                self.discard_connection().await;
                return Ok(CacheStatus {
                    connected: false,
                    entry_count: None,
                });
            }
        };
        let mut conn = conn;
        let pong: Result<String, redis::RedisError> = redis::cmd("PING").query_async(&mut conn).await;
        if pong.is_err() {
            self.discard_connection().await;
            return Ok(CacheStatus {
                connected: false,
                entry_count: None,
            });
        }
        let entry_count = self.scan_keys("eorm:*").await.ok().map(|keys| keys.len() as u64);
        Ok(CacheStatus {
            connected: true,
            entry_count,
        })
    }
}
