//! Redis session cache
//!
//! Validated sessions are cached by id so that authenticated requests skip
//! the session lookup in Postgres. Entries expire after the configured TTL
//! and are dropped on logout, rotation and account deactivation.

use redis::{AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RedisConfig;
use crate::utils::errors::Result;

#[derive(Clone, Debug)]
pub struct RedisService {
    client: Client,
    prefix: String,
    ttl_seconds: u64,
}

/// Cache entry with TTL information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub ttl_seconds: u64,
}

impl RedisService {
    /// Create a new RedisService instance
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            prefix: config.prefix.clone(),
            ttl_seconds: config.ttl_seconds,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Set a value with TTL
    pub async fn set<T>(&self, key: &str, value: &T, ttl_seconds: Option<u64>) -> Result<()>
    where
        T: Serialize,
    {
        let mut conn = self.get_connection().await?;
        let entry = CacheEntry {
            data: value,
            created_at: chrono::Utc::now(),
            ttl_seconds: ttl_seconds.unwrap_or(self.ttl_seconds),
        };
        let serialized = serde_json::to_string(&entry)?;
        let full_key = self.full_key(key);

        let _: () = conn.set_ex(&full_key, serialized, entry.ttl_seconds).await?;

        debug!(key = %full_key, ttl = entry.ttl_seconds, "Value set in Redis");
        Ok(())
    }

    /// Get a value
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut conn = self.get_connection().await?;
        let full_key = self.full_key(key);

        let result: Option<String> = conn.get(&full_key).await?;
        match result {
            Some(data) => {
                let entry = serde_json::from_str::<CacheEntry<T>>(&data)?;
                debug!(key = %full_key, "Value retrieved from Redis");
                Ok(Some(entry.data))
            }
            None => {
                debug!(key = %full_key, "Key not found in Redis");
                Ok(None)
            }
        }
    }

    /// Delete a key
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.full_key(key);

        let deleted: i32 = conn.del(&full_key).await?;

        debug!(key = %full_key, deleted = deleted > 0, "Key deletion attempted");
        Ok(deleted > 0)
    }

    /// Cache a validated session
    pub async fn cache_session<T: Serialize>(&self, session_id: i64, session: &T) -> Result<()> {
        self.set(&format!("session:{}", session_id), session, None).await
    }

    pub async fn cached_session<T>(&self, session_id: i64) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.get(&format!("session:{}", session_id)).await
    }

    pub async fn invalidate_session(&self, session_id: i64) -> Result<bool> {
        self.delete(&format!("session:{}", session_id)).await
    }

    /// `PING` round trip; any failure counts as unhealthy
    pub async fn ping(&self) -> bool {
        let reply: Result<String> = async {
            let mut conn = self.get_connection().await?;
            let reply: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            Ok(reply?)
        }
        .await;

        match reply {
            Ok(reply) => reply == "PONG",
            Err(e) => {
                warn!(error = %e, "Session cache unreachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RedisConfig {
        RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: "eventbuddy:".to_string(),
            ttl_seconds: 900,
        }
    }

    #[test]
    fn test_client_creation_does_not_connect() {
        let service = RedisService::new(&config()).unwrap();
        assert_eq!(service.full_key("session:1"), "eventbuddy:session:1");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let mut config = config();
        config.url = "not a url".to_string();
        assert!(RedisService::new(&config).is_err());
    }

    #[test]
    fn test_cache_entry_serialization() {
        let entry = CacheEntry {
            data: "test_data".to_string(),
            created_at: chrono::Utc::now(),
            ttl_seconds: 3600,
        };

        let serialized = serde_json::to_string(&entry).unwrap();
        let deserialized: CacheEntry<String> = serde_json::from_str(&serialized).unwrap();

        assert_eq!(entry.data, deserialized.data);
        assert_eq!(entry.ttl_seconds, deserialized.ttl_seconds);
    }
}
