//! Redis for session cache tests
//!
//! Uses `TEST_REDIS_URL` when set, otherwise starts a throwaway container.

use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;

use EventBuddy::config::RedisConfig;

pub struct TestCache {
    pub url: String,
    _container: Option<ContainerAsync<Redis>>,
}

impl TestCache {
    pub async fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        match std::env::var("TEST_REDIS_URL") {
            Ok(url) => Ok(Self { url, _container: None }),
            Err(_) => {
                let container = Redis::default().start().await?;
                let port = container.get_host_port_ipv4(6379).await?;
                Ok(Self {
                    url: format!("redis://127.0.0.1:{}", port),
                    _container: Some(container),
                })
            }
        }
    }

    /// Cache settings under a prefix of their own, since session ids restart
    /// with every truncated database
    pub fn config(&self) -> RedisConfig {
        RedisConfig {
            url: self.url.clone(),
            prefix: format!("eventbuddy-test-{}:", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            ttl_seconds: 300,
        }
    }
}
