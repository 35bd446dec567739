//! Single-flight guard for analysis runs, backed by Redis.
//!
//! Two requests for the same unanalyzed resume would otherwise both run the
//! four-stage pipeline. The first request takes `analysis:inflight:<id>`
//! with `SET NX EX`; later ones get no lease and are told to retry. The TTL
//! bounds how long a crashed worker can block the resume.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

pub fn inflight_key(resume_id: Uuid) -> String {
    format!("analysis:inflight:{resume_id}")
}

/// Expiring exclusive keys.
#[async_trait]
pub trait InflightLock: Send + Sync {
    /// Returns `true` when the key was free and is now held.
    async fn try_lock(&self, key: &str, ttl_secs: u64) -> redis::RedisResult<bool>;

    async fn unlock(&self, key: &str) -> redis::RedisResult<()>;
}

#[async_trait]
impl InflightLock for redis::Client {
    async fn try_lock(&self, key: &str, ttl_secs: u64) -> redis::RedisResult<bool> {
        let mut conn = self.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str) -> redis::RedisResult<()> {
        let mut conn = self.get_multiplexed_async_connection().await?;
        conn.del(key).await
    }
}

pub struct InflightGuard {
    lock: Arc<dyn InflightLock>,
    ttl_secs: u64,
}

impl InflightGuard {
    pub fn new(lock: Arc<dyn InflightLock>, ttl_secs: u64) -> Self {
        Self { lock, ttl_secs }
    }

    /// A lease when this caller now owns the run for `resume_id`, `None` when
    /// another run holds it.
    pub async fn try_acquire(&self, resume_id: Uuid) -> redis::RedisResult<Option<InflightLease>> {
        let key = inflight_key(resume_id);
        let acquired = self.lock.try_lock(&key, self.ttl_secs).await?;
        debug!("Inflight guard for resume {resume_id}: acquired={acquired}");

        Ok(acquired.then(|| InflightLease {
            lock: Arc::clone(&self.lock),
            key: Some(key),
        }))
    }
}

/// Ownership of one in-flight key. Dropping it without calling `release`
/// (panic, cancelled task) still frees the key from a spawned task.
pub struct InflightLease {
    lock: Arc<dyn InflightLock>,
    key: Option<String>,
}

impl InflightLease {
    /// Best effort: a failed release only delays the next run until the TTL.
    pub async fn release(mut self) {
        if let Some(key) = self.key.take() {
            unlock_logged(self.lock.as_ref(), &key).await;
        }
    }
}

impl Drop for InflightLease {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let lock = Arc::clone(&self.lock);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { unlock_logged(lock.as_ref(), &key).await });
            }
            Err(_) => warn!("No runtime to release {key}; it expires with its TTL"),
        }
    }
}

async fn unlock_logged(lock: &dyn InflightLock, key: &str) {
    if let Err(e) = lock.unlock(key).await {
        warn!("Failed to release inflight guard {key}: {e}");
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    /// Keys never expire; tests release them explicitly or by dropping.
    #[derive(Default)]
    pub struct InMemoryLock {
        held: Mutex<HashSet<String>>,
    }

    impl InMemoryLock {
        pub fn is_held(&self, key: &str) -> bool {
            self.held.lock().unwrap().contains(key)
        }
    }

    #[async_trait]
    impl InflightLock for InMemoryLock {
        async fn try_lock(&self, key: &str, _ttl_secs: u64) -> redis::RedisResult<bool> {
            Ok(self.held.lock().unwrap().insert(key.to_string()))
        }

        async fn unlock(&self, key: &str) -> redis::RedisResult<()> {
            self.held.lock().unwrap().remove(key);
            Ok(())
        }
    }
}
