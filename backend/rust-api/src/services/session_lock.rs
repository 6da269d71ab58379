use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use anyhow::Context;
use redis::aio::ConnectionManager;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AssessmentError, AssessmentResult};
use crate::metrics::track_lock_operation;

/// Per-key async mutexes. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
pub struct KeyedLocks {
    inner: StdMutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, weak| weak.strong_count() > 0);

            match map.get(key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let created = Arc::new(Mutex::new(()));
                    map.insert(key.to_string(), Arc::downgrade(&created));
                    created
                }
            }
        };

        mutex.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.values().filter(|weak| weak.strong_count() > 0).count()
    }
}

const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// Redis lease shared by all instances: `SET NX PX` to take, compare-and-delete to give back.
#[derive(Clone)]
pub struct RedisLease {
    redis: ConnectionManager,
    ttl: Duration,
    wait: Duration,
}

impl RedisLease {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            ttl: Duration::from_secs(30),
            wait: Duration::from_secs(10),
        }
    }

    fn key(session_id: &str) -> String {
        format!("lock:session:{}", session_id)
    }

    async fn try_acquire(&self, key: &str, token: &str) -> anyhow::Result<bool> {
        let mut conn = self.redis.clone();
        let reply: Option<String> = track_lock_operation("acquire", async {
            redis::cmd("SET")
                .arg(key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .context("Failed to acquire session lease")
        })
        .await?;
        Ok(reply.is_some())
    }

    pub async fn acquire(&self, session_id: &str) -> AssessmentResult<(String, String)> {
        let key = Self::key(session_id);
        let token = Uuid::new_v4().to_string();
        let started = tokio::time::Instant::now();
        let mut backoff = Duration::from_millis(20);

        loop {
            if self.try_acquire(&key, &token).await? {
                return Ok((key, token));
            }
            if started.elapsed() >= self.wait {
                return Err(AssessmentError::conflict(format!(
                    "session {} is busy, retry later",
                    session_id
                )));
            }
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, Duration::from_millis(500));
        }
    }

    pub async fn release(&self, key: &str, token: &str) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        track_lock_operation("release", async {
            redis::Script::new(RELEASE_SCRIPT)
                .key(key)
                .arg(token)
                .invoke_async::<i64>(&mut conn)
                .await
                .context("Failed to release session lease")
        })
        .await?;
        Ok(())
    }
}

/// Mutual exclusion for one session: always the in-process mutex, plus the Redis
/// lease when several instances share the store.
pub struct SessionLocks {
    local: KeyedLocks,
    lease: Option<RedisLease>,
}

pub struct SessionGuard {
    _local: OwnedMutexGuard<()>,
    lease: Option<(RedisLease, String, String)>,
}

impl SessionLocks {
    pub fn new(lease: Option<RedisLease>) -> Self {
        Self {
            local: KeyedLocks::new(),
            lease,
        }
    }

    pub async fn acquire(&self, session_id: &str) -> AssessmentResult<SessionGuard> {
        let local = self.local.lock(session_id).await;
        let lease = match &self.lease {
            Some(lease) => {
                let (key, token) = lease.acquire(session_id).await?;
                Some((lease.clone(), key, token))
            }
            None => None,
        };

        Ok(SessionGuard {
            _local: local,
            lease,
        })
    }
}

impl SessionGuard {
    /// Gives the lease back; an unreleased lease expires on its own.
    pub async fn release(self) {
        if let Some((lease, key, token)) = &self.lease {
            if let Err(err) = lease.release(key, token).await {
                tracing::warn!(error = %err, "Session lease release failed; it will expire");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("session-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.lock("a").await;
            assert_eq!(locks.tracked(), 1);
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn local_only_guard_releases() {
        let locks = SessionLocks::new(None);
        let guard = locks.acquire("s").await.unwrap();
        guard.release().await;
        let again = tokio::time::timeout(Duration::from_millis(100), locks.acquire("s")).await;
        assert!(again.is_ok());
    }
}
