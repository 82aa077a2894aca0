use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex as TokioMutex, RwLock};

use courier_core::SessionKey;

/// Registry of per-session run locks.
///
/// Each session key owns one lock; holding it grants exclusive access to
/// that session's state. Unrelated sessions never contend — there is no
/// global lock on the hot path, only a short registry lookup. Every entry
/// point into a session (inbound events, scheduler invocations) serializes
/// through the same lock, which is what gives in-order turn processing
/// within a session without any source-specific special-casing.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<RwLock<HashMap<SessionKey, Arc<TokioMutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for a session key, creating it on first use.
    pub async fn acquire(&self, key: &SessionKey) -> Arc<TokioMutex<()>> {
        // Fast path: the lock already exists.
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(key) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.locks.write().await;
        // Opportunistic sweep: drop entries nobody else holds.
        if locks.len() > 64 {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(TokioMutex::new(()))),
        )
    }

    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_yields_the_same_lock() {
        let locks = SessionLocks::new();
        let key = SessionKey::new("telegram", "chat-1");

        let a = locks.acquire(&key).await;
        let b = locks.acquire(&key).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = SessionLocks::new();
        let a = locks.acquire(&SessionKey::new("telegram", "a")).await;
        let b = locks.acquire(&SessionKey::new("telegram", "b")).await;

        let _ga = a.lock().await;
        // Holding A's lock must not block B's.
        let gb = tokio::time::timeout(Duration::from_millis(100), b.lock()).await;
        assert!(gb.is_ok());
    }

    #[tokio::test]
    async fn unused_locks_are_swept_once_the_registry_grows() {
        let locks = SessionLocks::new();
        for i in 0..100 {
            let _ = locks.acquire(&SessionKey::new("telegram", format!("c{i}"))).await;
        }
        // The sweep runs on the write path; acquiring one more key triggers it.
        let _held = locks.acquire(&SessionKey::new("telegram", "held")).await;
        assert!(locks.len().await <= 66);
    }
}
