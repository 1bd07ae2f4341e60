//! Execution lock: an append-only token log per conversation where the oldest live token wins.
//!
//! Every webhook delivery appends a token. Retried deliveries of the same physical message race
//! each other; only the attempt holding the oldest token proceeds, the others return as no-ops.
//! The winner clears every token for the key when it finishes.

use crate::channels::ConversationKey;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use futures_util::FutureExt;

/// One in-flight processing attempt. `seq` is assigned by the store and orders tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionToken {
    pub id: Uuid,
    pub key: ConversationKey,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

/// Token log backing the execution lock.
///
/// `insert` must make a token visible to `oldest` before returning, and `seq` must grow with
/// insertion order. A shared store implements `oldest` as an ordered read under the same
/// isolation as the insert.
#[async_trait]
pub trait ExecutionLockStore: Send + Sync {
    async fn insert(&self, key: &ConversationKey) -> Result<ExecutionToken>;
    async fn oldest(&self, key: &ConversationKey) -> Result<Option<ExecutionToken>>;
    /// Remove one token; false when it was already gone.
    async fn delete(&self, token: &ExecutionToken) -> Result<bool>;
    /// Remove every token for `key`; returns how many were removed.
    async fn delete_all(&self, key: &ConversationKey) -> Result<usize>;
}

/// Single-process token log.
pub struct InMemoryExecutionLockStore {
    next_seq: AtomicU64,
    inner: Arc<Mutex<HashMap<ConversationKey, Vec<ExecutionToken>>>>,
}

impl Default for InMemoryExecutionLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExecutionLockStore {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Live tokens for `key`.
    pub async fn len(&self, key: &ConversationKey) -> usize {
        self.inner.lock().await.get(key).map_or(0, Vec::len)
    }
}

#[async_trait]
impl ExecutionLockStore for InMemoryExecutionLockStore {
    async fn insert(&self, key: &ConversationKey) -> Result<ExecutionToken> {
        let mut g = self.inner.lock().await;
        // seq is taken under the lock so insertion order and seq order agree.
        let token = ExecutionToken {
            id: Uuid::new_v4(),
            key: key.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
        };
        g.entry(key.clone()).or_default().push(token.clone());
        Ok(token)
    }

    async fn oldest(&self, key: &ConversationKey) -> Result<Option<ExecutionToken>> {
        let g = self.inner.lock().await;
        Ok(g.get(key)
            .and_then(|tokens| tokens.iter().min_by_key(|t| t.seq))
            .cloned())
    }

    async fn delete(&self, token: &ExecutionToken) -> Result<bool> {
        let mut g = self.inner.lock().await;
        let Some(tokens) = g.get_mut(&token.key) else {
            return Ok(false);
        };
        let before = tokens.len();
        tokens.retain(|t| t.id != token.id);
        let removed = tokens.len() < before;
        if tokens.is_empty() {
            g.remove(&token.key);
        }
        Ok(removed)
    }

    async fn delete_all(&self, key: &ConversationKey) -> Result<usize> {
        Ok(self.inner.lock().await.remove(key).map_or(0, |v| v.len()))
    }
}

/// Execution lock over an injected token store.
#[derive(Clone)]
pub struct ExecutionLock {
    store: Arc<dyn ExecutionLockStore>,
}

impl ExecutionLock {
    pub fn new(store: Arc<dyn ExecutionLockStore>) -> Self {
        Self { store }
    }

    /// Append a token for `key`. Never blocks on other attempts.
    pub async fn acquire(&self, key: &ConversationKey) -> Result<ExecutionToken> {
        self.store.insert(key).await
    }

    /// True when `token` is the oldest live token for its key.
    pub async fn is_oldest(&self, token: &ExecutionToken) -> Result<bool> {
        Ok(self
            .store
            .oldest(&token.key)
            .await?
            .map_or(false, |oldest| oldest.id == token.id))
    }

    pub async fn release_all(&self, key: &ConversationKey) -> Result<()> {
        let removed = self.store.delete_all(key).await?;
        log::debug!("guard: released {} execution token(s) for {}", removed, key);
        Ok(())
    }

    /// Append a token and check it. `Some(permit)` when this attempt won the race; `None` when an
    /// older attempt for the same key is live (or already finished and cleared ours).
    pub async fn enter(&self, key: &ConversationKey) -> Result<Option<ExecutionPermit>> {
        let token = self.acquire(key).await?;
        let won = match self.is_oldest(&token).await {
            Ok(won) => won,
            Err(e) => {
                // Undecided attempts must not leave a token that would outrank every later one.
                if let Err(del) = self.store.delete(&token).await {
                    log::warn!("guard: dropping token {} for {} failed: {}", token.seq, key, del);
                }
                return Err(e);
            }
        };
        if !won {
            log::debug!("guard: {} lost the execution race (token {})", key, token.seq);
            return Ok(None);
        }
        Ok(Some(ExecutionPermit {
            lock: self.clone(),
            token,
            released: false,
        }))
    }
}

/// Proof of winning the execution race. Clears every token for the key on release; dropping an
/// unreleased permit schedules the same cleanup on the runtime.
pub struct ExecutionPermit {
    lock: ExecutionLock,
    token: ExecutionToken,
    released: bool,
}

impl ExecutionPermit {
    pub fn token(&self) -> &ExecutionToken {
        &self.token
    }

    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.lock.release_all(&self.token.key).await {
            log::warn!("guard: releasing execution tokens for {} failed: {}", self.token.key, e);
        }
    }

    /// Run `fut` while holding the permit and release it on every exit path. A panic inside
    /// `fut` is re-raised after the release.
    pub async fn scope<F, T>(self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(fut).catch_unwind().await;
        self.release().await;
        match outcome {
            Ok(v) => v,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = self.lock.clone();
        let key = self.token.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release_all(&key).await {
                        log::warn!("guard: deferred release for {} failed: {}", key, e);
                    }
                });
            }
            Err(_) => log::warn!("guard: execution permit for {} dropped outside a runtime", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::new("dev", "60123456789")
    }

    fn lock() -> (ExecutionLock, Arc<InMemoryExecutionLockStore>) {
        let store = Arc::new(InMemoryExecutionLockStore::new());
        (ExecutionLock::new(store.clone()), store)
    }

    #[tokio::test]
    async fn first_token_is_oldest() {
        let (lock, _) = lock();
        let a = lock.acquire(&key()).await.unwrap();
        let b = lock.acquire(&key()).await.unwrap();
        assert!(a.seq < b.seq);
        assert!(lock.is_oldest(&a).await.unwrap());
        assert!(!lock.is_oldest(&b).await.unwrap());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let (lock, _) = lock();
        let _a = lock.enter(&key()).await.unwrap().expect("winner");
        let other = ConversationKey::new("dev", "60199999999");
        assert!(lock.enter(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_entry_loses_until_release() {
        let (lock, store) = lock();
        let winner = lock.enter(&key()).await.unwrap().expect("winner");
        assert!(lock.enter(&key()).await.unwrap().is_none());
        assert_eq!(store.len(&key()).await, 2);
        winner.release().await;
        assert_eq!(store.len(&key()).await, 0);
        assert!(lock.enter(&key()).await.unwrap().is_some());
    }

    /// Delegates to the in-memory log but fails the first `oldest` read.
    struct FlakyOldest {
        inner: InMemoryExecutionLockStore,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ExecutionLockStore for FlakyOldest {
        async fn insert(&self, key: &ConversationKey) -> Result<ExecutionToken> {
            self.inner.insert(key).await
        }

        async fn oldest(&self, key: &ConversationKey) -> Result<Option<ExecutionToken>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                anyhow::bail!("store unavailable");
            }
            self.inner.oldest(key).await
        }

        async fn delete(&self, token: &ExecutionToken) -> Result<bool> {
            self.inner.delete(token).await
        }

        async fn delete_all(&self, key: &ConversationKey) -> Result<usize> {
            self.inner.delete_all(key).await
        }
    }

    #[tokio::test]
    async fn failed_oldest_check_drops_its_token() {
        let store = Arc::new(FlakyOldest {
            inner: InMemoryExecutionLockStore::new(),
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let lock = ExecutionLock::new(store.clone());
        assert!(lock.enter(&key()).await.is_err());
        assert_eq!(store.inner.len(&key()).await, 0);
        assert!(lock.enter(&key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_only_that_token() {
        let (lock, store) = lock();
        let a = lock.acquire(&key()).await.unwrap();
        let b = lock.acquire(&key()).await.unwrap();
        assert!(store.delete(&a).await.unwrap());
        assert!(!store.delete(&a).await.unwrap());
        assert!(lock.is_oldest(&b).await.unwrap());
    }

    #[tokio::test]
    async fn scope_releases_on_panic() {
        let (lock, store) = lock();
        let permit = lock.enter(&key()).await.unwrap().expect("winner");
        let res = AssertUnwindSafe(permit.scope(async { panic!("boom") }))
            .catch_unwind()
            .await;
        assert!(res.is_err());
        assert_eq!(store.len(&key()).await, 0);
    }

    #[tokio::test]
    async fn dropped_permit_releases_in_background() {
        let (lock, store) = lock();
        drop(lock.enter(&key()).await.unwrap().expect("winner"));
        for _ in 0..50 {
            if store.len(&key()).await == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("tokens were not released after drop");
    }
}
