//! Session lock: strict insert-if-absent mutual exclusion around the AI call for one
//! conversation. A second message arriving while a reply is being generated is dropped.

use crate::channels::ConversationKey;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait SessionLockStore: Send + Sync {
    /// Insert `key` if absent. `false` when it is already held.
    async fn try_insert(&self, key: &ConversationKey) -> Result<bool>;
    async fn remove(&self, key: &ConversationKey) -> Result<()>;
}

pub struct InMemorySessionLockStore {
    held: Arc<Mutex<HashSet<ConversationKey>>>,
}

impl Default for InMemorySessionLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionLockStore {
    pub fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn is_held(&self, key: &ConversationKey) -> bool {
        self.held.lock().await.contains(key)
    }
}

#[async_trait]
impl SessionLockStore for InMemorySessionLockStore {
    async fn try_insert(&self, key: &ConversationKey) -> Result<bool> {
        Ok(self.held.lock().await.insert(key.clone()))
    }

    async fn remove(&self, key: &ConversationKey) -> Result<()> {
        self.held.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct SessionLock {
    store: Arc<dyn SessionLockStore>,
}

impl SessionLock {
    pub fn new(store: Arc<dyn SessionLockStore>) -> Self {
        Self { store }
    }

    /// Non-blocking acquire. `None` when another attempt holds the conversation.
    pub async fn try_acquire(&self, key: &ConversationKey) -> Result<Option<SessionGuard>> {
        if !self.store.try_insert(key).await? {
            return Ok(None);
        }
        Ok(Some(SessionGuard {
            lock: self.clone(),
            key: key.clone(),
            released: false,
        }))
    }

    pub async fn release(&self, key: &ConversationKey) -> Result<()> {
        self.store.remove(key).await
    }
}

/// Held session lock. Same release contract as the execution permit.
pub struct SessionGuard {
    lock: SessionLock,
    key: ConversationKey,
    released: bool,
}

impl SessionGuard {
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.lock.release(&self.key).await {
            log::warn!("guard: releasing session lock for {} failed: {}", self.key, e);
        }
    }

    /// Run `fut` under the lock, release on every exit path, re-raise a panic afterwards.
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

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = self.lock.clone();
        let key = self.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release(&key).await {
                        log::warn!("guard: deferred session release for {} failed: {}", key, e);
                    }
                });
            }
            Err(_) => log::warn!("guard: session lock for {} dropped outside a runtime", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::new("dev", "60123456789")
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let lock = SessionLock::new(Arc::new(InMemorySessionLockStore::new()));
        let guard = lock.try_acquire(&key()).await.unwrap().expect("first");
        assert!(lock.try_acquire(&key()).await.unwrap().is_none());
        guard.release().await;
        assert!(lock.try_acquire(&key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scope_releases_after_error_and_panic() {
        let store = Arc::new(InMemorySessionLockStore::new());
        let lock = SessionLock::new(store.clone());

        let guard = lock.try_acquire(&key()).await.unwrap().unwrap();
        let res: Result<(), &str> = guard.scope(async { Err("ai down") }).await;
        assert!(res.is_err());
        assert!(!store.is_held(&key()).await);

        let guard = lock.try_acquire(&key()).await.unwrap().unwrap();
        let caught = AssertUnwindSafe(guard.scope(async { panic!("engine crashed") }))
            .catch_unwind()
            .await;
        assert!(caught.is_err());
        assert!(!store.is_held(&key()).await);
    }
}
