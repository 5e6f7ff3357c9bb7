//! Destination locks shared by competing polling consumers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Proof of a held destination lock; released on drop
pub struct LockClaim {
    _held: Box<dyn Send + Sync>,
}

impl LockClaim {
    pub fn new(held: impl Send + Sync + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl std::fmt::Debug for LockClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LockClaim")
    }
}

/// Exclusive right to poll a destination
#[async_trait]
pub trait DestinationLock: Send + Sync {
    /// Claim without waiting; `None` when someone else holds it
    async fn try_acquire(&self) -> Option<LockClaim>;
}

/// In-process lock; clone it to share between consumers
#[derive(Debug, Clone, Default)]
pub struct LocalDestinationLock {
    inner: Arc<Mutex<()>>,
}

impl LocalDestinationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[async_trait]
impl DestinationLock for LocalDestinationLock {
    async fn try_acquire(&self) -> Option<LockClaim> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(LockClaim::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_lock_is_exclusive() {
        let lock = LocalDestinationLock::new();
        let shared = lock.clone();

        let claim = lock.try_acquire().await.expect("free lock");
        assert!(shared.is_held());
        assert!(shared.try_acquire().await.is_none());

        drop(claim);
        assert!(!lock.is_held());
        assert!(shared.try_acquire().await.is_some());
    }
}
