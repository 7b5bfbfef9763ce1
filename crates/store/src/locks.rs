use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutual exclusion keyed by path.
///
/// Appends to one chunk file are serialized; different chunk files never
/// contend. Entries are dropped once no guard or waiter holds them.
#[derive(Debug, Default)]
pub(crate) struct PathLocks {
    inner: std::sync::Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>,
}

impl PathLocks {
    pub(crate) async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, weak| weak.strong_count() > 0);
            match map.get(path).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let created = Arc::new(Mutex::new(()));
                    map.insert(path.to_path_buf(), Arc::downgrade(&created));
                    created
                }
            }
        };
        mutex.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, weak| weak.strong_count() > 0);
        map.len()
    }

    /// Guards plus waiters currently holding the lock for `path`.
    #[cfg(test)]
    pub(crate) fn holders(&self, path: &Path) -> usize {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(path).map_or(0, Weak::strong_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::default());
        let guard = locks.lock(Path::new("a")).await;

        let l2 = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = l2.lock(Path::new("a")).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_paths_do_not_contend() {
        let locks = PathLocks::default();
        let _a = locks.lock(Path::new("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Path::new("b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn holders_counts_guard_and_waiter() {
        let locks = Arc::new(PathLocks::default());
        let guard = locks.lock(Path::new("a")).await;
        assert_eq!(locks.holders(Path::new("a")), 1);

        let l2 = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = l2.lock(Path::new("a")).await;
        });
        while locks.holders(Path::new("a")) < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.holders(Path::new("a")), 0);
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = PathLocks::default();
        {
            let _a = locks.lock(Path::new("a")).await;
            let _b = locks.lock(Path::new("b")).await;
            assert_eq!(locks.tracked(), 2);
        }
        assert_eq!(locks.tracked(), 0);
    }
}
