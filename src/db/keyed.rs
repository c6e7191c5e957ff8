use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of independently lockable values, created lazily per key.
///
/// Holding the guard for one key never blocks callers of another key.
/// Entries are never removed; the key space here is bounded by the number of
/// databases / entities on the server.
pub struct KeyedMutex<T> {
    entries: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Default> KeyedMutex<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<T> {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.entry(key.to_string()).or_default().clone()
        };
        entry.lock_owned().await
    }

    #[cfg(test)]
    pub async fn key_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl<T: Default> Default for KeyedMutex<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks: Arc<KeyedMutex<u32>> = Arc::new(KeyedMutex::new());

        let mut first = locks.lock("customer_42").await;
        *first += 1;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let mut guard = locks.lock("customer_42").await;
                *guard += 1;
                *guard
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        assert_eq!(contender.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks: KeyedMutex<()> = KeyedMutex::new();
        let _a = locks.lock("customer_1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("customer_2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.key_count().await, 2);
    }
}
