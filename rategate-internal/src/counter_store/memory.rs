use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::counter_store::{CounterSnapshot, CounterStore, EvalOutcome};
use crate::error::{Error, ErrorDetails};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn count(&self) -> u64 {
        self.value.parse().unwrap_or(0)
    }

    fn residual_ttl(&self, now: Instant) -> i64 {
        match self.expires_at {
            None => -1,
            Some(at) => at.saturating_duration_since(now).as_secs() as i64,
        }
    }
}

/// In-process counter store with the same contract as the Redis backend:
/// one mutex held across the whole check-and-increment stands in for Redis's
/// single-threaded script execution. Used by tests and local development.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a `CounterStore` error, simulating a
    /// store outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorDetails::CounterStore {
                message: "connection refused".to_string(),
            }));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned mutex means a panic elsewhere; tests should fail loudly.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn matches(pattern: &str, key: &str) -> bool {
        // Only the trailing-star form is used by the key layout.
        match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_and_increment(
        &self,
        keys: &[String],
        ceilings: &[u64],
        ttls: &[i64],
    ) -> Result<EvalOutcome, Error> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.lock();

        for (index, key) in keys.iter().enumerate() {
            let current = entries
                .get(key)
                .filter(|e| !e.is_expired(now))
                .map(Entry::count)
                .unwrap_or(0);
            if current >= ceilings[index] {
                let retry_after_seconds = entries
                    .get(key)
                    .filter(|e| !e.is_expired(now))
                    .map(|e| e.residual_ttl(now))
                    .filter(|ttl| *ttl >= 0)
                    .unwrap_or(ttls[index]);
                return Ok(EvalOutcome::Denied {
                    failed_index: index,
                    current,
                    ceiling: ceilings[index],
                    retry_after_seconds,
                });
            }
        }

        let mut counts = Vec::with_capacity(keys.len());
        let mut max_ttl_seconds = 0;
        for (index, key) in keys.iter().enumerate() {
            let entry = entries.get(key).filter(|e| !e.is_expired(now)).cloned();
            let new_count = match entry {
                Some(existing) => {
                    let count = existing.count() + 1;
                    entries.insert(
                        key.clone(),
                        Entry {
                            value: count.to_string(),
                            expires_at: existing.expires_at,
                        },
                    );
                    count
                }
                None => {
                    entries.insert(
                        key.clone(),
                        Entry {
                            value: "1".to_string(),
                            expires_at: Some(now + Duration::from_secs(ttls[index].max(0) as u64)),
                        },
                    );
                    1
                }
            };
            counts.push(new_count);
            max_ttl_seconds = max_ttl_seconds.max(ttls[index]);
        }

        Ok(EvalOutcome::Admitted {
            counts,
            max_ttl_seconds,
        })
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, Error> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .lock()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn set_value(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), Error> {
        self.check_available()?;
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds.max(1) as u64)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, Error> {
        self.check_available()?;
        Ok(u64::from(self.lock().remove(key).is_some()))
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, Error> {
        self.check_available()?;
        let mut entries = self.lock();
        let doomed: Vec<String> = entries
            .keys()
            .filter(|key| Self::matches(pattern, key))
            .cloned()
            .collect();
        let removed = doomed.len() as u64;
        for key in doomed {
            entries.remove(&key);
        }
        Ok(removed)
    }

    async fn peek_counter(&self, key: &str) -> Result<Option<CounterSnapshot>, Error> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .lock()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| CounterSnapshot {
                count: e.count(),
                ttl_seconds: e.residual_ttl(now),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_or_nothing_increment() {
        let store = MemoryCounterStore::new();
        let ks = keys(&["a", "b"]);

        let outcome = store.check_and_increment(&ks, &[2, 2], &[60, 60]).await.unwrap();
        assert_eq!(
            outcome,
            EvalOutcome::Admitted {
                counts: vec![1, 1],
                max_ttl_seconds: 60
            }
        );

        // Exhaust key "b" only.
        store.check_and_increment(&ks[1..], &[2], &[60]).await.unwrap();

        // "b" is at its ceiling, so "a" must not move either.
        let outcome = store.check_and_increment(&ks, &[2, 2], &[60, 60]).await.unwrap();
        match outcome {
            EvalOutcome::Denied {
                failed_index,
                current,
                ceiling,
                ..
            } => {
                assert_eq!(failed_index, 1);
                assert_eq!(current, 2);
                assert_eq!(ceiling, 2);
            }
            other => panic!("expected denial, got {other:?}"),
        }
        let snapshot = store.peek_counter("a").await.unwrap().unwrap();
        assert_eq!(snapshot.count, 1);
    }

    #[tokio::test]
    async fn test_ttl_set_once() {
        let store = MemoryCounterStore::new();
        let ks = keys(&["k"]);
        store.check_and_increment(&ks, &[10], &[60]).await.unwrap();
        let first = store.peek_counter("k").await.unwrap().unwrap();
        store.check_and_increment(&ks, &[10], &[60]).await.unwrap();
        let second = store.peek_counter("k").await.unwrap().unwrap();
        assert_eq!(second.count, 2);
        assert!(second.ttl_seconds <= first.ttl_seconds);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryCounterStore::new();
        store.set_unavailable(true);
        let result = store.check_and_increment(&keys(&["k"]), &[1], &[60]).await;
        assert!(result.is_err());
        store.set_unavailable(false);
        assert!(store.get_value("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_matching_prefix() {
        let store = MemoryCounterStore::new();
        store.set_value("rl:c:x:m:202608", "5", 60).await.unwrap();
        store.set_value("rl:c:x:w:100", "3", 60).await.unwrap();
        store.set_value("rl:g:m:202608", "9", 60).await.unwrap();
        let removed = store.delete_matching("rl:c:x:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_value("rl:g:m:202608").await.unwrap().is_some());
    }
}
