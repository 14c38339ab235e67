//! Keyed single-flight: concurrent calls under one key share one execution.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs subscribe to its result. Once the leader finishes,
//! the key is free again and the next call starts a new execution.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

pub struct Group<K, T> {
    calls: Mutex<HashMap<K, broadcast::Sender<T>>>,
}

impl<K, T> Default for Group<K, T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> Group<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` under `key`, or wait for the execution already running.
    ///
    /// If the leader is dropped before finishing, one of its waiters takes
    /// over and runs its own `work`.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let sender = loop {
            let mut receiver = {
                let mut calls = self.lock();
                match calls.get(&key) {
                    Some(sender) => sender.subscribe(),
                    None => {
                        let (sender, _) = broadcast::channel(1);
                        calls.insert(key.clone(), sender.clone());
                        break sender;
                    }
                }
            };

            match receiver.recv().await {
                Ok(value) => return value,
                // leader went away without a result
                Err(_) => continue,
            }
        };

        let flight = Flight { group: self, key };
        let value = work().await;
        drop(flight);

        // no subscribers is fine
        let _ = sender.send(value.clone());
        value
    }

    /// Number of keys with an execution in progress.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, broadcast::Sender<T>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the leader's key on completion or cancellation.
struct Flight<'a, K: Hash + Eq + Clone, T: Clone> {
    group: &'a Group<K, T>,
    key: K,
}

impl<K: Hash + Eq + Clone, T: Clone> Drop for Flight<'_, K, T> {
    fn drop(&mut self) {
        self.group.lock().remove(&self.key);
    }
}
