//! Keyed debouncer for coalescing rapid edits into one outbound command.
//!
//! Arming a key (re)starts its quiet-period timer; when the timer fires the
//! key is cleared first and only then is the action run, so an edit that
//! arrives while the action is in flight arms a fresh timer.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

struct Armed {
    generation: u64,
    handle: AbortHandle,
}

struct Inner<K> {
    armed: HashMap<K, Armed>,
    next_generation: u64,
}

pub struct Debouncer<K> {
    delay: Duration,
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K> Clone for Debouncer<K> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            inner: self.inner.clone(),
        }
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: Arc::new(Mutex::new(Inner {
                armed: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `action` for `key`, replacing whatever was armed for it.
    pub fn arm<F>(&self, key: K, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = lock(&self.inner);
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let delay = self.delay;
        let shared = self.inner.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = lock(&shared);
                match inner.armed.get(&task_key) {
                    Some(armed) if armed.generation == generation => {
                        inner.armed.remove(&task_key);
                    }
                    _ => return,
                }
            }
            debug!(key = ?task_key, "debounced action firing");
            action.await;
        })
        .abort_handle();

        if let Some(previous) = inner.armed.insert(key, Armed { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop the pending action for `key`. Returns whether one was armed.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.inner).armed.remove(key) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, armed) in lock(&self.inner).armed.drain() {
            armed.handle.abort();
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        lock(&self.inner).armed.contains_key(key)
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner).armed.len()
    }
}

fn lock<K>(inner: &Mutex<Inner<K>>) -> std::sync::MutexGuard<'_, Inner<K>> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
