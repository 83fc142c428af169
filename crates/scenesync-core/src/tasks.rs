//! Cancel-and-replace scheduled tasks.
//!
//! One slot per key: scheduling work for a key aborts whatever was pending
//! for that key, so at most one task per key is ever in flight. Server cursor
//! writes, debounced object updates and client interpolation drivers all go
//! through this.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct KeyedTasks<K> {
    tasks: HashMap<K, JoinHandle<()>>,
}

impl<K> Default for KeyedTasks<K> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }
}

impl<K: Debug> Debug for KeyedTasks<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedTasks")
            .field("keys", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K> KeyedTasks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` for `key`, aborting any task already running for it.
    ///
    /// Returns true if a still-running task was replaced.
    pub fn replace<F>(&mut self, key: K, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        match self.tasks.insert(key, handle) {
            Some(prev) => {
                let was_running = !prev.is_finished();
                prev.abort();
                was_running
            }
            None => false,
        }
    }

    /// Debounce: run `fut` after `delay` unless replaced first
    pub fn schedule<F>(&mut self, key: K, delay: Duration, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.replace(key, async move {
            tokio::time::sleep(delay).await;
            fut.await;
        })
    }

    /// Abort the task for `key`. Returns true if one was still running.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.tasks.remove(key) {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                was_running
            }
            None => false,
        }
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Number of tasks still running. Drops finished handles.
    pub fn active_count(&mut self) -> usize {
        self.prune();
        self.tasks.len()
    }

    pub fn prune(&mut self) {
        self.tasks.retain(|_, h| !h.is_finished());
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl<K> Drop for KeyedTasks<K> {
    fn drop(&mut self) {
        for handle in self.tasks.values() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn schedule_collapses_to_last_value() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = KeyedTasks::new();

        for i in 0..30 {
            let tx = tx.clone();
            tasks.schedule("obj", Duration::from_millis(16), async move {
                let _ = tx.send(i);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        tasks.prune();

        let mut fired = Vec::new();
        while let Some(v) = rx.recv().await {
            fired.push(v);
        }
        assert_eq!(fired, vec![29]);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut tasks = KeyedTasks::new();
        for key in ["a", "b", "c"] {
            let count = count.clone();
            tasks.schedule(key, Duration::from_millis(10), async move {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(tasks.active_count(), 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn replace_reports_running_predecessor_and_cancel_stops_it() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut tasks = KeyedTasks::new();

        let c = count.clone();
        assert!(!tasks.schedule(1u32, Duration::from_millis(10), async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let c = count.clone();
        assert!(tasks.schedule(1u32, Duration::from_millis(10), async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(tasks.is_active(&1));
        assert!(tasks.cancel(&1));
        assert!(!tasks.is_active(&1));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
