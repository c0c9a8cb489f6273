use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Trailing-edge debouncer keyed per entity.
///
/// Scheduling replaces whatever was pending for the same key, so only the
/// latest action fires once the key has been quiet for the window. An action
/// that has already fired runs to completion; cancelling only drops actions
/// that have not fired yet.
pub struct Debouncer<K> {
    window: Duration,
    timers: HashMap<K, JoinHandle<()>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timers: HashMap::new(),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&mut self, key: K, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.timers.retain(|_, handle| !handle.is_finished());

        if let Some(previous) = self.timers.remove(&key) {
            previous.abort();
            debug!(?key, "Replaced pending debounced action");
        }

        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // Detach so a later cancel cannot interrupt an action in flight.
            tokio::spawn(action);
        });
        self.timers.insert(key, handle);
    }

    /// Drops the pending action for `key`. Returns whether one was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Drops every pending action. Returns how many were pending.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for (_, handle) in self.timers.drain() {
            if !handle.is_finished() {
                handle.abort();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending debounced actions");
        }
        cancelled
    }

    pub fn pending(&self) -> usize {
        self.timers
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn recorder() -> Arc<Mutex<Vec<(String, u32)>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Arc<Mutex<Vec<(String, u32)>>>, key: &str, value: u32) -> impl Future<Output = ()> {
        let log = log.clone();
        let key = key.to_string();
        async move {
            log.lock().await.push((key, value));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_schedules_collapse_to_latest_value() {
        let log = recorder();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        for value in 1..=5 {
            debouncer.schedule("alice".to_string(), record(&log, "alice", value));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(log.lock().await.is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*log.lock().await, vec![("alice".to_string(), 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_debounced_independently() {
        let log = recorder();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        debouncer.schedule("alice".to_string(), record(&log, "alice", 1));
        debouncer.schedule("bob".to_string(), record(&log, "bob", 2));
        assert_eq!(debouncer.pending(), 2);

        tokio::time::sleep(Duration::from_millis(600)).await;

        let mut fired = log.lock().await.clone();
        fired.sort();
        assert_eq!(fired, vec![("alice".to_string(), 1), ("bob".to_string(), 2)]);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_actions_never_fire() {
        let log = recorder();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        debouncer.schedule("alice".to_string(), record(&log, "alice", 1));
        debouncer.schedule("bob".to_string(), record(&log, "bob", 2));
        assert!(debouncer.cancel(&"alice".to_string()));
        assert!(!debouncer.cancel(&"carol".to_string()));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*log.lock().await, vec![("bob".to_string(), 2)]);

        debouncer.schedule("bob".to_string(), record(&log, "bob", 3));
        assert_eq!(debouncer.cancel_all(), 1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(log.lock().await.len(), 1);
    }
}
