use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

struct State<T> {
    queue: VecDeque<T>,
    /// Queued or waiting to be re-queued once processing ends.
    dirty: HashSet<T>,
    processing: HashSet<T>,
    requeues: HashMap<T, u32>,
    shutting_down: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

/// A de-duplicating, rate-limited work queue.
///
/// An item is handed to at most one consumer at a time. Adding an item that
/// is already queued is a no-op; adding one that is being processed queues
/// it again once [`WorkQueue::done`] is called.
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self::with_backoff(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    pub fn with_backoff(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    requeues: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                base_delay,
                max_delay,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, item: T) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Wait for the next item. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Mark an item as no longer being processed.
    pub fn done(&self, item: &T) {
        let mut state = self.state();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Delay before the next retry of an item that has been requeued `requeues` times.
    pub fn backoff(&self, requeues: u32) -> Duration {
        let factor = 1u32.checked_shl(requeues.min(31)).unwrap_or(u32::MAX);
        self.shared
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.shared.max_delay)
            .min(self.shared.max_delay)
    }

    /// Re-add after the item's current backoff, and count the requeue.
    pub fn add_rate_limited(&self, item: T) {
        let requeues = {
            let mut state = self.state();
            let count = state.requeues.entry(item.clone()).or_insert(0);
            let previous = *count;
            *count += 1;
            previous
        };
        self.add_after(item, self.backoff(requeues));
    }

    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Stop tracking retries for the item.
    pub fn forget(&self, item: &T) {
        self.state().requeues.remove(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.state().requeues.get(item).copied().unwrap_or(0)
    }

    /// Refuse new items and wake every waiter. Items still queued are dropped.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.shared.notify.notify_waiters();
        self.shared.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Items waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
