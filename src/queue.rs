use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};

/// Serializes work that targets the same key (a destination path, a repo URL)
/// while letting work on different keys run in parallel, up to a global cap.
/// Waiters on one key run in the order they arrived.
#[derive(Debug)]
pub struct BlockingQueue {
    max_concurrency: usize,
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct State {
    running: HashSet<String>,
    running_count: usize,
    waiting: HashMap<String, VecDeque<u64>>,
    next_ticket: u64,
}

impl BlockingQueue {
    pub fn new(max_concurrency: usize) -> BlockingQueue {
        BlockingQueue {
            max_concurrency: max_concurrency.max(1),
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    /// Run `work` once no other work for `key` is in flight. The calling
    /// thread blocks until its turn comes up. The key is released even if
    /// `work` panics, so sibling waiters never hang.
    pub fn push<T>(&self, key: &str, work: impl FnOnce() -> T) -> T {
        let _guard = self.acquire(key);
        work()
    }

    /// Claim a slot for `key` and hold it until the guard drops. For work
    /// whose lifetime outlives a closure, like a streaming response body.
    pub fn acquire<'a>(&'a self, key: &str) -> QueueGuard<'a> {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state
            .waiting
            .entry(key.to_string())
            .or_default()
            .push_back(ticket);
        loop {
            let first = state
                .waiting
                .get(key)
                .and_then(|q| q.front().copied());
            if first == Some(ticket)
                && !state.running.contains(key)
                && state.running_count < self.max_concurrency
            {
                break;
            }
            self.cond.wait(&mut state);
        }
        let emptied = {
            let q = state.waiting.get_mut(key).unwrap();
            q.pop_front();
            q.is_empty()
        };
        if emptied {
            state.waiting.remove(key);
        }
        state.running.insert(key.to_string());
        state.running_count += 1;
        QueueGuard {
            queue: self,
            key: key.to_string(),
        }
    }
}

pub struct QueueGuard<'a> {
    queue: &'a BlockingQueue,
    key: String,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        state.running.remove(&self.key);
        state.running_count -= 1;
        drop(state);
        self.queue.cond.notify_all();
    }
}
