//! Bounded object queue: a FIFO with blocking get, abort, and per-item
//! put/get/cleanup/purge hooks, grounded directly in `groove_queue` from
//! `examples/original_source/src/queue.c`.
//!
//! The queue itself does no lifetime management of its items. `cleanup` (via
//! [`QueueHooks::cleanup`]) is responsible for that, exactly as in the C
//! original. Ordering guarantee: a single producer's `put`s are observed by a
//! single consumer in the order issued (backed by a `VecDeque`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// Extension points a queue's owner implements to track per-item bookkeeping
/// (e.g. a sink's byte-fill counter) without the queue itself knowing about it.
///
/// Mirrors the `put`/`get`/`cleanup` function pointers on `GrooveQueue`,
/// modeled here as a capability/trait set the queue's owner implements.
pub trait QueueHooks<T>: Send + Sync {
    /// Called with the item just appended, while the queue lock is held.
    fn on_put(&self, _item: &T) {}
    /// Called with the item about to be returned to the caller, while the
    /// queue lock is held.
    fn on_get(&self, _item: &T) {}
    /// Called for each item removed by `flush` or `purge`. Responsible for
    /// releasing any resources the item holds.
    fn cleanup(&self, _item: T) {}
}

/// No-op hook set, for queues that need no per-item bookkeeping.
pub struct NoHooks;
impl<T> QueueHooks<T> for NoHooks {}

/// Outcome of a blocking or non-blocking `get`/`peek`.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    /// An item was available (and, for `get`, removed).
    Item(T),
    /// The queue was aborted; no item was returned.
    Aborted,
    /// Non-blocking call found the queue empty.
    Empty,
}

struct State<T> {
    items: VecDeque<T>,
    abort_request: bool,
}

/// A bounded FIFO with abort/flush/purge semantics.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
    hooks: Box<dyn QueueHooks<T>>,
    // Fast abort check outside the lock, matching `groove_queue_abort`'s intent
    // of waking every blocked waiter promptly.
    aborted: AtomicBool,
}

impl<T> BoundedQueue<T> {
    pub fn new(hooks: Box<dyn QueueHooks<T>>) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                abort_request: false,
            }),
            cond: Condvar::new(),
            hooks,
            aborted: AtomicBool::new(false),
        }
    }

    /// Append `item`, invoke the `put` hook, and wake one waiter.
    pub fn put(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        self.hooks.on_put(&item);
        state.items.push_back(item);
        self.cond.notify_one();
    }

    /// Pop the head item. Blocks on an empty, non-aborted queue when `block`
    /// is true.
    pub fn get(&self, block: bool) -> Popped<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.abort_request {
                return Popped::Aborted;
            }
            if let Some(item) = state.items.pop_front() {
                self.hooks.on_get(&item);
                return Popped::Item(item);
            }
            if !block {
                return Popped::Empty;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Like `get` but does not remove the item; `f` inspects the front item
    /// while the lock is held.
    pub fn peek<R>(&self, block: bool, f: impl FnOnce(&T) -> R) -> Popped<R> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.abort_request {
                return Popped::Aborted;
            }
            if let Some(item) = state.items.front() {
                return Popped::Item(f(item));
            }
            if !block {
                return Popped::Empty;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// True if any item currently in the queue satisfies `predicate`. Unlike
    /// `peek`, this scans the whole queue rather than just the front, so it
    /// can answer questions about items still sitting behind undrained ones.
    pub fn any(&self, predicate: impl Fn(&T) -> bool) -> bool {
        let state = self.state.lock().unwrap();
        state.items.iter().any(predicate)
    }

    /// Remove every item, calling `cleanup` on each.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        for item in state.items.drain(..) {
            self.hooks.cleanup(item);
        }
    }

    /// Remove every item for which `predicate` returns true, calling
    /// `cleanup` on each, in a single pass that preserves survivor order
    /// (matching `groove_queue_purge`'s single-pass splice).
    pub fn purge(&self, predicate: impl Fn(&T) -> bool) {
        let mut state = self.state.lock().unwrap();
        let items = std::mem::take(&mut state.items);
        let hooks = &self.hooks;
        state.items = items
            .into_iter()
            .filter_map(|item| {
                if predicate(&item) {
                    hooks.cleanup(item);
                    None
                } else {
                    Some(item)
                }
            })
            .collect();
    }

    /// Cause every blocked (and future) `get`/`peek` to return `Aborted`
    /// until [`reset`](Self::reset) is called.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        state.abort_request = true;
        self.aborted.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    /// Clear the abort flag set by [`abort`](Self::abort).
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.abort_request = false;
        self.aborted.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
