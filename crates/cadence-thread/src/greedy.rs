//! Greedy locks: non-blocking ownership used to arbitrate between threads.
//!
//! A thread that wants exclusive use of a resource for a while takes the
//! lock greedily. Other threads never block on it; a thread that registered
//! the lock skips its run for any tic where someone else holds it.

use crate::node::ThreadNode;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;

#[derive(Debug, Default)]
struct Owner {
    thread: Option<u64>,
    depth: u32,
}

/// A named, re-entrant, non-blocking lock owned by one thread at a time.
#[derive(Debug)]
pub struct GreedyLock {
    name: String,
    owner: Mutex<Owner>,
}

impl GreedyLock {
    /// Create an unowned lock.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: Mutex::new(Owner::default()),
        }
    }

    /// Lock name, for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the lock for `thread`. Re-entrant for the owner; returns `false`
    /// without blocking when another thread owns it.
    pub fn lock_greedy(&self, thread: &ThreadNode) -> bool {
        let mut owner = self.owner.lock();
        match owner.thread {
            Some(id) if id != thread.id() => false,
            _ => {
                owner.thread = Some(thread.id());
                owner.depth += 1;
                thread.locked_greedy.fetch_add(1, Ordering::AcqRel);
                true
            }
        }
    }

    /// Release one level of ownership. Returns `false` if `thread` is not the owner.
    pub fn unlock_greedy(&self, thread: &ThreadNode) -> bool {
        let mut owner = self.owner.lock();
        if owner.thread != Some(thread.id()) {
            return false;
        }
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
        }
        thread.locked_greedy.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Current owner id.
    pub fn owner(&self) -> Option<u64> {
        self.owner.lock().thread
    }

    /// Whether a thread other than `thread_id` owns the lock.
    pub fn is_held_by_other(&self, thread_id: u64) -> bool {
        self.owner.lock().thread.is_some_and(|id| id != thread_id)
    }
}
