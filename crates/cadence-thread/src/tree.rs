//! State shared by every thread of one tree: the tic clock, its condvar
//! and the timing configuration.

use crate::node::ThreadNode;
use crate::routine::ThreadRoutine;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Milliseconds per second used to turn a tic frequency into a window.
pub const HERTZ_JIFFIE: f64 = 1000.0;

/// Default tic frequency: one tic per 512-frame buffer at 48 kHz.
pub const DEFAULT_FREQ: f64 = 48000.0 / 512.0;

/// Timing of a thread tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeConfig {
    /// Tics per second.
    pub freq: f64,
    /// Consecutive missed windows before a thread is skipped.
    pub timelock_cycles: u32,
    /// Tics a thread may lag behind the root before the tree counts as hung.
    pub hangcheck_cycles: u32,
    /// How long `add_child` waits for a started child's first barrier.
    pub start_timeout: Duration,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            freq: DEFAULT_FREQ,
            timelock_cycles: 3,
            hangcheck_cycles: 8,
            start_timeout: Duration::from_secs(1),
        }
    }
}

impl TreeConfig {
    /// Length of one timelock window: `HERTZ_JIFFIE / freq` milliseconds.
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(HERTZ_JIFFIE / self.freq.max(f64::EPSILON) / 1000.0)
    }
}

#[derive(Debug, Default)]
pub(crate) struct TreeClock {
    /// Number of released tics.
    pub count: u64,
}

pub(crate) struct Shared {
    pub clock: Mutex<TreeClock>,
    pub cond: Condvar,
    pub config: TreeConfig,
    pub epoch: Instant,
    next_id: AtomicU64,
}

impl Shared {
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Wake everything parked on the clock.
    pub fn notify(&self) {
        let _clock = self.clock.lock();
        self.cond.notify_all();
    }
}

/// Handle to one thread tree. Cheap to clone.
#[derive(Clone)]
pub struct ThreadTree {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for ThreadTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTree")
            .field("count", &self.count())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl ThreadTree {
    /// Create an empty tree.
    pub fn new(config: TreeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock: Mutex::new(TreeClock::default()),
                cond: Condvar::new(),
                config,
                epoch: Instant::now(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Timing configuration.
    pub fn config(&self) -> &TreeConfig {
        &self.shared.config
    }

    /// Number of released tics.
    pub fn count(&self) -> u64 {
        self.shared.clock.lock().count
    }

    /// Barrier phase of the latest released tic.
    pub fn tic(&self) -> u8 {
        (self.count() % 3) as u8
    }

    /// Create a detached, stopped thread running `routine` once started.
    pub fn new_thread(&self, name: impl Into<String>, routine: impl ThreadRoutine + 'static) -> Arc<ThreadNode> {
        ThreadNode::new(Arc::clone(&self.shared), name.into(), Box::new(routine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_from_freq() {
        let config = TreeConfig {
            freq: 100.0,
            ..TreeConfig::default()
        };
        assert_eq!(config.window(), Duration::from_millis(10));
    }

    #[test]
    fn new_tree_starts_at_zero() {
        let tree = ThreadTree::new(TreeConfig::default());
        assert_eq!(tree.count(), 0);
        assert_eq!(tree.tic(), 0);
    }
}
