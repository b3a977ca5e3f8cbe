//! Thread nodes and the per-thread worker loop.
//!
//! Every node is released once per tic by the root, runs its routine and
//! arrives at the barrier by setting the wait bit of the tic's phase. The
//! phase rotates through three values so that a straggler arriving late for
//! tic `n` can never satisfy the barrier of tic `n + 1`.

use crate::error::{Result, ThreadError};
use crate::flags::{ThreadFlags, ThreadState};
use crate::greedy::GreedyLock;
use crate::routine::{IdleRoutine, ThreadRoutine, TicContext};
use crate::tree::Shared;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Interrupt signals a thread can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop running the routine; keep arriving at barriers.
    Suspend,
    /// Run the routine again.
    Resume,
}

/// One thread of a tree.
pub struct ThreadNode {
    id: u64,
    name: String,
    flags: AtomicU32,
    state: AtomicU8,
    clock: AtomicU64,
    missed_cycles: AtomicU32,
    stuck_cycles: AtomicU32,
    cycle_start: AtomicU64,
    pub(crate) locked_greedy: AtomicU32,
    parent: Mutex<Weak<ThreadNode>>,
    children: Mutex<Vec<Arc<ThreadNode>>>,
    greedy: Mutex<Vec<Arc<GreedyLock>>>,
    routine: Mutex<Option<Box<dyn ThreadRoutine>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for ThreadNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &self.flags())
            .field("state", &self.state())
            .field("clock", &self.clock())
            .finish_non_exhaustive()
    }
}

impl ThreadNode {
    pub(crate) fn new(shared: Arc<Shared>, name: String, routine: Box<dyn ThreadRoutine>) -> Arc<Self> {
        Arc::new(Self {
            id: shared.next_id(),
            name,
            flags: AtomicU32::new(0),
            state: AtomicU8::new(ThreadState::Idle as u8),
            clock: AtomicU64::new(0),
            missed_cycles: AtomicU32::new(0),
            stuck_cycles: AtomicU32::new(0),
            cycle_start: AtomicU64::new(0),
            locked_greedy: AtomicU32::new(0),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            greedy: Mutex::new(Vec::new()),
            routine: Mutex::new(Some(routine)),
            handle: Mutex::new(None),
            shared,
        })
    }

    // --- Accessors ---

    /// Unique id within the tree.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Thread name; also the OS thread name once started.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current flags.
    pub fn flags(&self) -> ThreadFlags {
        ThreadFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    /// Whether all of `flags` are set.
    pub fn has_flags(&self, flags: ThreadFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Set `flags`.
    pub fn set_flags(&self, flags: ThreadFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear `flags`.
    pub fn unset_flags(&self, flags: ThreadFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Life-cycle state.
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Last tic count this thread was released for.
    pub fn clock(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Consecutive timelock windows missed in the current tic.
    pub fn missed_cycles(&self) -> u32 {
        self.missed_cycles.load(Ordering::Acquire)
    }

    /// Tics this thread has lagged behind the root.
    pub fn stuck_cycles(&self) -> u32 {
        self.stuck_cycles.load(Ordering::Acquire)
    }

    /// Number of greedy lock levels held by this thread.
    pub fn locked_greedy(&self) -> u32 {
        self.locked_greedy.load(Ordering::Acquire)
    }

    /// Whether the worker loop is live.
    pub fn is_running(&self) -> bool {
        self.has_flags(ThreadFlags::RUNNING)
    }

    // --- Tree structure ---

    /// Parent node, if attached.
    pub fn parent(&self) -> Option<Arc<ThreadNode>> {
        self.parent.lock().upgrade()
    }

    /// Direct children.
    pub fn children(&self) -> Vec<Arc<ThreadNode>> {
        self.children.lock().clone()
    }

    /// This node and all its descendants, pre-order.
    pub fn subtree(self: &Arc<Self>) -> Vec<Arc<ThreadNode>> {
        let mut out = vec![Arc::clone(self)];
        let mut i = 0;
        while i < out.len() {
            let children = out[i].children();
            out.extend(children);
            i += 1;
        }
        out
    }

    /// Attach `child` below this node.
    ///
    /// Unless `no_start`, the child is started; unless also `no_wait`, the
    /// call blocks until the child has reached its first barrier or the
    /// tree's start timeout expires.
    pub fn add_child(self: &Arc<Self>, child: Arc<ThreadNode>, no_start: bool, no_wait: bool) -> Result<()> {
        if !Arc::ptr_eq(&self.shared, &child.shared) {
            return Err(ThreadError::ForeignTree(child.name.clone()));
        }
        if let Some(old) = child.parent() {
            old.children.lock().retain(|c| !Arc::ptr_eq(c, &child));
        }
        *child.parent.lock() = Arc::downgrade(self);
        self.children.lock().push(Arc::clone(&child));
        tracing::debug!(parent = %self.name, child = %child.name, "thread attached");

        if no_start {
            return Ok(());
        }
        child.start()?;
        if !no_wait && !child.wait_initial_run(self.shared.config.start_timeout) {
            return Err(ThreadError::StartTimeout(child.name.clone()));
        }
        Ok(())
    }

    /// Detach `child`. The child keeps its running state.
    pub fn remove_child(&self, child: &Arc<ThreadNode>) -> Result<()> {
        let mut children = self.children.lock();
        let Some(pos) = children.iter().position(|c| Arc::ptr_eq(c, child)) else {
            return Err(ThreadError::NotAChild {
                parent: self.name.clone(),
                child: child.name.clone(),
            });
        };
        children.remove(pos);
        drop(children);
        *child.parent.lock() = Weak::new();
        tracing::debug!(parent = %self.name, child = %child.name, "thread detached");
        Ok(())
    }

    // --- Barrier ---

    /// Whether this node alone counts as arrived for phase `tic`.
    pub fn is_current_ready(&self, tic: u8) -> bool {
        let flags = self.flags();
        !flags.contains(ThreadFlags::RUNNING)
            || flags.intersects(
                ThreadFlags::INITIAL_RUN
                    .union(ThreadFlags::wait(tic))
                    .union(ThreadFlags::SKIPPED_BY_TIMELOCK)
                    .union(ThreadFlags::SKIP_NON_GREEDY),
            )
    }

    /// Whether every node of this subtree counts as arrived for phase `tic`.
    pub fn is_tree_ready(self: &Arc<Self>, tic: u8) -> bool {
        self.subtree().iter().all(|node| node.is_current_ready(tic))
    }

    /// Prepare this node for phase `tic`: clear its barrier bit and the
    /// per-tic markers.
    pub fn set_sync(&self, tic: u8) {
        self.unset_flags(
            ThreadFlags::wait(tic)
                .union(ThreadFlags::READY)
                .union(ThreadFlags::SKIP_NON_GREEDY),
        );
    }

    /// [`set_sync`](Self::set_sync) over the whole subtree.
    pub fn set_sync_all(self: &Arc<Self>, tic: u8) {
        for node in self.subtree() {
            node.set_sync(tic);
        }
    }

    /// Record arrival at the barrier of tic `count`.
    pub(crate) fn arrive(&self, count: u64) {
        let tic = (count % 3) as u8;
        self.missed_cycles.store(0, Ordering::Release);
        self.stuck_cycles.store(0, Ordering::Release);

        let clock = self.shared.clock.lock();
        let on_time = clock.count == count;
        let mut arrived = ThreadFlags::wait(tic);
        if on_time {
            arrived = arrived.union(ThreadFlags::READY);
            if self.has_flags(ThreadFlags::SKIPPED_BY_TIMELOCK) {
                tracing::info!(thread = %self.name, count, "thread caught up after timelock");
                self.unset_flags(ThreadFlags::SKIPPED_BY_TIMELOCK);
            }
        }
        self.set_flags(arrived);
        self.unset_flags(ThreadFlags::INITIAL_RUN);
        self.shared.cond.notify_all();
        drop(clock);
    }

    pub(crate) fn begin_cycle(&self, count: u64) {
        self.clock.store(count, Ordering::Release);
        self.cycle_start.store(self.shared.now_nanos(), Ordering::Release);
    }

    pub(crate) fn note_missed(&self) -> u32 {
        self.missed_cycles.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn note_stuck(&self, count: u64) {
        if self.is_running() && self.clock() < count {
            self.stuck_cycles.fetch_add(1, Ordering::AcqRel);
        } else {
            self.stuck_cycles.store(0, Ordering::Release);
        }
    }

    pub(crate) fn force_clock(&self, count: u64) {
        self.clock.store(count, Ordering::Release);
        self.stuck_cycles.store(0, Ordering::Release);
    }

    /// Block until the worker has parked at its first barrier. Returns
    /// `false` on timeout.
    pub fn wait_initial_run(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut clock = self.shared.clock.lock();
        while self.has_flags(ThreadFlags::INITIAL_RUN.union(ThreadFlags::RUNNING)) {
            if self.shared.cond.wait_until(&mut clock, deadline).timed_out() {
                return !self.has_flags(ThreadFlags::INITIAL_RUN);
            }
        }
        true
    }

    // --- Greedy locks ---

    /// Make this thread skip its run while another thread owns `lock`.
    pub fn register_greedy(&self, lock: Arc<GreedyLock>) {
        self.greedy.lock().push(lock);
    }

    fn greedy_blocked(&self) -> Option<String> {
        self.greedy
            .lock()
            .iter()
            .find(|lock| lock.is_held_by_other(self.id))
            .map(|lock| lock.name().to_string())
    }

    // --- Life cycle ---

    /// Spawn the worker. Does nothing if already running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let routine = self
            .routine
            .lock()
            .take()
            .unwrap_or_else(|| Box::new(IdleRoutine));
        {
            let clock = self.shared.clock.lock();
            self.clock.store(clock.count, Ordering::Release);
        }
        self.unset_flags(ThreadFlags::wait_all().union(ThreadFlags::SKIPPED_BY_TIMELOCK));
        self.set_flags(ThreadFlags::RUNNING.union(ThreadFlags::INITIAL_RUN));
        self.set_state(ThreadState::Waiting);

        let node = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker_main(node, routine))
            .map_err(|e| {
                self.unset_flags(ThreadFlags::RUNNING.union(ThreadFlags::INITIAL_RUN));
                self.set_state(ThreadState::Idle);
                ThreadError::spawn(self.name.clone(), e)
            })?;
        *self.handle.lock() = Some(handle);
        tracing::debug!(thread = %self.name, "thread started");
        Ok(())
    }

    /// Stop this thread and its subtree, joining the workers.
    pub fn stop(&self) {
        for child in self.children() {
            child.stop();
        }
        if !self.is_running() {
            return;
        }
        self.unset_flags(ThreadFlags::RUNNING.union(ThreadFlags::INITIAL_RUN));
        self.shared.notify();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!(thread = %self.name, "worker panicked");
            }
        }
        self.set_state(ThreadState::Idle);
        tracing::debug!(thread = %self.name, "thread stopped");
    }

    /// Deliver an interrupt. Only touches atomics, so it is safe from any
    /// context. Returns the time already spent in the current cycle, capped
    /// at `time_cycle`.
    pub fn interrupted(&self, signal: Signal, time_cycle: Duration) -> Duration {
        match signal {
            Signal::Suspend => self.set_flags(ThreadFlags::RECOVER_INTERRUPTED),
            Signal::Resume => self.set_flags(ThreadFlags::RESUME_INTERRUPTED),
        }
        let start = self.cycle_start.load(Ordering::Acquire);
        let spent = Duration::from_nanos(self.shared.now_nanos().saturating_sub(start));
        spent.min(time_cycle)
    }

    /// Suspend the routine from the next tic on.
    pub fn suspend(&self) {
        self.interrupted(Signal::Suspend, Duration::ZERO);
    }

    /// Resume the routine from the next tic on.
    pub fn resume(&self) {
        self.interrupted(Signal::Resume, Duration::ZERO);
    }

    /// Apply pending interrupts. Returns `true` while suspended.
    fn handle_interrupts(&self) -> bool {
        let flags = self.flags();
        if flags.contains(ThreadFlags::RECOVER_INTERRUPTED) {
            self.unset_flags(ThreadFlags::RECOVER_INTERRUPTED);
            if self.state() != ThreadState::Suspended {
                tracing::info!(thread = %self.name, "thread suspended");
            }
            self.set_state(ThreadState::Suspended);
        }
        if flags.contains(ThreadFlags::RESUME_INTERRUPTED) {
            self.unset_flags(ThreadFlags::RESUME_INTERRUPTED);
            if self.state() == ThreadState::Suspended {
                tracing::info!(thread = %self.name, "thread resumed");
                self.set_state(ThreadState::Running);
            }
        }
        self.state() == ThreadState::Suspended
    }

    /// Park until released for a new tic. `None` once stopped.
    fn wait_release(&self) -> Option<u64> {
        let mut clock = self.shared.clock.lock();
        if self.state() != ThreadState::Suspended {
            self.set_state(ThreadState::Waiting);
        }
        if self.has_flags(ThreadFlags::INITIAL_RUN) {
            self.unset_flags(ThreadFlags::INITIAL_RUN);
            self.shared.cond.notify_all();
        }
        loop {
            if !self.is_running() {
                return None;
            }
            if self.clock() < clock.count {
                return Some(clock.count);
            }
            self.shared.cond.wait(&mut clock);
        }
    }

    /// Run the routine of a node driven inline (the root).
    pub(crate) fn run_inline(&self, count: u64) {
        self.begin_cycle(count);
        let mut routine = self.routine.lock();
        if let Some(routine) = routine.as_mut() {
            self.set_state(ThreadState::Running);
            routine.run(&TicContext {
                count,
                tic: (count % 3) as u8,
                thread: &self.name,
            });
            self.set_state(ThreadState::Waiting);
        }
        drop(routine);
        self.arrive(count);
    }

    pub(crate) fn mark_inline(&self) {
        self.set_flags(ThreadFlags::RUNNING);
        self.set_state(ThreadState::Waiting);
    }

    pub(crate) fn unmark_inline(&self) {
        self.unset_flags(ThreadFlags::RUNNING);
        self.set_state(ThreadState::Idle);
    }
}

fn worker_main(node: Arc<ThreadNode>, mut routine: Box<dyn ThreadRoutine>) {
    routine.start();
    while let Some(count) = node.wait_release() {
        node.begin_cycle(count);
        let tic = (count % 3) as u8;

        if node.handle_interrupts() {
            node.arrive(count);
            continue;
        }
        if let Some(lock) = node.greedy_blocked() {
            tracing::trace!(thread = %node.name, lock = %lock, count, "skipped by greedy lock");
            node.set_flags(ThreadFlags::SKIP_NON_GREEDY);
            node.arrive(count);
            continue;
        }

        node.set_state(ThreadState::Running);
        {
            let _span = tracing::trace_span!("thread_tic", thread = %node.name, count).entered();
            routine.run(&TicContext {
                count,
                tic,
                thread: &node.name,
            });
        }
        node.arrive(count);
    }
    routine.stop();
    *node.routine.lock() = Some(routine);
    node.set_state(ThreadState::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::routine_fn;
    use crate::tree::{ThreadTree, TreeConfig};

    #[test]
    fn subtree_is_preorder() {
        let tree = ThreadTree::new(TreeConfig::default());
        let root = tree.new_thread("root", IdleRoutine);
        let a = tree.new_thread("a", IdleRoutine);
        let b = tree.new_thread("b", IdleRoutine);
        let a1 = tree.new_thread("a1", IdleRoutine);
        root.add_child(Arc::clone(&a), true, true).unwrap();
        root.add_child(Arc::clone(&b), true, true).unwrap();
        a.add_child(Arc::clone(&a1), true, true).unwrap();

        let names: Vec<_> = root.subtree().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, ["root", "a", "b", "a1"]);
        assert!(Arc::ptr_eq(&a1.parent().unwrap(), &a));
    }

    #[test]
    fn reparenting_moves_child() {
        let tree = ThreadTree::new(TreeConfig::default());
        let a = tree.new_thread("a", IdleRoutine);
        let b = tree.new_thread("b", IdleRoutine);
        let c = tree.new_thread("c", IdleRoutine);
        a.add_child(Arc::clone(&c), true, true).unwrap();
        b.add_child(Arc::clone(&c), true, true).unwrap();
        assert!(a.children().is_empty());
        assert_eq!(b.children().len(), 1);
    }

    #[test]
    fn remove_unknown_child_fails() {
        let tree = ThreadTree::new(TreeConfig::default());
        let a = tree.new_thread("a", IdleRoutine);
        let b = tree.new_thread("b", IdleRoutine);
        assert!(matches!(
            a.remove_child(&b),
            Err(ThreadError::NotAChild { .. })
        ));
    }

    #[test]
    fn foreign_tree_rejected() {
        let one = ThreadTree::new(TreeConfig::default());
        let two = ThreadTree::new(TreeConfig::default());
        let a = one.new_thread("a", IdleRoutine);
        let b = two.new_thread("b", IdleRoutine);
        assert!(matches!(
            a.add_child(b, true, true),
            Err(ThreadError::ForeignTree(_))
        ));
    }

    #[test]
    fn stopped_node_counts_as_ready() {
        let tree = ThreadTree::new(TreeConfig::default());
        let a = tree.new_thread("a", IdleRoutine);
        assert!(a.is_current_ready(1));
        a.mark_inline();
        assert!(!a.is_current_ready(1));
        a.set_flags(ThreadFlags::WAIT_1);
        assert!(a.is_current_ready(1));
        a.set_sync(1);
        assert!(!a.is_current_ready(1));
    }

    #[test]
    fn interrupt_only_sets_flags() {
        let tree = ThreadTree::new(TreeConfig::default());
        let a = tree.new_thread("a", routine_fn(|_| {}));
        let spent = a.interrupted(Signal::Suspend, Duration::from_millis(5));
        assert!(spent <= Duration::from_millis(5));
        assert!(a.has_flags(ThreadFlags::RECOVER_INTERRUPTED));
        a.interrupted(Signal::Resume, Duration::ZERO);
        assert!(a.has_flags(ThreadFlags::RESUME_INTERRUPTED));
        assert_eq!(a.state(), ThreadState::Idle);
    }

    #[test]
    fn start_and_stop_worker() {
        let tree = ThreadTree::new(TreeConfig::default());
        let a = tree.new_thread("worker", IdleRoutine);
        a.start().unwrap();
        assert!(a.is_running());
        assert!(a.wait_initial_run(Duration::from_secs(1)));
        assert!(!a.has_flags(ThreadFlags::INITIAL_RUN));
        a.stop();
        assert!(!a.is_running());
        assert_eq!(a.state(), ThreadState::Idle);
    }
}
