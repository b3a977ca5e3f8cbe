//! The root of a thread tree: releases tics, waits for the barrier and
//! enforces the timelock.

use crate::error::Result;
use crate::flags::ThreadFlags;
use crate::node::ThreadNode;
use crate::routine::ThreadRoutine;
use crate::task::TaskLauncher;
use crate::tree::{ThreadTree, TreeConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one [`AudioLoop::tic`].
#[derive(Debug, Clone, PartialEq)]
pub struct TicReport {
    /// Tic counter after the release.
    pub count: u64,
    /// Barrier phase of this tic.
    pub tic: u8,
    /// Threads newly skipped by the timelock during this tic.
    pub skipped: Vec<String>,
    /// Tasks launched before the release.
    pub tasks: usize,
    /// Wall time of the whole tic.
    pub elapsed: Duration,
}

/// Root thread of a tree. Driven by whoever calls [`tic`](Self::tic),
/// usually a soundcard callback or an offline render loop.
pub struct AudioLoop {
    tree: ThreadTree,
    root: Arc<ThreadNode>,
    launcher: Arc<TaskLauncher>,
}

impl std::fmt::Debug for AudioLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioLoop")
            .field("tree", &self.tree)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl AudioLoop {
    /// Create a loop whose root runs `routine` inline each tic.
    pub fn new(config: TreeConfig, routine: impl ThreadRoutine + 'static) -> Self {
        let tree = ThreadTree::new(config);
        let root = tree.new_thread("audio-loop", routine);
        root.mark_inline();
        tracing::info!(freq = config.freq, timelock = config.timelock_cycles, "audio loop created");
        Self {
            tree,
            root,
            launcher: Arc::new(TaskLauncher::new()),
        }
    }

    /// Root node.
    pub fn root(&self) -> &Arc<ThreadNode> {
        &self.root
    }

    /// Tree handle, for creating threads.
    pub fn tree(&self) -> &ThreadTree {
        &self.tree
    }

    /// Task launcher drained at the start of every tic.
    pub fn task_launcher(&self) -> &Arc<TaskLauncher> {
        &self.launcher
    }

    /// Create a thread and attach it below the root, started.
    pub fn spawn(&self, name: impl Into<String>, routine: impl ThreadRoutine + 'static) -> Result<Arc<ThreadNode>> {
        let node = self.tree.new_thread(name, routine);
        self.root.add_child(Arc::clone(&node), false, false)?;
        Ok(node)
    }

    /// Run one tic: launch tasks, release every thread, run the root
    /// routine and wait for the barrier.
    pub fn tic(&self) -> TicReport {
        let start = Instant::now();
        let tasks = self.launcher.run();
        let nodes = self.root.subtree();
        let shared = &self.tree.shared;

        let count = {
            let mut clock = shared.clock.lock();
            clock.count += 1;
            let tic = (clock.count % 3) as u8;
            for node in &nodes {
                node.set_sync(tic);
            }
            shared.cond.notify_all();
            clock.count
        };
        let tic = (count % 3) as u8;
        let _span = tracing::debug_span!("tic", count).entered();

        self.root.run_inline(count);
        let skipped = self.wait_barrier(&nodes, count, tic);
        for node in nodes.iter().skip(1) {
            node.note_stuck(count);
        }

        TicReport {
            count,
            tic,
            skipped,
            tasks,
            elapsed: start.elapsed(),
        }
    }

    fn wait_barrier(&self, nodes: &[Arc<ThreadNode>], count: u64, tic: u8) -> Vec<String> {
        let shared = &self.tree.shared;
        let window = shared.config.window();
        let mut skipped = Vec::new();
        let mut deadline = Instant::now() + window;

        let mut clock = shared.clock.lock();
        while !nodes.iter().all(|n| n.is_current_ready(tic)) {
            if !shared.cond.wait_until(&mut clock, deadline).timed_out() {
                continue;
            }
            for node in nodes.iter().filter(|n| !n.is_current_ready(tic)) {
                let missed = node.note_missed();
                if missed >= shared.config.timelock_cycles {
                    node.set_flags(ThreadFlags::SKIPPED_BY_TIMELOCK);
                    tracing::warn!(thread = %node.name(), missed, count, "thread skipped by timelock");
                    skipped.push(node.name().to_string());
                }
            }
            deadline = Instant::now() + window;
        }
        skipped
    }

    /// Detect threads lagging more than `hangcheck_cycles` tics behind and
    /// recover: clear every barrier bit and move stuck clocks forward.
    /// Returns `true` if the tree was hung.
    pub fn hangcheck(&self) -> bool {
        let nodes = self.root.subtree();
        let limit = self.tree.shared.config.hangcheck_cycles;
        let stuck: Vec<_> = nodes
            .iter()
            .filter(|n| n.is_running() && n.stuck_cycles() > limit)
            .collect();
        if stuck.is_empty() {
            return false;
        }
        let names: Vec<&str> = stuck.iter().map(|n| n.name()).collect();
        tracing::error!(threads = ?names, "thread tree hung up");

        let clock = self.tree.shared.clock.lock();
        for node in &nodes {
            node.unset_flags(ThreadFlags::wait_all());
        }
        for node in &stuck {
            node.force_clock(clock.count);
        }
        self.tree.shared.cond.notify_all();
        true
    }

    /// Stop every thread of the tree.
    pub fn shutdown(&self) {
        if !self.root.is_running() {
            return;
        }
        self.root.stop();
        self.root.unmark_inline();
        tracing::info!(count = self.tree.count(), "audio loop stopped");
    }
}

impl Drop for AudioLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::{IdleRoutine, routine_fn};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn fast() -> TreeConfig {
        TreeConfig {
            freq: 100.0,
            ..TreeConfig::default()
        }
    }

    #[test]
    fn root_runs_inline() {
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        let audio_loop = AudioLoop::new(
            fast(),
            routine_fn(move |ctx| {
                h.store(ctx.count, Ordering::SeqCst);
            }),
        );
        let report = audio_loop.tic();
        assert_eq!(report.count, 1);
        assert_eq!(report.tic, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        audio_loop.tic();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn children_run_once_per_tic() {
        let audio_loop = AudioLoop::new(fast(), IdleRoutine);
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        audio_loop
            .spawn(
                "child",
                routine_fn(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        for _ in 0..5 {
            let report = audio_loop.tic();
            assert!(report.skipped.is_empty());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        audio_loop.shutdown();
    }

    #[test]
    fn hangcheck_idle_tree() {
        let audio_loop = AudioLoop::new(fast(), IdleRoutine);
        audio_loop.tic();
        assert!(!audio_loop.hangcheck());
    }
}
