//! Work executed by a thread once per tic.

use cadence_core::{Audio, EngineContext};
use std::sync::Arc;

/// What a routine sees of the tic it runs in.
#[derive(Debug, Clone, Copy)]
pub struct TicContext<'a> {
    /// Tic counter of the tree (1 for the first released tic).
    pub count: u64,
    /// Barrier phase (0, 1 or 2).
    pub tic: u8,
    /// Name of the running thread.
    pub thread: &'a str,
}

/// Per-tic work of a thread.
pub trait ThreadRoutine: Send {
    /// Called on the worker thread before its first tic.
    fn start(&mut self) {}

    /// Called once per released tic.
    fn run(&mut self, ctx: &TicContext<'_>);

    /// Called on the worker thread after its last tic.
    fn stop(&mut self) {}
}

/// A routine built from a closure.
pub struct FnRoutine<F>(F);

/// Wrap a closure as a [`ThreadRoutine`].
pub fn routine_fn<F>(f: F) -> FnRoutine<F>
where
    F: FnMut(&TicContext<'_>) + Send,
{
    FnRoutine(f)
}

impl<F> ThreadRoutine for FnRoutine<F>
where
    F: FnMut(&TicContext<'_>) + Send,
{
    fn run(&mut self, ctx: &TicContext<'_>) {
        (self.0)(ctx);
    }
}

/// A routine that does nothing; useful for the root of tests and idle trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleRoutine;

impl ThreadRoutine for IdleRoutine {
    fn run(&mut self, _ctx: &TicContext<'_>) {}
}

/// Runs one audio's recall lists each tic and disposes finished recalls.
pub struct AudioRoutine {
    audio: Arc<Audio>,
    context: Arc<EngineContext>,
}

impl AudioRoutine {
    /// Drive `audio`, disposing through `context`.
    pub fn new(audio: Arc<Audio>, context: Arc<EngineContext>) -> Self {
        Self { audio, context }
    }
}

impl ThreadRoutine for AudioRoutine {
    fn start(&mut self) {
        tracing::debug!(audio = %self.audio.name(), "audio routine started");
    }

    fn run(&mut self, _ctx: &TicContext<'_>) {
        self.audio.run_tic();
        for recall in self.audio.collect_done() {
            self.context.dispose(recall);
        }
    }
}
