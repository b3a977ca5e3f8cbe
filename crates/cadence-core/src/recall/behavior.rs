//! The hook table a recall variant implements.

use super::Recall;
use crate::error::Result;
use crate::format::SampleFormat;
use std::sync::Arc;

/// What a behaviour wants after observing a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAction {
    /// Finish immediately.
    Done,
    /// Keep running (release tail); the behaviour calls [`Recall::done`] itself.
    Release,
}

/// Configuration changes forwarded to every recall of an audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallEvent {
    /// Frames per buffer changed.
    BufferSize(usize),
    /// Sample rate changed.
    Samplerate(u32),
    /// Storage format changed.
    Format(SampleFormat),
}

/// Per-variant processing hooks.
///
/// Hooks run on a scheduler thread with the behaviour locked. They may read
/// ports, the recall id and targets of `recall`, call [`Recall::done`] and add
/// children, but must not duplicate `recall` itself.
///
/// Every hook defaults to doing nothing; child delegation is handled by
/// [`Recall`].
pub trait RecallBehavior: Send {
    /// Fresh behaviour for a duplicate of the owning recall.
    fn duplicate(&self) -> Box<dyn RecallBehavior>;

    /// First init phase.
    fn run_init_pre(&mut self, _recall: &Recall) -> Result<()> {
        Ok(())
    }

    /// Second init phase.
    fn run_init_inter(&mut self, _recall: &Recall) -> Result<()> {
        Ok(())
    }

    /// Last init phase.
    fn run_init_post(&mut self, _recall: &Recall) -> Result<()> {
        Ok(())
    }

    /// Start of a tic.
    fn run_pre(&mut self, _recall: &Recall) -> Result<()> {
        Ok(())
    }

    /// Main processing of a tic.
    fn run_inter(&mut self, _recall: &Recall) -> Result<()> {
        Ok(())
    }

    /// End of a tic.
    fn run_post(&mut self, _recall: &Recall) -> Result<()> {
        Ok(())
    }

    /// A cancel request was observed at `run_pre`.
    fn cancel(&mut self, _recall: &Recall) -> CancelAction {
        CancelAction::Done
    }

    /// A named dependency was bound to a live sibling.
    fn resolve_dependency(&mut self, _name: &str, _dependency: &Arc<Recall>) {}

    /// Audio configuration changed.
    fn notify(&mut self, _event: &RecallEvent) {}
}

/// Behaviour of pure containers: every hook delegates to children only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerBehavior;

impl RecallBehavior for ContainerBehavior {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(*self)
    }
}
