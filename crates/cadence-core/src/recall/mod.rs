//! Duplicatable processing units and their phase engine.
//!
//! A [`Recall`] is one effect instance bound to an [`Audio`], [`Channel`],
//! [`Recycling`] or [`AudioSignal`](crate::AudioSignal) (see [`RecallKind`]).
//! Effects are built once as *templates* and duplicated per run
//! ([`RecallId`]), so every concurrent performance gets its own processing
//! state while sharing control ports with the template.
//!
//! # Architecture
//!
//! ```text
//!   template (TEMPLATE)                    instance (recall_id = run A)
//!   ┌──────────────────┐   duplicate(A)   ┌──────────────────┐
//!   │ channel recall   │ ───────────────▶ │ channel recall   │
//!   │  ├─ recycling    │                  │  ├─ recycling    │
//!   │  └─ recycling    │                  │  └─ recycling    │
//!   └──────────────────┘                  └──────────────────┘
//! ```
//!
//! Each tic runs six phases over the instance tree: the three init phases
//! (effective only until `run_init_post` has completed once) and then
//! `run_pre`, `run_inter`, `run_post`. `run_pre` and `run_inter` run a
//! recall's own hook before its children; `run_post` runs children first.
//!
//! Finishing is two-step: [`Recall::done`] only flags the instance, and
//! [`collect_done`] unlinks flagged instances at the next tic boundary so no
//! list changes shape while a phase is iterating it.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_core::{Recall, RecallKind, RecallId};
//!
//! let template = Recall::builder("volume", RecallKind::Channel)
//!     .port(volume_port)
//!     .behavior(VolumeBehavior::default())
//!     .build();
//! let instance = template.duplicate(&recall_id);
//! instance.run_tic()?;
//! ```

mod behavior;
mod flags;
mod list;

pub use behavior::{CancelAction, ContainerBehavior, RecallBehavior, RecallEvent};
pub use flags::RecallFlags;
pub use list::{Stage, collect_done, run_stage, run_tic};

use crate::audio::Audio;
use crate::audio_signal::SharedSignal;
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::id::next_id;
use crate::port::Port;
use crate::recall_id::RecallId;
use crate::recycling::Recycling;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// The entity level a recall variant is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecallKind {
    /// Bound to a whole audio.
    Audio,
    /// Bound to one channel.
    Channel,
    /// Bound to one recycling.
    Recycling,
    /// Bound to one audio signal.
    AudioSignal,
}

/// The entity a recall instance operates on.
#[derive(Debug, Clone, Default)]
pub enum RecallTarget {
    /// Not bound yet (templates).
    #[default]
    None,
    /// An audio.
    Audio(Weak<Audio>),
    /// A channel.
    Channel(Weak<Channel>),
    /// A recycling.
    Recycling(Weak<Recycling>),
    /// A source signal and an optional destination it writes into.
    AudioSignal {
        /// Signal read (and usually written) by the recall.
        source: SharedSignal,
        /// Signal mixed into, for sink variants.
        destination: Option<SharedSignal>,
    },
}

/// A named dependency on a sibling recall of the same run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecallDependency {
    /// Name of the sibling recall.
    pub name: String,
    /// Whether the instance is abandoned when the sibling is missing.
    pub required: bool,
}

impl RecallDependency {
    /// A dependency the instance cannot run without.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    /// A dependency that is bound when present.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// One processing unit: a template or a per-run instance.
pub struct Recall {
    id: u64,
    name: String,
    kind: RecallKind,
    flags: AtomicU32,
    recall_id: Mutex<Option<Arc<RecallId>>>,
    parent: Mutex<Weak<Recall>>,
    children: Mutex<Vec<Arc<Recall>>>,
    ports: Vec<Arc<Port>>,
    local_ports: Vec<Arc<Port>>,
    dependencies: Vec<RecallDependency>,
    resolved: Mutex<Vec<(String, Weak<Recall>)>>,
    target: Mutex<RecallTarget>,
    behavior: Mutex<Box<dyn RecallBehavior>>,
    self_ref: Weak<Recall>,
}

impl fmt::Debug for Recall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recall")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("flags", &self.flags())
            .field("children", &self.children.lock().len())
            .finish_non_exhaustive()
    }
}

/// Builder for recall templates.
pub struct RecallBuilder {
    name: String,
    kind: RecallKind,
    flags: RecallFlags,
    ports: Vec<Arc<Port>>,
    local_ports: Vec<Arc<Port>>,
    dependencies: Vec<RecallDependency>,
    target: RecallTarget,
    behavior: Box<dyn RecallBehavior>,
}

impl RecallBuilder {
    /// Add a port shared by the template and all its duplicates.
    pub fn port(mut self, port: Port) -> Self {
        self.ports.push(Arc::new(port));
        self
    }

    /// Add an already shared port.
    pub fn shared_port(mut self, port: Arc<Port>) -> Self {
        self.ports.push(port);
        self
    }

    /// Add a port every duplicate gets its own copy of.
    pub fn local_port(mut self, port: Port) -> Self {
        self.local_ports.push(Arc::new(port));
        self
    }

    /// Declare a dependency on a sibling.
    pub fn dependency(mut self, dependency: RecallDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Add lifecycle flags (`PERSISTENT`, `PROPAGATE_DONE`).
    pub fn flags(mut self, flags: RecallFlags) -> Self {
        self.flags = self.flags.union(flags);
        self
    }

    /// Bind the template to an entity.
    pub fn target(mut self, target: RecallTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the behaviour.
    pub fn behavior(mut self, behavior: impl RecallBehavior + 'static) -> Self {
        self.behavior = Box::new(behavior);
        self
    }

    /// Set a boxed behaviour.
    pub fn boxed_behavior(mut self, behavior: Box<dyn RecallBehavior>) -> Self {
        self.behavior = behavior;
        self
    }

    /// Build a template.
    pub fn build(self) -> Arc<Recall> {
        self.finish(RecallFlags::TEMPLATE)
    }

    /// Build an instance bound to `recall_id` without going through a template.
    pub fn build_instance(self, recall_id: &Arc<RecallId>) -> Arc<Recall> {
        let recall = self.finish(RecallFlags::NONE);
        *recall.recall_id.lock() = Some(Arc::clone(recall_id));
        recall
    }

    fn finish(self, extra: RecallFlags) -> Arc<Recall> {
        let flags = self.flags.union(extra);
        Arc::new_cyclic(|self_ref| Recall {
            id: next_id(),
            name: self.name,
            kind: self.kind,
            flags: AtomicU32::new(flags.bits()),
            recall_id: Mutex::new(None),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            ports: self.ports,
            local_ports: self.local_ports,
            dependencies: self.dependencies,
            resolved: Mutex::new(Vec::new()),
            target: Mutex::new(self.target),
            behavior: Mutex::new(self.behavior),
            self_ref: self_ref.clone(),
        })
    }
}

impl Recall {
    /// Start building a template.
    pub fn builder(name: impl Into<String>, kind: RecallKind) -> RecallBuilder {
        RecallBuilder {
            name: name.into(),
            kind,
            flags: RecallFlags::NONE,
            ports: Vec::new(),
            local_ports: Vec::new(),
            dependencies: Vec::new(),
            target: RecallTarget::None,
            behavior: Box::new(ContainerBehavior),
        }
    }

    // --- Identity and flags ---

    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Effect name, shared by template and duplicates.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity level.
    pub fn kind(&self) -> RecallKind {
        self.kind
    }

    /// Current flags.
    pub fn flags(&self) -> RecallFlags {
        RecallFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    /// Whether every bit of `flags` is set.
    pub fn has_flags(&self, flags: RecallFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Set bits.
    pub fn set_flags(&self, flags: RecallFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear bits.
    pub fn unset_flags(&self, flags: RecallFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Whether this is a template.
    pub fn is_template(&self) -> bool {
        self.has_flags(RecallFlags::TEMPLATE)
    }

    /// Whether the instance finished.
    pub fn is_done(&self) -> bool {
        self.has_flags(RecallFlags::DONE)
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.has_flags(RecallFlags::CANCEL)
    }

    /// Whether this tic is the first run after initialization.
    pub fn is_initial_run(&self) -> bool {
        self.has_flags(RecallFlags::INITIAL_RUN)
    }

    // --- Run identity ---

    /// The run this instance belongs to.
    pub fn recall_id(&self) -> Option<Arc<RecallId>> {
        self.recall_id.lock().clone()
    }

    /// Rebind this recall and all its children to `recall_id`.
    pub fn set_recall_id(&self, recall_id: Option<Arc<RecallId>>) {
        *self.recall_id.lock() = recall_id.clone();
        for child in self.children() {
            child.set_recall_id(recall_id.clone());
        }
    }

    // --- Tree ---

    /// Container recall, if any.
    pub fn parent(&self) -> Option<Arc<Recall>> {
        self.parent.lock().upgrade()
    }

    /// Snapshot of the children.
    pub fn children(&self) -> Vec<Arc<Recall>> {
        self.children.lock().clone()
    }

    /// Attach `child`, detaching it from any previous parent.
    pub fn add_child(&self, child: Arc<Recall>) {
        if let Some(old) = child.parent() {
            old.remove_child(&child);
        }
        *child.parent.lock() = self.self_ref.clone();
        if child.recall_id.lock().is_none() && !child.is_template() {
            *child.recall_id.lock() = self.recall_id();
        }
        self.children.lock().push(child);
    }

    /// Detach `child`. Returns whether it was a child of `self`.
    pub fn remove_child(&self, child: &Arc<Recall>) -> bool {
        let mut children = self.children.lock();
        let before = children.len();
        children.retain(|c| !Arc::ptr_eq(c, child));
        let removed = children.len() != before;
        drop(children);
        if removed {
            *child.parent.lock() = Weak::new();
        }
        removed
    }

    // --- Ports and targets ---

    /// Port by specifier (shared ports first, then local ones).
    pub fn port(&self, specifier: &str) -> Option<Arc<Port>> {
        self.ports
            .iter()
            .chain(&self.local_ports)
            .find(|p| p.specifier() == specifier)
            .cloned()
    }

    /// Port by specifier, searching this recall then its ancestors.
    pub fn find_port(&self, specifier: &str) -> Option<Arc<Port>> {
        self.port(specifier)
            .or_else(|| self.parent().and_then(|p| p.find_port(specifier)))
    }

    /// All ports.
    pub fn ports(&self) -> Vec<Arc<Port>> {
        self.ports.iter().chain(&self.local_ports).cloned().collect()
    }

    /// Bound entity.
    pub fn target(&self) -> RecallTarget {
        self.target.lock().clone()
    }

    /// Rebind to an entity.
    pub fn set_target(&self, target: RecallTarget) {
        *self.target.lock() = target;
    }

    /// Source signal of audio-signal variants.
    pub fn source(&self) -> Option<SharedSignal> {
        match &*self.target.lock() {
            RecallTarget::AudioSignal { source, .. } => Some(Arc::clone(source)),
            _ => None,
        }
    }

    /// Destination signal of sink variants.
    pub fn destination(&self) -> Option<SharedSignal> {
        match &*self.target.lock() {
            RecallTarget::AudioSignal { destination, .. } => destination.clone(),
            _ => None,
        }
    }

    /// Bound channel, for channel variants.
    pub fn channel(&self) -> Option<Arc<Channel>> {
        match &*self.target.lock() {
            RecallTarget::Channel(c) => c.upgrade(),
            _ => None,
        }
    }

    /// Bound recycling, for recycling variants.
    pub fn recycling(&self) -> Option<Arc<Recycling>> {
        match &*self.target.lock() {
            RecallTarget::Recycling(r) => r.upgrade(),
            _ => None,
        }
    }

    /// Bound audio, for audio variants.
    pub fn audio(&self) -> Option<Arc<Audio>> {
        match &*self.target.lock() {
            RecallTarget::Audio(a) => a.upgrade(),
            _ => None,
        }
    }

    /// Run `f` with the behaviour locked.
    ///
    /// Must not be called from inside one of this recall's own hooks.
    pub fn with_behavior<R>(&self, f: impl FnOnce(&mut dyn RecallBehavior) -> R) -> R {
        let mut behavior = self.behavior.lock();
        f(behavior.as_mut())
    }

    // --- Duplication ---

    /// Create an instance of this recall bound to `recall_id`.
    ///
    /// Shared ports are shared with the template, local ports are copied,
    /// children are duplicated recursively and re-linked to the copy.
    pub fn duplicate(&self, recall_id: &Arc<RecallId>) -> Arc<Recall> {
        self.duplicate_with_target(recall_id, None)
    }

    /// Like [`duplicate`](Self::duplicate), binding the copy to `target`.
    pub fn duplicate_with_target(
        &self,
        recall_id: &Arc<RecallId>,
        target: Option<RecallTarget>,
    ) -> Arc<Recall> {
        let flags = self.flags().difference(
            RecallFlags::TEMPLATE
                .union(RecallFlags::RUN_INITIALIZED)
                .union(RecallFlags::INITIAL_RUN)
                .union(RecallFlags::DONE)
                .union(RecallFlags::CANCEL)
                .union(RecallFlags::CANCEL_OBSERVED)
                .union(RecallFlags::REMOVED)
                .union(RecallFlags::ABANDONED),
        );
        let behavior = self.behavior.lock().duplicate();
        let target = target.unwrap_or_else(|| self.target());

        let copy = Arc::new_cyclic(|self_ref| Recall {
            id: next_id(),
            name: self.name.clone(),
            kind: self.kind,
            flags: AtomicU32::new(flags.bits()),
            recall_id: Mutex::new(Some(Arc::clone(recall_id))),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            ports: self.ports.clone(),
            local_ports: self
                .local_ports
                .iter()
                .map(|p| Arc::new(p.detached_copy()))
                .collect(),
            dependencies: self.dependencies.clone(),
            resolved: Mutex::new(Vec::new()),
            target: Mutex::new(target),
            behavior: Mutex::new(behavior),
            self_ref: self_ref.clone(),
        });

        for child in self.children() {
            copy.add_child(child.duplicate(recall_id));
        }

        tracing::debug!(
            recall = %self.name,
            template = self.id,
            instance = copy.id,
            recall_id = recall_id.id(),
            "recall duplicated"
        );
        copy
    }

    // --- Dependencies ---

    /// Bind declared dependencies to siblings of the same run.
    ///
    /// A missing required dependency abandons this instance only: it is
    /// flagged done and the error is returned for logging. Children resolve
    /// against each other; an abandoned child does not stop its siblings.
    pub fn resolve_dependencies(&self, siblings: &[Arc<Recall>]) -> Result<()> {
        let my_id = self.recall_id();
        for dependency in &self.dependencies {
            let found = siblings.iter().find(|s| {
                s.id != self.id
                    && !s.is_template()
                    && s.name == dependency.name
                    && match (&my_id, s.recall_id()) {
                        (Some(mine), Some(theirs)) => mine.same_context(&theirs),
                        _ => false,
                    }
            });
            match found {
                Some(sibling) => {
                    self.behavior
                        .lock()
                        .resolve_dependency(&dependency.name, sibling);
                    self.resolved
                        .lock()
                        .push((dependency.name.clone(), Arc::downgrade(sibling)));
                }
                None if dependency.required => {
                    self.set_flags(RecallFlags::ABANDONED);
                    self.force_done();
                    tracing::warn!(
                        recall = %self.name,
                        dependency = %dependency.name,
                        "required dependency missing, instance abandoned"
                    );
                    return Err(Error::UnresolvedDependency {
                        recall: self.name.clone(),
                        dependency: dependency.name.clone(),
                    });
                }
                None => {}
            }
        }
        let children = self.children();
        for child in &children {
            if let Err(err) = child.resolve_dependencies(&children) {
                tracing::debug!(recall = %child.name, error = %err, "child abandoned, siblings continue");
            }
        }
        Ok(())
    }

    /// A resolved dependency by name.
    pub fn dependency(&self, name: &str) -> Option<Arc<Recall>> {
        self.resolved
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, r)| r.upgrade())
    }

    // --- Lifecycle ---

    /// Mark the instance finished.
    ///
    /// Templates and persistent recalls ignore this. Calling it again is a
    /// no-op. Returns whether this call changed the state.
    pub fn done(&self) -> bool {
        if self
            .flags()
            .intersects(RecallFlags::TEMPLATE.union(RecallFlags::PERSISTENT))
        {
            return false;
        }
        self.force_done()
    }

    fn force_done(&self) -> bool {
        let previous = self.flags.fetch_or(RecallFlags::DONE.bits(), Ordering::AcqRel);
        if RecallFlags::from_bits(previous).contains(RecallFlags::DONE) {
            return false;
        }
        tracing::debug!(recall = %self.name, instance = self.id, "recall done");
        true
    }

    /// Clear persistence and finish.
    pub fn stop_persistent(&self) {
        self.unset_flags(RecallFlags::PERSISTENT);
        self.done();
    }

    /// Request early termination.
    ///
    /// Children are cancelled first. The request is observed at the next
    /// `run_pre`, where the behaviour either finishes at once or keeps
    /// running a release tail.
    pub fn cancel(&self) {
        if self.is_template() {
            return;
        }
        for child in self.children() {
            child.cancel();
        }
        self.unset_flags(RecallFlags::PERSISTENT);
        self.set_flags(RecallFlags::CANCEL);
    }

    /// Forward a configuration change to this recall and its children.
    pub fn notify(&self, event: &RecallEvent) {
        self.behavior.lock().notify(event);
        for child in self.children() {
            child.notify(event);
        }
    }

    // --- Phases ---

    fn runnable(&self) -> bool {
        let flags = self.flags();
        if flags.contains(RecallFlags::TEMPLATE) {
            tracing::warn!(recall = %self.name, "running on template");
            return false;
        }
        !flags.intersects(RecallFlags::DONE.union(RecallFlags::REMOVED))
    }

    fn initialized(&self) -> bool {
        self.has_flags(RecallFlags::RUN_INITIALIZED)
    }

    fn children_phase(&self, phase: fn(&Recall) -> Result<()>) -> Result<()> {
        for child in self.children() {
            phase(&child)?;
        }
        Ok(())
    }

    /// First init phase: own hook (until initialized), then children.
    pub fn run_init_pre(&self) -> Result<()> {
        if !self.runnable() {
            return Ok(());
        }
        if !self.initialized() {
            self.behavior.lock().run_init_pre(self)?;
        }
        self.children_phase(Recall::run_init_pre)
    }

    /// Second init phase: own hook (until initialized), then children.
    pub fn run_init_inter(&self) -> Result<()> {
        if !self.runnable() {
            return Ok(());
        }
        if !self.initialized() {
            self.behavior.lock().run_init_inter(self)?;
        }
        self.children_phase(Recall::run_init_inter)
    }

    /// Last init phase: children, then own hook; marks the recall initialized.
    pub fn run_init_post(&self) -> Result<()> {
        if !self.runnable() {
            return Ok(());
        }
        self.children_phase(Recall::run_init_post)?;
        if !self.initialized() {
            self.behavior.lock().run_init_post(self)?;
            self.set_flags(RecallFlags::INITIAL_RUN.union(RecallFlags::RUN_INITIALIZED));
        }
        Ok(())
    }

    /// Start of tic: observes cancellation, own hook, then children.
    pub fn run_pre(&self) -> Result<()> {
        if !self.runnable() || !self.initialized() {
            return Ok(());
        }
        if self.is_cancelled() && !self.has_flags(RecallFlags::CANCEL_OBSERVED) {
            self.set_flags(RecallFlags::CANCEL_OBSERVED);
            let action = self.behavior.lock().cancel(self);
            if action == CancelAction::Done {
                self.force_done();
                return Ok(());
            }
        }
        self.behavior.lock().run_pre(self)?;
        self.children_phase(Recall::run_pre)
    }

    /// Main processing: own hook, then children.
    pub fn run_inter(&self) -> Result<()> {
        if !self.runnable() || !self.initialized() {
            return Ok(());
        }
        self.behavior.lock().run_inter(self)?;
        self.children_phase(Recall::run_inter)
    }

    /// End of tic: children, then own hook; clears the initial-run mark.
    pub fn run_post(&self) -> Result<()> {
        if !self.runnable() || !self.initialized() {
            return Ok(());
        }
        self.children_phase(Recall::run_post)?;
        self.behavior.lock().run_post(self)?;
        self.unset_flags(RecallFlags::INITIAL_RUN);
        Ok(())
    }

    /// Run one full tic (init phases, then run phases) on this instance tree.
    pub fn run_tic(&self) -> Result<()> {
        if self.is_template() {
            return Err(Error::Template(self.name.clone()));
        }
        if self.recall_id().is_none() {
            return Err(Error::MissingRecallId(self.name.clone()));
        }
        for stage in Stage::ALL {
            stage.apply(self)?;
        }
        Ok(())
    }

    /// Unlink finished children (recursively). Returns every removed recall.
    ///
    /// Call only between tics. When the last child goes away and this recall
    /// propagates done, it finishes too.
    pub fn collect_done_children(&self) -> Vec<Arc<Recall>> {
        let mut removed = Vec::new();
        for child in self.children() {
            removed.extend(child.collect_done_children());
        }

        let mut children = self.children.lock();
        let had_children = !children.is_empty();
        let (finished, keep): (Vec<_>, Vec<_>) =
            children.drain(..).partition(|c| c.is_done());
        *children = keep;
        let now_empty = children.is_empty();
        drop(children);

        for child in &finished {
            child.set_flags(RecallFlags::REMOVED);
            *child.parent.lock() = Weak::new();
        }

        if had_children
            && now_empty
            && !finished.is_empty()
            && self.has_flags(RecallFlags::PROPAGATE_DONE)
        {
            self.done();
        }

        removed.extend(finished);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortValue;
    use crate::recycling_context::{RecyclingContext, SoundScope};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        label: String,
        log: Log,
        record_inter: bool,
        release_tics: usize,
    }

    impl Recorder {
        fn new(label: &str, log: &Log) -> Self {
            Self {
                label: label.to_string(),
                log: Arc::clone(log),
                record_inter: true,
                release_tics: 0,
            }
        }

        fn push(&self, phase: &str) {
            self.log.lock().push(format!("{}.{}", self.label, phase));
        }
    }

    impl RecallBehavior for Recorder {
        fn duplicate(&self) -> Box<dyn RecallBehavior> {
            Box::new(Recorder {
                label: self.label.clone(),
                log: Arc::clone(&self.log),
                record_inter: self.record_inter,
                release_tics: self.release_tics,
            })
        }

        fn run_init_pre(&mut self, _recall: &Recall) -> Result<()> {
            self.push("run_init_pre");
            Ok(())
        }

        fn run_init_post(&mut self, _recall: &Recall) -> Result<()> {
            self.push("run_init_post");
            Ok(())
        }

        fn run_pre(&mut self, _recall: &Recall) -> Result<()> {
            self.push("run_pre");
            Ok(())
        }

        fn run_inter(&mut self, recall: &Recall) -> Result<()> {
            if self.record_inter {
                self.push("run_inter");
            }
            if recall.is_cancelled() {
                if self.release_tics == 0 {
                    recall.done();
                } else {
                    self.release_tics -= 1;
                }
            }
            Ok(())
        }

        fn run_post(&mut self, _recall: &Recall) -> Result<()> {
            self.push("run_post");
            Ok(())
        }

        fn cancel(&mut self, _recall: &Recall) -> CancelAction {
            if self.release_tics > 0 {
                CancelAction::Release
            } else {
                CancelAction::Done
            }
        }
    }

    fn run_id() -> Arc<RecallId> {
        RecallId::new(&RecyclingContext::new(SoundScope::Playback, 1))
    }

    #[test]
    fn test_builder_makes_template() {
        let template = Recall::builder("volume", RecallKind::Channel).build();
        assert!(template.is_template());
        assert!(template.recall_id().is_none());
        assert!(matches!(template.run_tic(), Err(Error::Template(_))));
    }

    #[test]
    fn test_duplicate_clears_template_and_binds_id() {
        let template = Recall::builder("volume", RecallKind::Channel)
            .flags(RecallFlags::PROPAGATE_DONE)
            .build();
        let id = run_id();
        let instance = template.duplicate(&id);
        assert!(!instance.is_template());
        assert!(instance.has_flags(RecallFlags::PROPAGATE_DONE));
        assert!(Arc::ptr_eq(&instance.recall_id().unwrap(), &id));
        assert_ne!(instance.id(), template.id());
    }

    #[test]
    fn test_duplicate_rebuilds_children() {
        let template = Recall::builder("play", RecallKind::Channel).build();
        let child = Recall::builder("play-recycling", RecallKind::Recycling).build();
        template.add_child(child);

        let id = run_id();
        let instance = template.duplicate(&id);
        let children = instance.children();
        assert_eq!(children.len(), 1);
        assert!(Arc::ptr_eq(&children[0].parent().unwrap(), &instance));
        assert!(!children[0].is_template());
        assert!(Arc::ptr_eq(&children[0].recall_id().unwrap(), &id));
        // template children untouched
        assert!(template.children()[0].is_template());
    }

    #[test]
    fn test_duplicate_shares_ports_and_copies_local_ports() {
        let template = Recall::builder("synth", RecallKind::Channel)
            .port(Port::new("volume", PortValue::Float(1.0)))
            .local_port(Port::new("pitch", PortValue::Float(0.0)))
            .build();
        let a = template.duplicate(&run_id());
        let b = template.duplicate(&run_id());

        assert!(Arc::ptr_eq(&a.port("volume").unwrap(), &template.port("volume").unwrap()));
        a.port("pitch").unwrap().set(PortValue::Float(3.0)).unwrap();
        b.port("pitch").unwrap().set(PortValue::Float(-2.0)).unwrap();
        assert_eq!(a.port("pitch").unwrap().get_f32(), 3.0);
        assert_eq!(b.port("pitch").unwrap().get_f32(), -2.0);
        assert_eq!(template.port("pitch").unwrap().get_f32(), 0.0);
    }

    #[test]
    fn test_set_recall_id_recursive() {
        let template = Recall::builder("a", RecallKind::Channel).build();
        template.add_child(Recall::builder("b", RecallKind::Recycling).build());
        let instance = template.duplicate(&run_id());
        let other = run_id();
        instance.set_recall_id(Some(Arc::clone(&other)));
        assert!(Arc::ptr_eq(&instance.children()[0].recall_id().unwrap(), &other));
    }

    #[test]
    fn test_phase_order_sandwich() {
        let log: Log = Arc::default();
        let mut parent_rec = Recorder::new("parent", &log);
        parent_rec.record_inter = false;
        let parent = Recall::builder("parent", RecallKind::Channel)
            .behavior(parent_rec)
            .build();
        parent.add_child(
            Recall::builder("child1", RecallKind::Recycling)
                .behavior(Recorder::new("child1", &log))
                .build(),
        );
        parent.add_child(
            Recall::builder("child2", RecallKind::Recycling)
                .behavior(Recorder::new("child2", &log))
                .build(),
        );

        let instance = parent.duplicate(&run_id());
        instance.run_tic().unwrap();
        log.lock().clear();
        instance.run_tic().unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "parent.run_pre",
                "child1.run_pre",
                "child2.run_pre",
                "child1.run_inter",
                "child2.run_inter",
                "child1.run_post",
                "child2.run_post",
                "parent.run_post",
            ]
        );
    }

    #[test]
    fn test_init_phases_run_once() {
        let log: Log = Arc::default();
        let template = Recall::builder("x", RecallKind::Channel)
            .behavior(Recorder::new("x", &log))
            .build();
        let instance = template.duplicate(&run_id());
        instance.run_tic().unwrap();
        assert!(instance.has_flags(RecallFlags::RUN_INITIALIZED));
        assert!(!instance.is_initial_run());
        instance.run_tic().unwrap();
        let inits = log
            .lock()
            .iter()
            .filter(|l| l.contains("run_init"))
            .count();
        assert_eq!(inits, 2);
    }

    #[test]
    fn test_done_is_idempotent() {
        let instance = Recall::builder("x", RecallKind::Channel)
            .build()
            .duplicate(&run_id());
        assert!(instance.done());
        assert!(!instance.done());
        assert!(instance.is_done());
    }

    #[test]
    fn test_done_ignored_by_template_and_persistent() {
        let template = Recall::builder("x", RecallKind::Channel)
            .flags(RecallFlags::PERSISTENT)
            .build();
        assert!(!template.done());
        let instance = template.duplicate(&run_id());
        assert!(!instance.done());
        instance.stop_persistent();
        assert!(instance.is_done());
    }

    #[test]
    fn test_done_removed_at_boundary_and_propagates() {
        let template = Recall::builder("parent", RecallKind::Channel)
            .flags(RecallFlags::PROPAGATE_DONE)
            .build();
        template.add_child(Recall::builder("child", RecallKind::Recycling).build());
        let instance = template.duplicate(&run_id());
        let child = instance.children()[0].clone();

        child.done();
        assert_eq!(instance.children().len(), 1, "removal waits for the boundary");

        let removed = instance.collect_done_children();
        assert_eq!(removed.len(), 1);
        assert!(child.has_flags(RecallFlags::REMOVED));
        assert!(instance.is_done());
        assert!(instance.collect_done_children().is_empty());
    }

    #[test]
    fn test_cancel_done_at_next_run_pre() {
        let log: Log = Arc::default();
        let instance = Recall::builder("x", RecallKind::Channel)
            .behavior(Recorder::new("x", &log))
            .build()
            .duplicate(&run_id());
        instance.run_tic().unwrap();
        instance.cancel();
        assert!(!instance.is_done(), "cancel is observed at the next run_pre");
        instance.run_tic().unwrap();
        assert!(instance.is_done());
    }

    #[test]
    fn test_cancel_with_release_runs_more_inter_phases() {
        let log: Log = Arc::default();
        let mut rec = Recorder::new("x", &log);
        rec.release_tics = 2;
        let instance = Recall::builder("x", RecallKind::Channel)
            .behavior(rec)
            .build()
            .duplicate(&run_id());
        instance.run_tic().unwrap();
        instance.cancel();
        log.lock().clear();
        for _ in 0..3 {
            instance.run_tic().unwrap();
        }
        let inters = log.lock().iter().filter(|l| l.ends_with("run_inter")).count();
        assert_eq!(inters, 3);
        assert!(instance.is_done());
    }

    #[test]
    fn test_cancel_reaches_children_first() {
        let template = Recall::builder("parent", RecallKind::Channel)
            .flags(RecallFlags::PERSISTENT)
            .build();
        template.add_child(Recall::builder("child", RecallKind::Recycling).build());
        let instance = template.duplicate(&run_id());
        instance.cancel();
        assert!(instance.children()[0].is_cancelled());
        assert!(!instance.has_flags(RecallFlags::PERSISTENT));
    }

    #[test]
    fn test_resolve_dependencies() {
        let id = run_id();
        let counter = Recall::builder("count-beats", RecallKind::Audio)
            .build()
            .duplicate(&id);
        let pattern = Recall::builder("pattern", RecallKind::Audio)
            .dependency(RecallDependency::required("count-beats"))
            .build()
            .duplicate(&id);
        let siblings = vec![Arc::clone(&counter), Arc::clone(&pattern)];
        pattern.resolve_dependencies(&siblings).unwrap();
        assert!(Arc::ptr_eq(&pattern.dependency("count-beats").unwrap(), &counter));
    }

    #[test]
    fn test_unresolved_required_dependency_abandons_instance_only() {
        let id = run_id();
        let sibling = Recall::builder("volume", RecallKind::Audio)
            .build()
            .duplicate(&id);
        let pattern = Recall::builder("pattern", RecallKind::Audio)
            .dependency(RecallDependency::required("count-beats"))
            .dependency(RecallDependency::optional("delay"))
            .build()
            .duplicate(&id);
        let siblings = vec![Arc::clone(&sibling), Arc::clone(&pattern)];
        let err = pattern.resolve_dependencies(&siblings).unwrap_err();
        assert!(matches!(err, Error::UnresolvedDependency { .. }));
        assert!(pattern.has_flags(RecallFlags::ABANDONED));
        assert!(pattern.is_done());
        assert!(!sibling.is_done());
    }

    #[test]
    fn test_abandoned_child_does_not_stop_siblings() {
        let id = run_id();
        let parent = Recall::builder("channel", RecallKind::Channel)
            .build_instance(&id);
        let bad = Recall::builder("bad", RecallKind::Channel)
            .dependency(RecallDependency::required("missing"))
            .build_instance(&id);
        let good = Recall::builder("good", RecallKind::Channel)
            .dependency(RecallDependency::optional("count-beats"))
            .build_instance(&id);
        let counter = Recall::builder("count-beats", RecallKind::Channel)
            .build_instance(&id);
        parent.add_child(Arc::clone(&bad));
        parent.add_child(Arc::clone(&good));
        parent.add_child(Arc::clone(&counter));

        parent.resolve_dependencies(&[]).unwrap();
        assert!(bad.has_flags(RecallFlags::ABANDONED));
        assert!(bad.is_done());
        assert!(!good.is_done());
        assert!(Arc::ptr_eq(&good.dependency("count-beats").unwrap(), &counter));
    }

    #[test]
    fn test_dependency_from_other_run_not_bound() {
        let counter = Recall::builder("count-beats", RecallKind::Audio)
            .build()
            .duplicate(&run_id());
        let pattern = Recall::builder("pattern", RecallKind::Audio)
            .dependency(RecallDependency::optional("count-beats"))
            .build()
            .duplicate(&run_id());
        pattern
            .resolve_dependencies(&[Arc::clone(&counter), Arc::clone(&pattern)])
            .unwrap();
        assert!(pattern.dependency("count-beats").is_none());
    }

    #[test]
    fn test_find_port_searches_ancestors() {
        let template = Recall::builder("parent", RecallKind::Channel)
            .port(Port::new("muted", PortValue::Bool(true)))
            .build();
        template.add_child(Recall::builder("child", RecallKind::Recycling).build());
        let instance = template.duplicate(&run_id());
        let child = instance.children()[0].clone();
        assert!(child.port("muted").is_none());
        assert!(child.find_port("muted").unwrap().get_bool());
    }
}
