//! Run scopes forming a tree of nested performances.
//!
//! A [`RecyclingContext`] binds a [`SoundScope`] to a parent context and maps
//! each line of the scoped audio to the [`Recycling`] that run reads from.
//! A note-on under a sequencer run creates a child context of the
//! sequencer's context; ending the sequencer ends every child.
//!
//! Parents own their children (`Arc`), children point back with `Weak`.

use crate::id::next_id;
use crate::recycling::Recycling;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// The kind of performance a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundScope {
    /// Live playback of a single line.
    Playback,
    /// Pattern sequencer.
    Sequencer,
    /// Piano-roll notation.
    Notation,
    /// Audio region (wave) playback.
    Wave,
    /// Incoming MIDI.
    Midi,
}

impl SoundScope {
    /// All scopes, in declaration order.
    pub const ALL: [SoundScope; 5] = [
        SoundScope::Playback,
        SoundScope::Sequencer,
        SoundScope::Notation,
        SoundScope::Wave,
        SoundScope::Midi,
    ];

    /// Lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            SoundScope::Playback => "playback",
            SoundScope::Sequencer => "sequencer",
            SoundScope::Notation => "notation",
            SoundScope::Wave => "wave",
            SoundScope::Midi => "midi",
        }
    }
}

/// A scope token in the run tree.
#[derive(Debug)]
pub struct RecyclingContext {
    id: u64,
    sound_scope: SoundScope,
    parent: Mutex<Weak<RecyclingContext>>,
    children: Mutex<Vec<Arc<RecyclingContext>>>,
    recyclings: Mutex<Vec<Option<Arc<Recycling>>>>,
}

impl RecyclingContext {
    /// Create a root context with `length` line slots.
    pub fn new(sound_scope: SoundScope, length: usize) -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            sound_scope,
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            recyclings: Mutex::new(vec![None; length]),
        })
    }

    /// Create a context nested under `parent`.
    pub fn new_child(parent: &Arc<Self>, sound_scope: SoundScope, length: usize) -> Arc<Self> {
        let child = Self::new(sound_scope, length);
        Self::add_child(parent, &child);
        child
    }

    /// Attach `child` under `parent`, detaching it from any previous parent.
    pub fn add_child(parent: &Arc<Self>, child: &Arc<Self>) {
        if let Some(old) = child.parent() {
            old.remove_child(child);
        }
        *child.parent.lock() = Arc::downgrade(parent);
        parent.children.lock().push(Arc::clone(child));
    }

    /// Detach `child`. Returns whether it was a child of `self`.
    pub fn remove_child(&self, child: &Arc<Self>) -> bool {
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

    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The scope this context runs under.
    pub fn sound_scope(&self) -> SoundScope {
        self.sound_scope
    }

    /// Parent context, if still alive.
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.lock().upgrade()
    }

    /// Snapshot of the child contexts.
    pub fn children(&self) -> Vec<Arc<Self>> {
        self.children.lock().clone()
    }

    /// Parent chain, nearest first, ending at the root.
    pub fn ancestors(&self) -> Vec<Arc<Self>> {
        let mut chain = Vec::new();
        let mut current = self.parent();
        while let Some(ctx) = current {
            current = ctx.parent();
            chain.push(ctx);
        }
        chain
    }

    /// The root of this context's tree.
    pub fn root(self: &Arc<Self>) -> Arc<Self> {
        self.ancestors().pop().unwrap_or_else(|| Arc::clone(self))
    }

    /// Whether `other` is `self` or one of its ancestors.
    pub fn is_within(self: &Arc<Self>, other: &Arc<Self>) -> bool {
        Arc::ptr_eq(self, other) || self.ancestors().iter().any(|a| Arc::ptr_eq(a, other))
    }

    /// Nearest context (self first, then ancestors) running under `scope`.
    pub fn find_scope(self: &Arc<Self>, scope: SoundScope) -> Option<Arc<Self>> {
        if self.sound_scope == scope {
            return Some(Arc::clone(self));
        }
        self.ancestors().into_iter().find(|c| c.sound_scope == scope)
    }

    /// Number of line slots.
    pub fn length(&self) -> usize {
        self.recyclings.lock().len()
    }

    /// The recycling mapped to `line`.
    pub fn get_recycling(&self, line: usize) -> Option<Arc<Recycling>> {
        self.recyclings.lock().get(line).cloned().flatten()
    }

    /// Map `line` to `recycling`, growing the slot table if needed.
    pub fn replace(&self, recycling: Option<Arc<Recycling>>, line: usize) {
        let mut recyclings = self.recyclings.lock();
        if line >= recyclings.len() {
            recyclings.resize(line + 1, None);
        }
        recyclings[line] = recycling;
    }

    /// Line the given recycling is mapped to.
    pub fn find_recycling(&self, recycling: &Arc<Recycling>) -> Option<usize> {
        self.recyclings
            .lock()
            .iter()
            .position(|r| r.as_ref().is_some_and(|r| Arc::ptr_eq(r, recycling)))
    }

    /// Resize the slot table, dropping mappings past the new length.
    pub fn resize(&self, length: usize) {
        self.recyclings.lock().resize(length, None);
    }

    /// End this run: detach and finish every child, then clear the line table.
    pub fn finish(&self) {
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            *child.parent.lock() = Weak::new();
            child.finish();
        }
        self.recyclings.lock().iter_mut().for_each(|r| *r = None);
        tracing::debug!(context = self.id, scope = self.sound_scope.name(), "recycling context finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_links_both_ways() {
        let root = RecyclingContext::new(SoundScope::Sequencer, 2);
        let child = RecyclingContext::new_child(&root, SoundScope::Notation, 2);
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &root));
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn test_root_and_ancestors() {
        let root = RecyclingContext::new(SoundScope::Playback, 1);
        let mid = RecyclingContext::new_child(&root, SoundScope::Sequencer, 1);
        let leaf = RecyclingContext::new_child(&mid, SoundScope::Notation, 1);
        let chain = leaf.ancestors();
        assert_eq!(chain.len(), 2);
        assert!(Arc::ptr_eq(&chain[0], &mid));
        assert!(Arc::ptr_eq(&leaf.root(), &root));
        assert!(leaf.is_within(&root));
        assert!(!root.is_within(&leaf));
    }

    #[test]
    fn test_find_scope_walks_up() {
        let root = RecyclingContext::new(SoundScope::Sequencer, 1);
        let leaf = RecyclingContext::new_child(&root, SoundScope::Midi, 1);
        let found = leaf.find_scope(SoundScope::Sequencer).unwrap();
        assert!(Arc::ptr_eq(&found, &root));
        assert!(leaf.find_scope(SoundScope::Wave).is_none());
    }

    #[test]
    fn test_reparent_moves_child() {
        let a = RecyclingContext::new(SoundScope::Playback, 1);
        let b = RecyclingContext::new(SoundScope::Playback, 1);
        let child = RecyclingContext::new_child(&a, SoundScope::Notation, 1);
        RecyclingContext::add_child(&b, &child);
        assert!(a.children().is_empty());
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &b));
    }

    #[test]
    fn test_finish_detaches_children() {
        let root = RecyclingContext::new(SoundScope::Sequencer, 1);
        let child = RecyclingContext::new_child(&root, SoundScope::Notation, 1);
        let grandchild = RecyclingContext::new_child(&child, SoundScope::Notation, 1);
        root.finish();
        assert!(root.children().is_empty());
        assert!(child.parent().is_none());
        assert!(grandchild.parent().is_none());
    }

    #[test]
    fn test_replace_grows_table() {
        let ctx = RecyclingContext::new(SoundScope::Wave, 1);
        let recycling = Recycling::new();
        ctx.replace(Some(Arc::clone(&recycling)), 3);
        assert_eq!(ctx.length(), 4);
        assert_eq!(ctx.find_recycling(&recycling), Some(3));
        assert!(ctx.get_recycling(0).is_none());
    }
}
