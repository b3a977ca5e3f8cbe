//! One input or output line of an [`Audio`].
//!
//! A channel owns one [`Recycling`] (its voice slot chain head), carries its
//! position in the audio's layout (pad, audio channel, line) and holds a
//! play list and a recall list of recalls bound to it.
//!
//! Output lines may be linked to input lines of another audio. A linked
//! input reads the output's recycling instead of its own, which is how
//! machines are patched together.

use crate::audio::Audio;
use crate::error::{Error, Result};
use crate::format::SampleFormat;
use crate::id::next_id;
use crate::recall::{self, Recall, RecallEvent, RecallKind, RecallTarget};
use crate::recall_id::RecallId;
use crate::recycling::Recycling;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Direction of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Produces audio.
    Output,
    /// Consumes audio.
    Input,
}

impl ChannelKind {
    /// Lowercase name, for logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            ChannelKind::Output => "output",
            ChannelKind::Input => "input",
        }
    }
}

/// One line of an audio.
#[derive(Debug)]
pub struct Channel {
    id: u64,
    kind: ChannelKind,
    audio: Mutex<Weak<Audio>>,
    pad: AtomicUsize,
    audio_channel: AtomicUsize,
    line: AtomicUsize,
    link: Mutex<Weak<Channel>>,
    recycling: Mutex<Arc<Recycling>>,
    play: Mutex<Vec<Arc<Recall>>>,
    recall: Mutex<Vec<Arc<Recall>>>,
    self_ref: Weak<Channel>,
}

impl Channel {
    /// Create a detached channel owning `recycling`.
    pub fn new(kind: ChannelKind, recycling: Arc<Recycling>) -> Arc<Self> {
        let channel = Arc::new_cyclic(|self_ref: &Weak<Channel>| {
            recycling.set_channel(self_ref.clone());
            Self {
                id: next_id(),
                kind,
                audio: Mutex::new(Weak::new()),
                pad: AtomicUsize::new(0),
                audio_channel: AtomicUsize::new(0),
                line: AtomicUsize::new(0),
                link: Mutex::new(Weak::new()),
                recycling: Mutex::new(recycling),
                play: Mutex::new(Vec::new()),
                recall: Mutex::new(Vec::new()),
                self_ref: self_ref.clone(),
            }
        });
        tracing::debug!(channel = channel.id, kind = kind.name(), "channel created");
        channel
    }

    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Direction.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Whether this is an output line.
    pub fn is_output(&self) -> bool {
        self.kind == ChannelKind::Output
    }

    /// Owning audio.
    pub fn audio(&self) -> Option<Arc<Audio>> {
        self.audio.lock().upgrade()
    }

    pub(crate) fn attach(&self, audio: Weak<Audio>, pad: usize, audio_channel: usize, line: usize) {
        *self.audio.lock() = audio;
        self.pad.store(pad, Ordering::Release);
        self.audio_channel.store(audio_channel, Ordering::Release);
        self.line.store(line, Ordering::Release);
    }

    /// Pad index.
    pub fn pad(&self) -> usize {
        self.pad.load(Ordering::Acquire)
    }

    /// Audio channel within the pad.
    pub fn audio_channel(&self) -> usize {
        self.audio_channel.load(Ordering::Acquire)
    }

    /// Line index: `pad * audio_channels + audio_channel`.
    pub fn line(&self) -> usize {
        self.line.load(Ordering::Acquire)
    }

    // --- Topology ---

    /// Next line of the same kind.
    pub fn next(&self) -> Option<Arc<Channel>> {
        self.audio()?.channel(self.kind, self.line() + 1).ok()
    }

    /// Previous line of the same kind.
    pub fn prev(&self) -> Option<Arc<Channel>> {
        let line = self.line().checked_sub(1)?;
        self.audio()?.channel(self.kind, line).ok()
    }

    /// Same audio channel on the next pad.
    pub fn next_pad(&self) -> Option<Arc<Channel>> {
        let audio = self.audio()?;
        audio
            .channel_at(self.kind, self.pad() + 1, self.audio_channel())
            .ok()
    }

    /// Linked channel, if any.
    pub fn link(&self) -> Option<Arc<Channel>> {
        self.link.lock().upgrade()
    }

    /// Link an output line with an input line, replacing previous links of both.
    pub fn set_link(a: &Arc<Channel>, b: &Arc<Channel>) -> Result<()> {
        if a.kind == b.kind {
            return Err(Error::InvalidLink(a.kind.name()));
        }
        Self::unlink(a);
        Self::unlink(b);
        *a.link.lock() = Arc::downgrade(b);
        *b.link.lock() = Arc::downgrade(a);
        tracing::debug!(a = a.id, b = b.id, "channels linked");
        Ok(())
    }

    /// Remove the link on both sides.
    pub fn unlink(channel: &Arc<Channel>) {
        let previous = std::mem::take(&mut *channel.link.lock());
        if let Some(other) = previous.upgrade() {
            let mut back = other.link.lock();
            if back.upgrade().is_some_and(|c| Arc::ptr_eq(&c, channel)) {
                *back = Weak::new();
            }
        }
    }

    // --- Recyclings ---

    /// The channel's own recycling.
    pub fn recycling(&self) -> Arc<Recycling> {
        Arc::clone(&self.recycling.lock())
    }

    /// Recycling that carries audio for this line.
    ///
    /// Linked inputs read the output's recycling.
    pub fn effective_recycling(&self) -> Arc<Recycling> {
        if self.kind == ChannelKind::Input {
            if let Some(output) = self.link() {
                return output.recycling();
            }
        }
        self.recycling()
    }

    /// Replace the owned recycling. Returns the old one for disposal.
    pub fn set_recycling(&self, recycling: Arc<Recycling>) -> Arc<Recycling> {
        recycling.set_channel(self.self_ref.clone());
        std::mem::replace(&mut *self.recycling.lock(), recycling)
    }

    // --- Recall lists ---

    /// Snapshot of the play list.
    pub fn play(&self) -> Vec<Arc<Recall>> {
        self.play.lock().clone()
    }

    /// Snapshot of the recall list.
    pub fn recall(&self) -> Vec<Arc<Recall>> {
        self.recall.lock().clone()
    }

    /// Append to the play list.
    pub fn add_play(&self, recall: Arc<Recall>) {
        self.play.lock().push(recall);
    }

    /// Append to the recall list.
    pub fn add_recall(&self, recall: Arc<Recall>) {
        self.recall.lock().push(recall);
    }

    /// Instantiate every template of both lists for `recall_id`.
    ///
    /// Instances are bound to this channel (channel recalls) or to its
    /// effective recycling (recycling recalls), appended next to their
    /// template and returned. Dependencies resolve among the returned
    /// instances.
    pub fn duplicate_recall(&self, recall_id: &Arc<RecallId>) -> Vec<Arc<Recall>> {
        let created = self.instantiate(recall_id);
        self.resolve_within(&created, &created);
        created
    }

    /// Like [`duplicate_recall`](Self::duplicate_recall) without resolving.
    pub(crate) fn instantiate(&self, recall_id: &Arc<RecallId>) -> Vec<Arc<Recall>> {
        let mut created = Vec::new();
        for list in [&self.play, &self.recall] {
            let templates: Vec<_> = list.lock().iter().filter(|r| r.is_template()).cloned().collect();
            let instances: Vec<_> = templates
                .iter()
                .map(|template| {
                    let instance = template.duplicate(recall_id);
                    self.bind_targets(&instance);
                    instance
                })
                .collect();
            list.lock().extend(instances.iter().cloned());
            created.extend(instances);
        }
        tracing::debug!(
            channel = self.id,
            recall_id = recall_id.id(),
            instances = created.len(),
            "recalls duplicated"
        );
        created
    }

    /// Resolve the dependencies of `instances` against `scope`.
    pub(crate) fn resolve_within(&self, instances: &[Arc<Recall>], scope: &[Arc<Recall>]) {
        for instance in instances {
            if let Err(err) = instance.resolve_dependencies(scope) {
                tracing::warn!(channel = self.id, error = %err, "dependency resolution failed");
            }
        }
    }

    fn bind_targets(&self, recall: &Arc<Recall>) {
        if matches!(recall.target(), RecallTarget::None) {
            match recall.kind() {
                RecallKind::Channel => recall.set_target(RecallTarget::Channel(self.self_ref.clone())),
                RecallKind::Recycling => recall.set_target(RecallTarget::Recycling(Arc::downgrade(
                    &self.effective_recycling(),
                ))),
                RecallKind::Audio | RecallKind::AudioSignal => {}
            }
        }
        for child in recall.children() {
            self.bind_targets(&child);
        }
    }

    /// Request cancellation of every instance running under `recall_id`'s context.
    pub fn cancel_recall(&self, recall_id: &RecallId) -> usize {
        let mut cancelled = 0;
        for recall in self.play().into_iter().chain(self.recall()) {
            if recall.recall_id().is_some_and(|id| id.same_context(recall_id)) {
                recall.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Run one tic over the play list, then the recall list.
    pub fn run_tic(&self) {
        let play = self.play();
        let recall = self.recall();
        recall::run_tic(&[&play, &recall]);
    }

    /// Unlink finished recalls from both lists. Call between tics.
    pub fn collect_done(&self) -> Vec<Arc<Recall>> {
        let mut removed = recall::collect_done(&mut self.play.lock());
        removed.extend(recall::collect_done(&mut self.recall.lock()));
        removed
    }

    // --- Configuration ---

    /// Forward a buffer size change to the recycling and recalls.
    pub fn set_buffer_size(&self, buffer_size: usize) {
        self.recycling().set_buffer_size(buffer_size);
        self.notify(&RecallEvent::BufferSize(buffer_size));
    }

    /// Forward a sample rate change to the recycling and recalls.
    pub fn set_samplerate(&self, samplerate: u32) {
        self.recycling().set_samplerate(samplerate);
        self.notify(&RecallEvent::Samplerate(samplerate));
    }

    /// Forward a format change to the recycling and recalls.
    pub fn set_format(&self, format: SampleFormat) {
        self.recycling().set_format(format);
        self.notify(&RecallEvent::Format(format));
    }

    fn notify(&self, event: &RecallEvent) {
        for recall in self.play().into_iter().chain(self.recall()) {
            recall.notify(event);
        }
    }
}
