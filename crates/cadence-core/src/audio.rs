//! Top-level machines.
//!
//! An [`Audio`] owns its output and input [`Channel`]s, laid out pad-major:
//! line `pad * audio_channels + audio_channel`. Every pad carries the same
//! number of audio channels, so resizing either dimension rebuilds the
//! whole layout while reusing channels whose (pad, audio channel) position
//! survives.
//!
//! # Example
//!
//! ```rust
//! use cadence_core::{Audio, ChannelKind, SampleFormat};
//!
//! let audio = Audio::new("synth", 48000, 256, SampleFormat::Float);
//! audio.set_audio_channels(2);
//! audio.set_pads(ChannelKind::Output, 1);
//! audio.set_pads(ChannelKind::Input, 4);
//! assert_eq!(audio.channels(ChannelKind::Input).len(), 8);
//! assert!(audio.is_uniform());
//! ```

use crate::channel::{Channel, ChannelKind};
use crate::error::{Error, Result};
use crate::format::SampleFormat;
use crate::id::next_id;
use crate::recall::{self, Recall, RecallEvent, RecallKind, RecallTarget};
use crate::recall_id::RecallId;
use crate::recycling::Recycling;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Default)]
struct Layout {
    audio_channels: usize,
    output_pads: usize,
    input_pads: usize,
    outputs: Vec<Arc<Channel>>,
    inputs: Vec<Arc<Channel>>,
}

impl Layout {
    fn pads(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Output => self.output_pads,
            ChannelKind::Input => self.input_pads,
        }
    }

    fn lines(&self, kind: ChannelKind) -> &Vec<Arc<Channel>> {
        match kind {
            ChannelKind::Output => &self.outputs,
            ChannelKind::Input => &self.inputs,
        }
    }
}

/// A machine with output and input lines.
#[derive(Debug)]
pub struct Audio {
    id: u64,
    name: String,
    samplerate: AtomicU32,
    buffer_size: AtomicUsize,
    format: Mutex<SampleFormat>,
    layout: Mutex<Layout>,
    play: Mutex<Vec<Arc<Recall>>>,
    recall: Mutex<Vec<Arc<Recall>>>,
    self_ref: Weak<Audio>,
}

impl Audio {
    /// Create an audio with no lines.
    pub fn new(name: impl Into<String>, samplerate: u32, buffer_size: usize, format: SampleFormat) -> Arc<Self> {
        let audio = Arc::new_cyclic(|self_ref| Self {
            id: next_id(),
            name: name.into(),
            samplerate: AtomicU32::new(samplerate),
            buffer_size: AtomicUsize::new(buffer_size),
            format: Mutex::new(format),
            layout: Mutex::new(Layout::default()),
            play: Mutex::new(Vec::new()),
            recall: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        });
        tracing::info!(audio = %audio.name, samplerate, buffer_size, %format, "audio created");
        audio
    }

    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Machine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sample rate in Hz.
    pub fn samplerate(&self) -> u32 {
        self.samplerate.load(Ordering::Acquire)
    }

    /// Frames per buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.load(Ordering::Acquire)
    }

    /// Storage format of new signals.
    pub fn format(&self) -> SampleFormat {
        *self.format.lock()
    }

    // --- Layout ---

    /// Audio channels per pad.
    pub fn audio_channels(&self) -> usize {
        self.layout.lock().audio_channels
    }

    /// Pad count of one direction.
    pub fn pads(&self, kind: ChannelKind) -> usize {
        self.layout.lock().pads(kind)
    }

    /// Snapshot of the lines of one direction, in line order.
    pub fn channels(&self, kind: ChannelKind) -> Vec<Arc<Channel>> {
        self.layout.lock().lines(kind).clone()
    }

    /// Line `line` of one direction.
    pub fn channel(&self, kind: ChannelKind, line: usize) -> Result<Arc<Channel>> {
        let layout = self.layout.lock();
        let lines = layout.lines(kind);
        lines.get(line).cloned().ok_or(Error::ChannelOutOfRange {
            index: line,
            len: lines.len(),
        })
    }

    /// Line at (`pad`, `audio_channel`).
    pub fn channel_at(&self, kind: ChannelKind, pad: usize, audio_channel: usize) -> Result<Arc<Channel>> {
        let layout = self.layout.lock();
        if audio_channel >= layout.audio_channels || pad >= layout.pads(kind) {
            return Err(Error::ChannelOutOfRange {
                index: pad * layout.audio_channels.max(1) + audio_channel,
                len: layout.lines(kind).len(),
            });
        }
        Ok(Arc::clone(&layout.lines(kind)[pad * layout.audio_channels + audio_channel]))
    }

    /// Whether every pad of both directions carries `audio_channels` lines.
    pub fn is_uniform(&self) -> bool {
        let layout = self.layout.lock();
        layout.outputs.len() == layout.output_pads * layout.audio_channels
            && layout.inputs.len() == layout.input_pads * layout.audio_channels
            && [ChannelKind::Output, ChannelKind::Input].iter().all(|&kind| {
                layout.lines(kind).iter().enumerate().all(|(line, ch)| {
                    ch.line() == line
                        && ch.pad() == line / layout.audio_channels.max(1)
                        && ch.audio_channel() == line % layout.audio_channels.max(1)
                })
            })
    }

    /// Change the audio channel count of every pad, both directions.
    ///
    /// Returns the channels that were removed.
    pub fn set_audio_channels(&self, audio_channels: usize) -> Vec<Arc<Channel>> {
        let mut layout = self.layout.lock();
        let old = layout.audio_channels;
        layout.audio_channels = audio_channels;
        let mut removed = self.relayout(&mut layout, ChannelKind::Output, old);
        removed.extend(self.relayout(&mut layout, ChannelKind::Input, old));
        drop(layout);
        tracing::debug!(audio = %self.name, old, new = audio_channels, "audio channels resized");
        removed
    }

    /// Change the pad count of one direction.
    ///
    /// Returns the channels that were removed.
    pub fn set_pads(&self, kind: ChannelKind, pads: usize) -> Vec<Arc<Channel>> {
        let mut layout = self.layout.lock();
        let old = layout.pads(kind);
        match kind {
            ChannelKind::Output => layout.output_pads = pads,
            ChannelKind::Input => layout.input_pads = pads,
        }
        let audio_channels = layout.audio_channels;
        let removed = self.relayout(&mut layout, kind, audio_channels);
        drop(layout);
        tracing::debug!(audio = %self.name, kind = kind.name(), old, new = pads, "pads resized");
        removed
    }

    fn relayout(&self, layout: &mut Layout, kind: ChannelKind, old_audio_channels: usize) -> Vec<Arc<Channel>> {
        let pads = layout.pads(kind);
        let audio_channels = layout.audio_channels;
        let old_lines = match kind {
            ChannelKind::Output => std::mem::take(&mut layout.outputs),
            ChannelKind::Input => std::mem::take(&mut layout.inputs),
        };
        let old_pads = if old_audio_channels == 0 {
            0
        } else {
            old_lines.len() / old_audio_channels
        };

        let mut slots: Vec<Option<Arc<Channel>>> = old_lines.into_iter().map(Some).collect();
        let mut lines = Vec::with_capacity(pads * audio_channels);
        for pad in 0..pads {
            for audio_channel in 0..audio_channels {
                let reused = (pad < old_pads && audio_channel < old_audio_channels)
                    .then(|| slots[pad * old_audio_channels + audio_channel].take())
                    .flatten();
                let channel = reused.unwrap_or_else(|| {
                    Channel::new(
                        kind,
                        Recycling::with_template(self.samplerate(), self.buffer_size(), self.format()),
                    )
                });
                channel.attach(self.self_ref.clone(), pad, audio_channel, lines.len());
                lines.push(channel);
            }
        }

        for pair in lines.windows(2) {
            Recycling::link(&pair[0].recycling(), &pair[1].recycling());
        }
        if let Some(first) = lines.first() {
            first.recycling().unlink_prev();
        }
        if let Some(last) = lines.last() {
            last.recycling().unlink_next();
        }

        let removed: Vec<_> = slots.into_iter().flatten().collect();
        for channel in &removed {
            channel.attach(Weak::new(), 0, 0, 0);
            Channel::unlink(channel);
            let recycling = channel.recycling();
            recycling.unlink_prev();
            recycling.unlink_next();
        }

        match kind {
            ChannelKind::Output => layout.outputs = lines,
            ChannelKind::Input => layout.inputs = lines,
        }
        removed
    }

    // --- Recall lists ---

    /// Snapshot of the audio-level play list.
    pub fn play(&self) -> Vec<Arc<Recall>> {
        self.play.lock().clone()
    }

    /// Snapshot of the audio-level recall list.
    pub fn recall(&self) -> Vec<Arc<Recall>> {
        self.recall.lock().clone()
    }

    /// Append to the audio-level play list.
    pub fn add_play(&self, recall: Arc<Recall>) {
        self.play.lock().push(recall);
    }

    /// Append to the audio-level recall list.
    pub fn add_recall(&self, recall: Arc<Recall>) {
        self.recall.lock().push(recall);
    }

    /// Instantiate every audio-level template and every template of every
    /// output line for `recall_id`.
    ///
    /// Audio-level instances resolve among themselves. Each line's instances
    /// resolve against the audio-level instances plus that line's own, so a
    /// channel recall may depend on an audio recall but never on a recall of
    /// another line.
    pub fn duplicate_recall(&self, recall_id: &Arc<RecallId>) -> Vec<Arc<Recall>> {
        let mut created = Vec::new();
        for list in [&self.play, &self.recall] {
            let templates: Vec<_> = list.lock().iter().filter(|r| r.is_template()).cloned().collect();
            let instances: Vec<_> = templates
                .iter()
                .map(|template| {
                    let target = (template.kind() == RecallKind::Audio
                        && matches!(template.target(), RecallTarget::None))
                    .then(|| RecallTarget::Audio(self.self_ref.clone()));
                    template.duplicate_with_target(recall_id, target)
                })
                .collect();
            list.lock().extend(instances.iter().cloned());
            created.extend(instances);
        }
        for instance in &created {
            if let Err(err) = instance.resolve_dependencies(&created) {
                tracing::warn!(audio = %self.name, error = %err, "dependency resolution failed");
            }
        }
        let audio_level = created.len();
        for channel in self.channels(ChannelKind::Output) {
            let instances = channel.instantiate(recall_id);
            let scope: Vec<_> = created[..audio_level].iter().chain(&instances).cloned().collect();
            channel.resolve_within(&instances, &scope);
            created.extend(instances);
        }
        created
    }

    /// Request cancellation of every instance under `recall_id`'s context.
    pub fn cancel_recall(&self, recall_id: &RecallId) -> usize {
        let mut cancelled = 0;
        for recall in self.play().into_iter().chain(self.recall()) {
            if recall.recall_id().is_some_and(|id| id.same_context(recall_id)) {
                recall.cancel();
                cancelled += 1;
            }
        }
        for channel in self.channels(ChannelKind::Output) {
            cancelled += channel.cancel_recall(recall_id);
        }
        cancelled
    }

    /// Run one tic: audio-level lists, then every output line.
    pub fn run_tic(&self) {
        let play = self.play();
        let recall = self.recall();
        recall::run_tic(&[&play, &recall]);
        for channel in self.channels(ChannelKind::Output) {
            channel.run_tic();
        }
    }

    /// Unlink finished recalls everywhere. Call between tics.
    pub fn collect_done(&self) -> Vec<Arc<Recall>> {
        let mut removed = recall::collect_done(&mut self.play.lock());
        removed.extend(recall::collect_done(&mut self.recall.lock()));
        for kind in [ChannelKind::Output, ChannelKind::Input] {
            for channel in self.channels(kind) {
                removed.extend(channel.collect_done());
            }
        }
        removed
    }

    // --- Configuration ---

    fn all_channels(&self) -> Vec<Arc<Channel>> {
        let layout = self.layout.lock();
        layout.outputs.iter().chain(&layout.inputs).cloned().collect()
    }

    fn notify(&self, event: &RecallEvent) {
        for recall in self.play().into_iter().chain(self.recall()) {
            recall.notify(event);
        }
    }

    /// Change frames per buffer for every signal and recall.
    pub fn set_buffer_size(&self, buffer_size: usize) -> Result<()> {
        if buffer_size == 0 {
            return Err(Error::InvalidConfig {
                what: "buffer size",
                value: 0,
            });
        }
        self.buffer_size.store(buffer_size, Ordering::Release);
        for channel in self.all_channels() {
            channel.set_buffer_size(buffer_size);
        }
        self.notify(&RecallEvent::BufferSize(buffer_size));
        tracing::info!(audio = %self.name, buffer_size, "buffer size changed");
        Ok(())
    }

    /// Change the sample rate of every signal and recall.
    pub fn set_samplerate(&self, samplerate: u32) -> Result<()> {
        if samplerate == 0 {
            return Err(Error::InvalidConfig {
                what: "samplerate",
                value: 0,
            });
        }
        self.samplerate.store(samplerate, Ordering::Release);
        for channel in self.all_channels() {
            channel.set_samplerate(samplerate);
        }
        self.notify(&RecallEvent::Samplerate(samplerate));
        tracing::info!(audio = %self.name, samplerate, "samplerate changed");
        Ok(())
    }

    /// Change the storage format of every signal.
    pub fn set_format(&self, format: SampleFormat) {
        *self.format.lock() = format;
        for channel in self.all_channels() {
            channel.set_format(format);
        }
        self.notify(&RecallEvent::Format(format));
        tracing::info!(audio = %self.name, %format, "format changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recall::RecallDependency;
    use crate::recycling_context::{RecyclingContext, SoundScope};

    fn audio() -> Arc<Audio> {
        Audio::new("test", 48000, 64, SampleFormat::Float)
    }

    #[test]
    fn test_layout_is_pad_major() {
        let audio = audio();
        audio.set_audio_channels(2);
        audio.set_pads(ChannelKind::Output, 3);
        let ch = audio.channel(ChannelKind::Output, 3).unwrap();
        assert_eq!(ch.pad(), 1);
        assert_eq!(ch.audio_channel(), 1);
        assert!(Arc::ptr_eq(&audio.channel_at(ChannelKind::Output, 1, 1).unwrap(), &ch));
        assert!(Arc::ptr_eq(&ch.audio().unwrap(), &audio));
    }

    #[test]
    fn test_resize_keeps_surviving_channels() {
        let audio = audio();
        audio.set_audio_channels(2);
        audio.set_pads(ChannelKind::Input, 2);
        let kept = audio.channel_at(ChannelKind::Input, 1, 0).unwrap();
        let removed = audio.set_audio_channels(1);
        assert_eq!(removed.len(), 2);
        assert!(Arc::ptr_eq(&audio.channel_at(ChannelKind::Input, 1, 0).unwrap(), &kept));
        assert_eq!(kept.line(), 1);
        assert!(audio.is_uniform());
    }

    #[test]
    fn test_topology_helpers() {
        let audio = audio();
        audio.set_audio_channels(2);
        audio.set_pads(ChannelKind::Output, 2);
        let first = audio.channel(ChannelKind::Output, 0).unwrap();
        assert_eq!(first.next().unwrap().line(), 1);
        assert_eq!(first.next_pad().unwrap().line(), 2);
        assert!(first.prev().is_none());
        let last = audio.channel(ChannelKind::Output, 3).unwrap();
        assert!(last.next().is_none());
        assert!(Arc::ptr_eq(
            &first.recycling().next().unwrap(),
            &first.next().unwrap().recycling()
        ));
    }

    #[test]
    fn test_shrink_detaches_removed_recyclings() {
        let audio = audio();
        audio.set_audio_channels(1);
        audio.set_pads(ChannelKind::Output, 3);
        let removed = audio.set_pads(ChannelKind::Output, 2);
        assert_eq!(removed.len(), 1);

        let first = audio.channel(ChannelKind::Output, 0).unwrap();
        let last = audio.channel(ChannelKind::Output, 1).unwrap();
        assert!(first.recycling().prev().is_none());
        assert!(last.recycling().next().is_none());
        assert!(removed[0].recycling().prev().is_none());
        assert!(removed[0].recycling().next().is_none());
    }

    #[test]
    fn test_channel_out_of_range() {
        let audio = audio();
        assert!(matches!(
            audio.channel(ChannelKind::Output, 0),
            Err(Error::ChannelOutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_set_buffer_size_reaches_recyclings() {
        let audio = audio();
        audio.set_audio_channels(1);
        audio.set_pads(ChannelKind::Output, 1);
        audio.set_buffer_size(128).unwrap();
        let template = audio.channel(ChannelKind::Output, 0).unwrap().recycling().template().unwrap();
        assert_eq!(template.lock().buffer_size(), 128);
        assert!(audio.set_buffer_size(0).is_err());
    }

    #[test]
    fn test_duplicate_recall_covers_channels() {
        let audio = audio();
        audio.set_audio_channels(2);
        audio.set_pads(ChannelKind::Output, 1);
        audio.add_recall(Recall::builder("count-beats", RecallKind::Audio).build());
        for ch in audio.channels(ChannelKind::Output) {
            ch.add_play(Recall::builder("play", RecallKind::Channel).build());
        }
        let id = RecallId::new(&RecyclingContext::new(SoundScope::Sequencer, 2));
        let created = audio.duplicate_recall(&id);
        assert_eq!(created.len(), 3);
        assert!(Arc::ptr_eq(&created[0].audio().unwrap(), &audio));

        audio.run_tic();
        assert_eq!(audio.cancel_recall(&id), 3);
        audio.run_tic();
        assert_eq!(audio.collect_done().len(), 3);
    }

    #[test]
    fn test_channel_recall_resolves_audio_level_dependency() {
        let audio = audio();
        audio.set_audio_channels(2);
        audio.set_pads(ChannelKind::Output, 1);
        audio.add_recall(Recall::builder("delay", RecallKind::Audio).build());
        for ch in audio.channels(ChannelKind::Output) {
            ch.add_recall(
                Recall::builder("copy-pattern", RecallKind::Channel)
                    .dependency(RecallDependency::required("delay"))
                    .dependency(RecallDependency::optional("peak"))
                    .build(),
            );
        }
        let first = audio.channel(ChannelKind::Output, 0).unwrap();
        first.add_recall(Recall::builder("peak", RecallKind::Channel).build());

        let id = RecallId::new(&RecyclingContext::new(SoundScope::Sequencer, 2));
        let created = audio.duplicate_recall(&id);
        assert_eq!(created.len(), 4);
        let delay = &created[0];
        let patterns: Vec<_> = created.iter().filter(|r| r.name() == "copy-pattern").collect();
        assert_eq!(patterns.len(), 2);
        for pattern in &patterns {
            assert!(!pattern.is_done());
            assert!(Arc::ptr_eq(&pattern.dependency("delay").unwrap(), delay));
        }
        // the second line has no peak of its own and cannot see the first's
        let second = patterns
            .iter()
            .find(|p| Arc::ptr_eq(&p.channel().unwrap(), &audio.channel(ChannelKind::Output, 1).unwrap()))
            .unwrap();
        assert!(second.dependency("peak").is_none());
    }
}
