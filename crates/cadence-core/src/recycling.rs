//! Voice slots holding the audio signals of one channel.
//!
//! A [`Recycling`] is an ordered, append-only list of [`SharedSignal`]s.
//! Signals are appended while a run is in progress; removal only happens
//! between tics, and removed signals go to the destroy worker.

use crate::audio_signal::{AudioSignal, SharedSignal};
use crate::channel::Channel;
use crate::format::SampleFormat;
use crate::id::next_id;
use crate::recall_id::RecallId;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// An ordered set of audio signals sharing one voice slot.
#[derive(Debug)]
pub struct Recycling {
    id: u64,
    channel: Mutex<Weak<Channel>>,
    next: Mutex<Weak<Recycling>>,
    prev: Mutex<Weak<Recycling>>,
    signals: Mutex<Vec<SharedSignal>>,
    self_ref: Weak<Recycling>,
}

impl Recycling {
    /// Create an unlinked recycling.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: next_id(),
            channel: Mutex::new(Weak::new()),
            next: Mutex::new(Weak::new()),
            prev: Mutex::new(Weak::new()),
            signals: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Create a recycling holding one template signal.
    pub fn with_template(samplerate: u32, buffer_size: usize, format: SampleFormat) -> Arc<Self> {
        let recycling = Self::new();
        let template = AudioSignal::new(samplerate, buffer_size, format)
            .with_flags(crate::audio_signal::SignalFlags::TEMPLATE);
        recycling.add_audio_signal(template.into_shared());
        recycling
    }

    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Owning channel.
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.lock().upgrade()
    }

    pub(crate) fn set_channel(&self, channel: Weak<Channel>) {
        *self.channel.lock() = channel;
    }

    /// Next recycling in the chain.
    pub fn next(&self) -> Option<Arc<Recycling>> {
        self.next.lock().upgrade()
    }

    /// Previous recycling in the chain.
    pub fn prev(&self) -> Option<Arc<Recycling>> {
        self.prev.lock().upgrade()
    }

    /// Chain `first` before `second`.
    pub fn link(first: &Arc<Recycling>, second: &Arc<Recycling>) {
        *first.next.lock() = Arc::downgrade(second);
        *second.prev.lock() = Arc::downgrade(first);
    }

    /// Drop the link to the next recycling.
    pub fn unlink_next(&self) {
        *self.next.lock() = Weak::new();
    }

    /// Drop the link to the previous recycling.
    pub fn unlink_prev(&self) {
        *self.prev.lock() = Weak::new();
    }

    /// Append a signal and take ownership of it.
    pub fn add_audio_signal(&self, signal: SharedSignal) {
        signal.lock().set_recycling(self.self_ref.clone());
        tracing::debug!(recycling = self.id, signal = signal.lock().id(), "audio signal added");
        self.signals.lock().push(signal);
    }

    /// Unlink a signal. The caller hands the result to the destroy worker.
    pub fn remove_audio_signal(&self, signal: &SharedSignal) -> Option<SharedSignal> {
        let mut signals = self.signals.lock();
        let index = signals.iter().position(|s| Arc::ptr_eq(s, signal))?;
        let removed = signals.remove(index);
        drop(signals);
        removed.lock().set_recycling(Weak::new());
        Some(removed)
    }

    /// Unlink every exhausted, non-template signal.
    pub fn remove_exhausted(&self) -> Vec<SharedSignal> {
        let mut signals = self.signals.lock();
        let (finished, keep): (Vec<_>, Vec<_>) = signals.drain(..).partition(|s| {
            let s = s.lock();
            !s.is_template() && s.is_exhausted()
        });
        *signals = keep;
        drop(signals);
        for s in &finished {
            s.lock().set_recycling(Weak::new());
        }
        finished
    }

    /// Snapshot of the linked signals.
    pub fn audio_signals(&self) -> Vec<SharedSignal> {
        self.signals.lock().clone()
    }

    /// Number of linked signals.
    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    /// Whether no signal is linked.
    pub fn is_empty(&self) -> bool {
        self.signals.lock().is_empty()
    }

    /// The template signal, if one is linked.
    pub fn template(&self) -> Option<SharedSignal> {
        AudioSignal::find_template(&self.audio_signals())
    }

    /// Signal bound to `recall_id`.
    pub fn find_by_recall_id(&self, recall_id: &Arc<RecallId>) -> Option<SharedSignal> {
        AudioSignal::find_by_recall_id(&self.audio_signals(), recall_id)
    }

    /// Whether a run under `recall_id`'s context still has a signal here.
    pub fn is_active(&self, recall_id: &RecallId) -> bool {
        AudioSignal::is_active(&self.audio_signals(), recall_id)
    }

    /// Apply a buffer size change to every signal.
    pub fn set_buffer_size(&self, buffer_size: usize) {
        for s in self.audio_signals() {
            s.lock().realloc_buffer_size(buffer_size);
        }
    }

    /// Apply a sample rate change to every signal.
    pub fn set_samplerate(&self, samplerate: u32) {
        for s in self.audio_signals() {
            s.lock().set_samplerate(samplerate);
        }
    }

    /// Apply a format change to every signal.
    pub fn set_format(&self, format: SampleFormat) {
        for s in self.audio_signals() {
            s.lock().set_format(format);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recycling_context::{RecyclingContext, SoundScope};

    #[test]
    fn test_add_sets_back_reference() {
        let recycling = Recycling::new();
        let signal = AudioSignal::new(48000, 16, SampleFormat::Float).into_shared();
        recycling.add_audio_signal(Arc::clone(&signal));
        let owner = signal.lock().recycling().unwrap();
        assert!(Arc::ptr_eq(&owner, &recycling));
        assert_eq!(recycling.len(), 1);
    }

    #[test]
    fn test_remove_clears_back_reference() {
        let recycling = Recycling::new();
        let signal = AudioSignal::new(48000, 16, SampleFormat::Float).into_shared();
        recycling.add_audio_signal(Arc::clone(&signal));
        assert!(recycling.remove_audio_signal(&signal).is_some());
        assert!(signal.lock().recycling().is_none());
        assert!(recycling.remove_audio_signal(&signal).is_none());
    }

    #[test]
    fn test_remove_exhausted_keeps_template_and_active() {
        let recycling = Recycling::with_template(48000, 16, SampleFormat::Float);
        let ctx = RecyclingContext::new(SoundScope::Playback, 1);
        let id = RecallId::new(&ctx);
        let mut active = AudioSignal::new(48000, 16, SampleFormat::Float).with_recall_id(Arc::clone(&id));
        active.stream_resize(2);
        let finished = AudioSignal::new(48000, 16, SampleFormat::Float);
        recycling.add_audio_signal(active.into_shared());
        recycling.add_audio_signal(finished.into_shared());

        let removed = recycling.remove_exhausted();
        assert_eq!(removed.len(), 1);
        assert_eq!(recycling.len(), 2);
        assert!(recycling.template().is_some());
        assert!(recycling.find_by_recall_id(&id).is_some());
    }

    #[test]
    fn test_chain_links() {
        let a = Recycling::new();
        let b = Recycling::new();
        Recycling::link(&a, &b);
        assert!(Arc::ptr_eq(&a.next().unwrap(), &b));
        assert!(Arc::ptr_eq(&b.prev().unwrap(), &a));

        a.unlink_next();
        b.unlink_prev();
        assert!(a.next().is_none());
        assert!(b.prev().is_none());
    }
}
