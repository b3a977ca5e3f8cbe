//! Consumes a signal's stream into a mix target.

use crate::signal::port_bool;
use cadence_core::{Port, PortValue, Recall, RecallBehavior, RecallKind, Result, SampleBuffer};
use std::sync::Arc;

/// Mixes the current buffer of its source into the current buffer of its
/// destination at `run_post`, then advances the source.
///
/// With `auto-sense` on, a source about to run out whose final buffer still
/// carries signal in its second half (a decaying tail) gets exactly one more
/// zeroed buffer appended instead of finishing. The instance is done once the
/// source is exhausted.
#[derive(Debug, Default, Clone)]
pub struct FxStreamSink {
    sensed: bool,
    mix: Option<SampleBuffer>,
}

impl FxStreamSink {
    /// Port enabling tail detection.
    pub const AUTO_SENSE: &'static str = "auto-sense";

    /// Audio-signal template; instances need a destination to mix into.
    pub fn template(auto_sense: bool) -> Arc<Recall> {
        Recall::builder("fx-stream-sink", RecallKind::AudioSignal)
            .port(Port::new(Self::AUTO_SENSE, PortValue::Bool(auto_sense)))
            .behavior(FxStreamSink::default())
            .build()
    }

    /// Whether this instance already extended its source.
    pub fn sensed(&self) -> bool {
        self.sensed
    }
}

impl RecallBehavior for FxStreamSink {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxStreamSink::default())
    }

    fn run_post(&mut self, recall: &Recall) -> Result<()> {
        let auto_sense = port_bool(recall, Self::AUTO_SENSE);
        let Some(source) = recall.source() else {
            recall.done();
            return Ok(());
        };
        let destination = recall
            .destination()
            .filter(|destination| !Arc::ptr_eq(destination, &source));

        {
            let source = source.lock();
            if source.current_index().is_none() {
                recall.done();
                return Ok(());
            }
            match (source.current_buffer(), &mut self.mix) {
                (Some(buffer), Some(mix)) if mix.format() == buffer.format() && mix.len() == buffer.len() => {
                    mix.copy_from(buffer);
                }
                (buffer, mix) => *mix = buffer.cloned(),
            }
        }

        // The source lock is released before the destination is taken, so
        // chains feeding each other cannot lock in opposite orders.
        if let (Some(destination), Some(mix)) = (destination, &self.mix) {
            if let Some(target) = destination.lock().current_buffer_mut() {
                target.add_from(mix);
            }
        }

        let mut source = source.lock();
        let Some(index) = source.current_index() else {
            recall.done();
            return Ok(());
        };
        let at_last = index + 1 >= source.length();
        if at_last && auto_sense && !self.sensed && source.tail_has_signal() {
            self.sensed = true;
            source.add_stream();
            tracing::debug!(signal = source.id(), length = source.length(), "tail sensed, stream extended");
        }
        if !source.next_buffer() {
            recall.done();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{
        AudioSignal, RecallId, RecallTarget, RecyclingContext, SampleBuffer, SampleFormat,
        SharedSignal, SoundScope,
    };

    fn sink(auto_sense: bool, source: &SharedSignal, destination: Option<SharedSignal>) -> Arc<Recall> {
        let run = RecallId::new(&RecyclingContext::new(SoundScope::Playback, 1));
        FxStreamSink::template(auto_sense).duplicate_with_target(
            &run,
            Some(RecallTarget::AudioSignal {
                source: Arc::clone(source),
                destination,
            }),
        )
    }

    fn tics_until_done(recall: &Recall) -> usize {
        let mut tics = 0;
        while !recall.is_done() && tics < 100 {
            recall.run_tic().unwrap();
            tics += 1;
        }
        tics
    }

    #[test]
    fn silent_tail_finishes_after_stream() {
        let source = AudioSignal::new(48000, 8, SampleFormat::Float).into_shared();
        source.lock().stream_resize(4);
        let recall = sink(true, &source, None);
        assert_eq!(tics_until_done(&recall), 4);
        assert_eq!(source.lock().length(), 4);
    }

    #[test]
    fn mixes_into_destination() {
        let source = AudioSignal::new(48000, 4, SampleFormat::Float).into_shared();
        {
            let mut s = source.lock();
            s.stream_resize(1);
            *s.buffer_mut(0).unwrap() = SampleBuffer::Float(vec![0.25; 4]);
        }
        let bus = AudioSignal::new(48000, 4, SampleFormat::Float).into_shared();
        bus.lock().stream_resize(1);
        let recall = sink(false, &source, Some(Arc::clone(&bus)));
        recall.run_tic().unwrap();
        assert_eq!(bus.lock().buffer(0), Some(&SampleBuffer::Float(vec![0.25; 4])));
        assert!(recall.is_done());
    }

    #[test]
    fn crossed_chains_run_concurrently() {
        const BUFFERS: usize = 2000;
        let a = AudioSignal::new(48000, 16, SampleFormat::Float).into_shared();
        let b = AudioSignal::new(48000, 16, SampleFormat::Float).into_shared();
        a.lock().stream_resize(BUFFERS);
        b.lock().stream_resize(BUFFERS);
        let forward = sink(false, &a, Some(Arc::clone(&b)));
        let backward = sink(false, &b, Some(Arc::clone(&a)));

        let (tx, rx) = std::sync::mpsc::channel();
        for recall in [forward, backward] {
            let tx = tx.clone();
            std::thread::spawn(move || {
                let tics = tics_until_done_within(&recall, BUFFERS + 1);
                tx.send(tics).unwrap();
            });
        }
        for _ in 0..2 {
            let tics = rx
                .recv_timeout(std::time::Duration::from_secs(10))
                .expect("crossed sinks deadlocked");
            assert_eq!(tics, BUFFERS);
        }
    }

    fn tics_until_done_within(recall: &Recall, limit: usize) -> usize {
        let mut tics = 0;
        while !recall.is_done() && tics < limit {
            recall.run_tic().unwrap();
            tics += 1;
        }
        tics
    }

    #[test]
    fn disabled_auto_sense_ignores_tail() {
        let source = AudioSignal::new(48000, 8, SampleFormat::Float).into_shared();
        {
            let mut s = source.lock();
            s.stream_resize(2);
            s.buffer_mut(1).unwrap().set_sample(7, 0.5);
        }
        let recall = sink(false, &source, None);
        assert_eq!(tics_until_done(&recall), 2);
    }
}
