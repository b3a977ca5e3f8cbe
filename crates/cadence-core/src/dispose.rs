//! Deferred destruction off the real-time path.
//!
//! Dropping an [`AudioSignal`](crate::AudioSignal) frees its whole stream,
//! which is too slow for a scheduler thread. Finished items are handed to a
//! [`DestroyWorker`] instead, which drops them on its own thread.

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

enum Message {
    Dispose(Box<dyn Send>),
    Flush(Sender<()>),
}

/// Background thread that drops whatever it is handed.
pub struct DestroyWorker {
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<()>>,
    disposed: Arc<AtomicU64>,
}

impl std::fmt::Debug for DestroyWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestroyWorker")
            .field("running", &self.tx.is_some())
            .field("disposed", &self.disposed_count())
            .finish()
    }
}

impl DestroyWorker {
    /// Spawn the worker thread.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let disposed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&disposed);
        let handle = std::thread::Builder::new()
            .name("cadence-destroy".into())
            .spawn(move || worker_loop(&rx, &counter))
            .map_err(|err| tracing::error!(error = %err, "failed to spawn destroy worker"))
            .ok();
        Self {
            tx: handle.as_ref().map(|_| tx),
            handle,
            disposed,
        }
    }

    /// Queue `item` for destruction.
    ///
    /// If the worker is gone the item is dropped on the calling thread.
    pub fn add<T: Send + 'static>(&self, item: T) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::WorkerStopped)?;
        tx.send(Message::Dispose(Box::new(item)))
            .map_err(|_| Error::WorkerStopped)
    }

    /// Block until everything queued so far is dropped.
    pub fn flush(&self) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::WorkerStopped)?;
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        tx.send(Message::Flush(done_tx))
            .map_err(|_| Error::WorkerStopped)?;
        done_rx.recv().map_err(|_| Error::WorkerStopped)
    }

    /// Number of items dropped so far.
    pub fn disposed_count(&self) -> u64 {
        self.disposed.load(Ordering::Relaxed)
    }
}

impl Default for DestroyWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DestroyWorker {
    fn drop(&mut self) {
        // closing the channel ends the loop after the backlog is drained
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("destroy worker panicked");
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Message>, disposed: &AtomicU64) {
    tracing::debug!("destroy worker started");
    for message in rx {
        match message {
            Message::Dispose(item) => {
                drop(item);
                disposed.fetch_add(1, Ordering::Relaxed);
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!(disposed = disposed.load(Ordering::Relaxed), "destroy worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DropFlag(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_items_dropped_after_flush() {
        let worker = DestroyWorker::new();
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        worker.add(DropFlag(Arc::clone(&flag))).unwrap();
        worker.add(vec![0.0f32; 4096]).unwrap();
        worker.flush().unwrap();
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(worker.disposed_count(), 2);
    }

    #[test]
    fn test_drop_drains_backlog() {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let worker = DestroyWorker::new();
            worker.add(DropFlag(Arc::clone(&flag))).unwrap();
        }
        assert!(flag.load(Ordering::SeqCst));
    }
}
