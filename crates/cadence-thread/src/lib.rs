//! Cooperative real-time scheduling for cadence.
//!
//! A tree of OS threads advances in lock-step: the root releases a tic, every
//! thread runs its routine once and arrives at a three-phase barrier. The
//! root never blocks indefinitely; threads that miss too many timelock
//! windows are skipped until they catch up.
//!
//! # Core Abstractions
//!
//! - [`AudioLoop`]: root of a tree; [`AudioLoop::tic`] drives one cycle
//! - [`ThreadNode`]: one worker with flags, clock and children
//! - [`ThreadRoutine`]: per-tic work, e.g. [`AudioRoutine`]
//! - [`GreedyLock`]: non-blocking ownership that makes other threads skip
//! - [`TaskLauncher`] / [`Task`]: graph mutations applied between tics
//!
//! # Example
//!
//! ```rust
//! use cadence_thread::{AudioLoop, IdleRoutine, TreeConfig, routine_fn};
//!
//! let audio_loop = AudioLoop::new(TreeConfig::default(), IdleRoutine);
//! audio_loop.spawn("worker", routine_fn(|ctx| {
//!     assert!(ctx.count > 0);
//! })).unwrap();
//!
//! let report = audio_loop.tic();
//! assert_eq!(report.count, 1);
//! assert!(report.skipped.is_empty());
//! ```

pub mod audio_loop;
pub mod error;
pub mod flags;
pub mod greedy;
pub mod node;
pub mod routine;
pub mod task;
pub mod tree;

pub use audio_loop::{AudioLoop, TicReport};
pub use error::{Result, ThreadError};
pub use flags::{ThreadFlags, ThreadState, next_tic};
pub use greedy::GreedyLock;
pub use node::{Signal, ThreadNode};
pub use routine::{AudioRoutine, FnRoutine, IdleRoutine, ThreadRoutine, TicContext, routine_fn};
pub use task::{ApplySoundConfig, ResizeAudio, ResizeOp, SetMuted, SetPortValue, Task, TaskLauncher};
pub use tree::{DEFAULT_FREQ, HERTZ_JIFFIE, ThreadTree, TreeConfig};
