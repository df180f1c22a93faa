//! Job execution for the runtime.
//!
//! The [`Pool`] is a fixed set of worker threads. Every worker owns a personal
//! queue and shares a global queue; jobs carry an optional *affinity* naming
//! the worker that must execute them. Affinity is how the frame pipeline pins
//! work that touches a specific worker's data (for example the sibling-cache
//! consumer) to one thread instead of bouncing it around the pool.
//!
//! [`Pool::scope`] submits jobs that borrow stack data and joins them before
//! returning, which is what the pipeline uses to run one parallel group of
//! systems and then barrier.

mod pool;

pub(crate) use pool::panic_message;
pub use pool::{Pool, Scope};
