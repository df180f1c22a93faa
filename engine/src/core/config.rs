//! Runtime and world configuration.
//!
//! Both configs are plain data with sensible defaults derived from the host:
//! the worker count follows the available parallelism, the mutation-log shard
//! count defaults to four buckets per cpu, and frames pace at ~30Hz unless
//! told otherwise.

use std::time::Duration;

/// The default frame interval (~30 frames per second).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Configuration for the [`Runtime`](crate::core::runtime::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads in the job pool.
    pub cpu_count: usize,

    /// Requested mutation-log shard count for worlds that do not override it.
    /// Rounded up to a power of two.
    pub hash_buckets: usize,

    /// Default frame interval for worlds that do not override it.
    pub frame_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = default_cpu_count();
        Self {
            cpu_count: cpus,
            hash_buckets: cpus * 4,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

/// Configuration for a single [`World`](crate::ecs::world::World).
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Requested mutation-log shard count. Rounded up to a power of two.
    pub hash_buckets: usize,

    /// Target duration of one frame. When a frame finishes early, the world
    /// loop sleeps the remainder.
    pub frame_interval: Duration,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            hash_buckets: default_cpu_count() * 4,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

impl WorldConfig {
    /// Normalize the config: zero or invalid values fall back to defaults,
    /// matching the behavior of the default constructor.
    pub(crate) fn normalized(mut self) -> Self {
        if self.hash_buckets == 0 {
            self.hash_buckets = default_cpu_count() * 4;
        }
        if self.frame_interval.is_zero() {
            self.frame_interval = DEFAULT_FRAME_INTERVAL;
        }
        self
    }
}

/// Number of worker threads to use when the caller does not specify one.
pub(crate) fn default_cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Round a requested bucket count up to the next power of two, with a floor
/// of one. Shard selection masks against `count - 1`.
pub(crate) fn bucket_count(requested: usize) -> usize {
    requested.max(1).next_power_of_two()
}
