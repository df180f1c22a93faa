//! The runtime: process-level bootstrap for worlds and the worker pool.
//!
//! A [`Runtime`] owns the worker [`Pool`] and the set of worlds created
//! through it. Worlds share the pool for their execute phases; jobs can also
//! be submitted directly with an optional worker affinity.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::core::config::{RuntimeConfig, WorldConfig};
use crate::core::tasks::Pool;
use crate::ecs::world::{Status, World};

const STATUS_INIT: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_STOPPED: u8 = 2;

pub struct Runtime {
    config: Mutex<RuntimeConfig>,
    status: AtomicU8,
    pool: Mutex<Option<Arc<Pool>>>,
    worlds: Mutex<Vec<World>>,
    next_world_id: AtomicU32,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with the default configuration. Nothing starts
    /// until [`run`](Self::run).
    pub fn new() -> Self {
        Self {
            config: Mutex::new(RuntimeConfig::default()),
            status: AtomicU8::new(STATUS_INIT),
            pool: Mutex::new(None),
            worlds: Mutex::new(Vec::new()),
            next_world_id: AtomicU32::new(0),
        }
    }

    /// Replace the configuration. Only allowed before [`run`](Self::run);
    /// reported and ignored afterwards.
    pub fn configure(&self, config: RuntimeConfig) -> bool {
        if self.status() != Status::Init {
            warn!("runtime is already running; configure ignored");
            return false;
        }
        *self.config.lock().unwrap() = config;
        true
    }

    #[inline]
    pub fn status(&self) -> Status {
        match self.status.load(Ordering::Acquire) {
            STATUS_INIT => Status::Init,
            STATUS_RUNNING => Status::Running,
            _ => Status::Stopped,
        }
    }

    /// Start the worker pool. Worlds can only be created while the runtime
    /// is running.
    pub fn run(&self) -> bool {
        if self
            .status
            .compare_exchange(
                STATUS_INIT,
                STATUS_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!("runtime is already running or stopped");
            return false;
        }
        let workers = self.config.lock().unwrap().cpu_count.max(1);
        *self.pool.lock().unwrap() = Some(Arc::new(Pool::new(workers)));
        info!("runtime started with {workers} workers");
        true
    }

    /// Stop every world, wait for their frame loops to exit, then shut the
    /// pool down. Idempotent.
    pub fn stop(&self) {
        let previous = self.status.swap(STATUS_STOPPED, Ordering::AcqRel);
        if previous != STATUS_RUNNING {
            return;
        }
        let worlds = std::mem::take(&mut *self.worlds.lock().unwrap());
        for world in &worlds {
            world.stop();
        }
        for world in &worlds {
            world.join();
        }
        if let Some(pool) = self.pool.lock().unwrap().take() {
            pool.shutdown();
        }
        info!("runtime stopped");
    }

    /// Create a world sharing this runtime's worker pool. Returns `None`
    /// (with a report) when the runtime is not running.
    pub fn new_world(&self, config: WorldConfig) -> Option<World> {
        if self.status() != Status::Running {
            warn!("runtime is not running; cannot create a world");
            return None;
        }
        let pool = self.pool.lock().unwrap().as_ref().cloned()?;
        let id = self.next_world_id.fetch_add(1, Ordering::Relaxed);

        // Unset world-config values inherit the runtime's configuration.
        let defaults = self.config.lock().unwrap();
        let config = WorldConfig {
            hash_buckets: if config.hash_buckets == 0 {
                defaults.hash_buckets
            } else {
                config.hash_buckets
            },
            frame_interval: if config.frame_interval.is_zero() {
                defaults.frame_interval
            } else {
                config.frame_interval
            },
        };
        drop(defaults);

        let world = World::new(id, config, pool);
        self.worlds.lock().unwrap().push(world.clone());
        Some(world)
    }

    /// Stop a world and forget it.
    pub fn destroy_world(&self, world: &World) {
        world.stop();
        world.join();
        self.worlds.lock().unwrap().retain(|w| !w.ptr_eq(world));
    }

    /// Submit a job to the worker pool, optionally pinned to one worker.
    /// Returns whether the job was accepted.
    pub fn submit_job<F>(&self, job: F, affinity: Option<usize>) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.pool.lock().unwrap().as_ref() {
            Some(pool) => {
                pool.submit(job, affinity);
                true
            }
            None => {
                warn!("runtime is not running; job dropped");
                false
            }
        }
    }

    /// Number of live worlds.
    pub fn world_count(&self) -> usize {
        self.worlds.lock().unwrap().len()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn worlds_require_a_running_runtime() {
        // Given
        let runtime = Runtime::new();

        // Then - not running yet
        assert!(runtime.new_world(WorldConfig::default()).is_none());

        // When
        assert!(runtime.run());
        assert!(!runtime.run());

        // Then
        let world = runtime.new_world(WorldConfig::default()).unwrap();
        assert_eq!(runtime.world_count(), 1);
        assert_eq!(world.status(), crate::ecs::world::Status::Init);

        runtime.stop();
        assert_eq!(runtime.world_count(), 0);
    }

    #[test]
    fn submitted_jobs_execute() {
        // Given
        let runtime = Runtime::new();
        runtime.configure(RuntimeConfig {
            cpu_count: 2,
            ..RuntimeConfig::default()
        });
        runtime.run();

        // When
        let (tx, rx) = crossbeam::channel::unbounded();
        assert!(runtime.submit_job(
            move || {
                let _ = tx.send(17);
            },
            None,
        ));

        // Then
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 17);
        runtime.stop();
        assert!(!runtime.submit_job(|| {}, None));
    }

    #[test]
    fn destroy_world_stops_and_forgets_it() {
        // Given
        let runtime = Runtime::new();
        runtime.run();
        let world = runtime.new_world(WorldConfig::default()).unwrap();

        // When
        runtime.destroy_world(&world);

        // Then
        assert_eq!(runtime.world_count(), 0);
        assert_eq!(world.status(), crate::ecs::world::Status::Stopped);
    }

    #[test]
    fn stop_joins_running_worlds() {
        // Given
        let runtime = Runtime::new();
        runtime.run();
        let world = runtime
            .new_world(WorldConfig {
                hash_buckets: 4,
                frame_interval: Duration::from_millis(1),
            })
            .unwrap();
        let frames_seen = Arc::new(AtomicUsize::new(0));
        world.run();
        while world.frames() < 2 {
            std::thread::sleep(Duration::from_millis(1));
        }
        frames_seen.store(world.frames() as usize, Ordering::SeqCst);

        // When
        runtime.stop();

        // Then
        assert_eq!(world.status(), crate::ecs::world::Status::Stopped);
        assert!(frames_seen.load(Ordering::SeqCst) >= 2);
    }
}
