//! The world: an isolated set of entities, components, and systems driven by
//! a frame pipeline.
//!
//! A [`World`] is a cheaply cloneable handle. The heavyweight state (storages,
//! entity table, systems, schedule) lives behind a per-frame mutex and is
//! owned by whichever thread drives frames: [`World::run`] spawns a dedicated
//! thread that loops frames at the configured interval, while
//! [`World::run_frames`] drives whole frames synchronously on the caller's
//! thread (headless tools, deterministic tests).
//!
//! Everything else on the handle is frame-safe: entity creation, component
//! staging, system control, and stop requests all go through shared channels
//! and atomics, and take effect at the next frame boundary.

pub mod access;
pub(crate) mod optimize;
pub(crate) mod pipeline;

use std::any::TypeId as RustTypeId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::DashSet;
use log::{error, info, warn};

use crate::core::config::WorldConfig;
use crate::core::tasks::Pool;
use crate::ecs::component::Component;
use crate::ecs::entity::{Allocator, Entity};
use crate::ecs::mutation::MutationLog;
use crate::ecs::system::{self, Control, Order, System};

use pipeline::WorldState;

/// Lifecycle status of a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, accepting system registrations, not yet driving frames.
    Init,
    /// Driving frames.
    Running,
    /// Stopped; drives no further frames.
    Stopped,
}

const STATUS_INIT: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_STOPPED: u8 = 2;

/// A handle to a world. Clones share the same world.
pub struct World {
    pub(crate) shared: Arc<Shared>,
}

impl Clone for World {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A system queued for registration until the world starts.
pub(crate) struct Pending {
    pub system: Box<dyn System>,
    pub type_id: RustTypeId,
    pub name: &'static str,
    pub order: Order,
}

pub(crate) struct Shared {
    pub id: u32,
    pub config: WorldConfig,
    pub status: AtomicU8,
    pub stop: AtomicBool,

    pub mutations: MutationLog,
    pub allocator: Allocator,
    /// Entities allocated and not yet destroyed, readable from any thread.
    pub live: DashSet<Entity>,

    pub control_tx: Sender<(RustTypeId, Control)>,
    pub control_rx: Receiver<(RustTypeId, Control)>,
    pub registered: Mutex<HashSet<RustTypeId>>,
    pub pending: Mutex<Vec<Pending>>,

    /// The frame-owned state; locked once per frame by the driving thread.
    pub state: Mutex<WorldState>,
    pub pool: Arc<Pool>,

    pub stop_handler: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    pub optimize_enabled: AtomicBool,
    pub optimize_budget_nanos: AtomicU64,

    pub frames: AtomicU64,
    pub failures: AtomicU64,
    pub thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl World {
    pub(crate) fn new(id: u32, config: WorldConfig, pool: Arc<Pool>) -> Self {
        let config = config.normalized();
        let (control_tx, control_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                id,
                mutations: MutationLog::new(config.hash_buckets),
                config,
                status: AtomicU8::new(STATUS_INIT),
                stop: AtomicBool::new(false),
                allocator: Allocator::default(),
                live: DashSet::new(),
                control_tx,
                control_rx,
                registered: Mutex::new(HashSet::new()),
                pending: Mutex::new(Vec::new()),
                state: Mutex::new(WorldState::new()),
                pool,
                stop_handler: Mutex::new(None),
                optimize_enabled: AtomicBool::new(false),
                optimize_budget_nanos: AtomicU64::new(0),
                frames: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                thread: Mutex::new(None),
            }),
        }
    }

    /// The world's identifier within its runtime.
    #[inline]
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    #[inline]
    pub fn status(&self) -> Status {
        match self.shared.status.load(Ordering::Acquire) {
            STATUS_INIT => Status::Init,
            STATUS_RUNNING => Status::Running,
            _ => Status::Stopped,
        }
    }

    /// Register a system with the default order. See
    /// [`register_system_with`](Self::register_system_with).
    pub fn register_system<S: System>(&self, system: S) -> bool {
        self.register_system_with(system, Order::DEFAULT)
    }

    /// Register a system to run at the given order. Registration is additive
    /// and only allowed before the world starts; a duplicate system type or
    /// a late registration is reported and refused.
    pub fn register_system_with<S: System>(&self, system: S, order: Order) -> bool {
        if self.status() != Status::Init {
            warn!(
                "world {}: cannot register {} after the world has started",
                self.shared.id,
                std::any::type_name::<S>()
            );
            return false;
        }
        let type_id = RustTypeId::of::<S>();
        if !self.shared.registered.lock().unwrap().insert(type_id) {
            warn!(
                "world {}: system {} is already registered",
                self.shared.id,
                std::any::type_name::<S>()
            );
            return false;
        }
        self.shared.pending.lock().unwrap().push(Pending {
            system: Box::new(system),
            type_id,
            name: std::any::type_name::<S>(),
            order,
        });
        true
    }

    /// A control handle for a registered system type.
    pub fn get_system<S: System>(&self) -> Option<system::Handle> {
        let type_id = RustTypeId::of::<S>();
        if !self.shared.registered.lock().unwrap().contains(&type_id) {
            return None;
        }
        Some(system::Handle {
            target: type_id,
            sender: self.shared.control_tx.clone(),
        })
    }

    /// Allocate a new entity and return its handle. The entity exists
    /// immediately; components staged onto it appear at the next frame
    /// boundary.
    pub fn new_entity(&self) -> EntityInfo<'_> {
        let entity = self.shared.allocator.alloc();
        self.shared.live.insert(entity);
        EntityInfo {
            world: self,
            entity,
        }
    }

    /// The handle for an existing entity, or `None` if it was never created
    /// or has been destroyed.
    pub fn get_entity_info(&self, entity: Entity) -> Option<EntityInfo<'_>> {
        if self.shared.live.contains(&entity) {
            Some(EntityInfo {
                world: self,
                entity,
            })
        } else {
            None
        }
    }

    /// Stage adding a free (unowned) component. Reports and refuses owned
    /// component kinds.
    pub fn add_free_component<C: Component>(&self, component: C) -> bool {
        if C::KIND.is_owned() {
            warn!(
                "component {} is an owned kind; add it through an entity",
                std::any::type_name::<C>()
            );
            return false;
        }
        self.shared.mutations.submit_add(Entity::NONE, component);
        true
    }

    /// Configure the storage-locality optimizer: when enabled with a nonzero
    /// budget, frame phase 6 re-sorts storages by owner entity, spending up
    /// to `budget` per frame.
    pub fn optimize(&self, budget: Duration, enable: bool) {
        self.shared
            .optimize_budget_nanos
            .store(budget.as_nanos() as u64, Ordering::Relaxed);
        self.shared.optimize_enabled.store(enable, Ordering::Relaxed);
    }

    /// Install a handler invoked once when the world stops.
    pub fn set_stop_handler<F: FnOnce() + Send + 'static>(&self, handler: F) {
        *self.shared.stop_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Start driving frames on a dedicated thread at the configured frame
    /// interval. Fails (with a report) unless the world is in `Init`.
    pub fn run(&self) -> bool {
        if self
            .shared
            .status
            .compare_exchange(
                STATUS_INIT,
                STATUS_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!("world {} is already running or stopped", self.shared.id);
            return false;
        }
        let world = self.clone();
        let handle = thread::Builder::new()
            .name(format!("tempo-world-{}", self.shared.id))
            .spawn(move || world.drive())
            .expect("failed to spawn world thread");
        *self.shared.thread.lock().unwrap() = Some(handle);
        true
    }

    /// Drive up to `frames` whole frames synchronously on the calling
    /// thread, without pacing sleeps. Returns the number of frames that
    /// completed. Mixing this with [`run`](Self::run) on the same world is
    /// unsupported.
    pub fn run_frames(&self, frames: u64) -> u64 {
        let _ = self.shared.status.compare_exchange(
            STATUS_INIT,
            STATUS_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if self.status() != Status::Running {
            warn!("world {} is stopped; cannot step frames", self.shared.id);
            return 0;
        }

        let delta = self.shared.config.frame_interval;
        let mut completed = 0;
        let mut finalize = false;
        {
            let mut state = self.shared.state.lock().unwrap();
            for _ in 0..frames {
                if self.shared.stop.load(Ordering::Acquire) {
                    finalize = true;
                    break;
                }
                match state.run_frame(self, delta) {
                    Ok(()) => {
                        self.shared.frames.fetch_add(1, Ordering::Release);
                        completed += 1;
                    }
                    Err(failure) => {
                        error!(
                            "world {}: structural failure: {failure}; stopping",
                            self.shared.id
                        );
                        self.shared.stop.store(true, Ordering::Release);
                        finalize = true;
                        break;
                    }
                }
            }
        }
        if finalize {
            self.finalize();
        }
        completed
    }

    /// Request a stop. A thread-driven world completes its current frame,
    /// invokes the stop handler, and exits its loop; a world without a
    /// driving thread (never ran, or stepped) stops immediately.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        if self.shared.thread.lock().unwrap().is_none() {
            self.finalize();
        }
    }

    /// Block until the world's driving thread (if any) has exited.
    pub fn join(&self) {
        let handle = self.shared.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Number of frames completed so far.
    #[inline]
    pub fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    /// Number of system failures caught at the job boundary.
    #[inline]
    pub fn caught_failures(&self) -> u64 {
        self.shared.failures.load(Ordering::Acquire)
    }

    pub(crate) fn ptr_eq(&self, other: &World) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn drive(&self) {
        info!("world {} started", self.shared.id);
        let interval = self.shared.config.frame_interval;
        let mut delta = Duration::ZERO;
        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }
            let start = Instant::now();
            let result = {
                let mut state = self.shared.state.lock().unwrap();
                state.run_frame(self, delta)
            };
            match result {
                Ok(()) => {
                    self.shared.frames.fetch_add(1, Ordering::Release);
                }
                Err(failure) => {
                    error!(
                        "world {}: structural failure: {failure}; stopping",
                        self.shared.id
                    );
                    self.shared.stop.store(true, Ordering::Release);
                    break;
                }
            }
            let elapsed = start.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
                delta = interval;
            } else {
                delta = elapsed;
            }
        }
        self.finalize();
        info!("world {} stopped", self.shared.id);
    }

    fn finalize(&self) {
        let previous = self.shared.status.swap(STATUS_STOPPED, Ordering::AcqRel);
        if previous != STATUS_STOPPED {
            self.run_stop_handler();
        }
    }

    fn run_stop_handler(&self) {
        let handler = self.shared.stop_handler.lock().unwrap().take();
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// A handle to one entity, used to stage component mutations and
/// destruction.
pub struct EntityInfo<'a> {
    world: &'a World,
    entity: Entity,
}

impl EntityInfo<'_> {
    /// The entity's identity.
    #[inline]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Stage adding an owned component to this entity, visible next frame.
    /// Reports and refuses free component kinds and dead entities.
    pub fn add<C: Component>(&self, component: C) -> bool {
        if !C::KIND.is_owned() {
            warn!(
                "component {} is a free kind; use World::add_free_component",
                std::any::type_name::<C>()
            );
            return false;
        }
        if !self.world.shared.live.contains(&self.entity) {
            warn!("entity {} is not alive", self.entity.raw());
            return false;
        }
        self.world.shared.mutations.submit_add(self.entity, component);
        true
    }

    /// Stage removing this entity's component of type `C`, applied next
    /// frame.
    pub fn remove<C: Component>(&self) -> bool {
        if !C::KIND.is_owned() {
            warn!(
                "component {} is a free kind and cannot be removed per entity",
                std::any::type_name::<C>()
            );
            return false;
        }
        if !self.world.shared.live.contains(&self.entity) {
            warn!("entity {} is not alive", self.entity.raw());
            return false;
        }
        self.world.shared.mutations.submit_remove(
            self.entity,
            crate::ecs::component::type_id_of::<C>(),
            C::KIND,
        );
        true
    }

    /// Stage destroying this entity: all owned components and the entity row
    /// are removed at the next frame boundary.
    pub fn destroy(self) -> bool {
        if !self.world.shared.live.contains(&self.entity) {
            warn!("entity {} is already destroyed", self.entity.raw());
            return false;
        }
        self.world.shared.mutations.submit_destroy(self.entity);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_world() -> World {
        World::new(0, WorldConfig::default(), Arc::new(Pool::new(2)))
    }

    struct Tick;
    impl System for Tick {
        fn declare(&self, _requirements: &mut system::Requirements) {}
        fn update(&mut self, _ctx: &mut system::Context<'_>) {}
    }

    #[test]
    fn registration_is_refused_after_start() {
        // Given
        let world = test_world();
        assert!(world.register_system(Tick));

        // When - the world starts stepping
        world.run_frames(1);

        // Then
        struct Late;
        impl System for Late {
            fn declare(&self, _requirements: &mut system::Requirements) {}
            fn update(&mut self, _ctx: &mut system::Context<'_>) {}
        }
        assert!(!world.register_system(Late));
        assert!(world.get_system::<Late>().is_none());
        assert!(world.get_system::<Tick>().is_some());
    }

    #[test]
    fn duplicate_system_registration_is_refused() {
        let world = test_world();
        assert!(world.register_system(Tick));
        assert!(!world.register_system(Tick));
    }

    #[test]
    fn stop_handler_runs_once() {
        // Given
        let world = test_world();
        let ran = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ran);
        world.set_stop_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // When - stopping a stepped world finalizes immediately
        world.run_frames(2);
        world.stop();
        world.stop();

        // Then
        assert_eq!(world.status(), Status::Stopped);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(world.run_frames(3), 0);
    }

    #[test]
    fn entity_handles_track_liveness() {
        // Given
        let world = test_world();
        let entity = world.new_entity().entity();

        // Then
        assert!(world.get_entity_info(entity).is_some());
        assert!(world.get_entity_info(Entity::from_raw(9999)).is_none());

        // When - destroy and apply at the next frame boundary
        assert!(world.get_entity_info(entity).unwrap().destroy());
        world.run_frames(1);

        // Then
        assert!(world.get_entity_info(entity).is_none());
    }

    #[test]
    fn threaded_run_stops_cleanly() {
        // Given
        let world = World::new(
            7,
            WorldConfig {
                hash_buckets: 4,
                frame_interval: Duration::from_millis(1),
            },
            Arc::new(Pool::new(2)),
        );

        // When
        assert!(world.run());
        assert!(!world.run());
        while world.frames() < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        world.stop();
        world.join();

        // Then
        assert_eq!(world.status(), Status::Stopped);
        assert!(world.frames() >= 3);
    }
}
