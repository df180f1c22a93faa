//! The frame pipeline: the single-threaded driver of one world frame.
//!
//! One frame executes these phases strictly in sequence:
//!
//! 1. **Drain control events** - pause/resume/stop requests update system
//!    states; destroyed systems leave the registry.
//! 2. **Apply mutations** - the mutation log is drained and every staged
//!    add/remove/destroy lands in the storages and entity table. Cache
//!    events are recorded along the way.
//! 3. **Schedule** - the parallel grouping is recomputed if the system set
//!    changed, otherwise served from cache.
//! 4. **Execute** - each group's systems are dispatched to the worker pool
//!    and joined before the next group starts. Storages are structurally
//!    frozen for the whole phase.
//! 5. **Dispose** - storages of disposable types that staged additions this
//!    frame are cleared, along with their entity-table rows.
//! 6. **Optimize** - when armed, storages are re-sorted for sibling
//!    locality under a time budget.
//! 7. **Pace** - the driving loop sleeps out the remainder of the frame
//!    interval (threaded mode only).
//!
//! A panic inside a system is caught at the job boundary, reported, and the
//! frame proceeds. An inconsistency discovered in phases 2, 5, or 6 is a
//! [`StructuralError`], fatal to the world.

use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::time::Duration;

use log::{error, warn};

use crate::core::tasks::panic_message;
use crate::ecs::component::{self, Storages};
use crate::ecs::entity::EntityTable;
use crate::ecs::mutation::{Drained, OpKind};
use crate::ecs::schedule::Schedule;
use crate::ecs::sibling::{CacheOp, EventQueue};
use crate::ecs::system::registry::{Entry, SystemRegistry};
use crate::ecs::system::{Context, Control, State};
use crate::ecs::world::optimize::Optimizer;
use crate::ecs::world::World;

/// An inconsistency between the entity table and the storages, discovered
/// while applying or disposing mutations. Fatal to the world.
#[derive(Debug)]
pub(crate) struct StructuralError {
    message: String,
}

impl StructuralError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The frame-owned state of a world.
pub(crate) struct WorldState {
    storages: Storages,
    table: EntityTable,
    systems: SystemRegistry,
    schedule: Option<Schedule>,
    events: EventQueue,
    /// Disposable component types with staged additions this frame.
    disposable: HashSet<component::Id>,
    optimizer: Optimizer,
    frame: u64,
}

impl WorldState {
    pub fn new() -> Self {
        Self {
            storages: Storages::new(),
            table: EntityTable::new(),
            systems: SystemRegistry::default(),
            schedule: None,
            events: EventQueue::new(),
            disposable: HashSet::new(),
            optimizer: Optimizer::default(),
            frame: 0,
        }
    }

    /// Run one whole frame. Phase 7 (pacing) belongs to the caller.
    pub fn run_frame(&mut self, world: &World, delta: Duration) -> Result<(), StructuralError> {
        self.frame += 1;
        self.seal_pending(world);
        self.drain_controls(world);
        self.apply_mutations(world)?;
        self.maintain_caches(world);
        self.execute(world, delta);
        self.dispose()?;
        self.optimize_pass(world)
    }

    /// Move queued registrations into the registry and initialize them.
    /// Registration closes once the world starts, so this only finds work on
    /// the first frame.
    fn seal_pending(&mut self, world: &World) {
        let pending = std::mem::take(&mut *world.shared.pending.lock().unwrap());
        for queued in pending {
            self.systems
                .register(queued.system, queued.type_id, queued.name, queued.order);
        }
        for entry in self.systems.entries_mut() {
            if entry.meta.state == State::Init {
                let name = entry.meta.name;
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| entry.system.init())) {
                    world.shared.failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "system {name} panicked during init: {}",
                        panic_message(payload.as_ref())
                    );
                }
                entry.meta.state = State::Start;
            }
        }
    }

    /// Phase 1: apply queued pause/resume/stop requests.
    fn drain_controls(&mut self, world: &World) {
        for (type_id, control) in world.shared.control_rx.try_iter() {
            let Some(entry) = self.systems.find_mut(type_id) else {
                warn!("control event for an unregistered system");
                continue;
            };
            let state = entry.meta.state;
            entry.meta.state = match control {
                Control::Pause if state == State::Update => State::Pause,
                Control::Resume if state == State::Pause => State::Update,
                Control::Stop if state < State::Destroy => State::Destroy,
                _ => state,
            };
        }
        self.systems.remove_destroyed();
    }

    /// Phase 2: drain the mutation log and apply every op in list order.
    fn apply_mutations(&mut self, world: &World) -> Result<(), StructuralError> {
        let drained = world.shared.mutations.drain();
        if drained.is_empty() {
            return Ok(());
        }
        let Drained { per_type, destroys } = drained;

        let WorldState {
            storages,
            table,
            events,
            disposable,
            ..
        } = self;

        for (type_id, ops) in per_type {
            if !storages.contains(type_id) {
                let Some(factory) = ops.iter().find_map(|op| op.payload.as_ref()) else {
                    warn!(
                        "dropping {} ops for component {} with no storage",
                        ops.len(),
                        type_id.value()
                    );
                    continue;
                };
                storages.insert(type_id, factory.new_storage());
            }
            let storage = storages.get_mut(type_id).expect("storage just ensured");

            for op in ops {
                match op.kind {
                    OpKind::Add => {
                        let owned = op.component_kind.is_owned();
                        if owned && table.index_of(op.entity, type_id).is_some() {
                            warn!(
                                "entity {} already has component {}; add ignored",
                                op.entity.raw(),
                                type_id.value()
                            );
                            continue;
                        }
                        let Some(payload) = op.payload else {
                            return Err(StructuralError::new("add operation lost its payload"));
                        };
                        let Some(index) = payload.insert(storage, op.entity, op.free_id) else {
                            continue;
                        };
                        if owned {
                            table.attach(op.entity, type_id, index);
                            events.push(op.entity, type_id, CacheOp::Set);
                        }
                        if op.component_kind.is_disposable() {
                            disposable.insert(type_id);
                        }
                    }
                    OpKind::Remove => {
                        let Some(index) = table.detach(op.entity, type_id) else {
                            warn!(
                                "entity {} has no component {} to remove",
                                op.entity.raw(),
                                type_id.value()
                            );
                            continue;
                        };
                        if index >= storage.len() {
                            return Err(StructuralError::new(format!(
                                "entity {} component {} index {} beyond storage length {}",
                                op.entity.raw(),
                                type_id.value(),
                                index,
                                storage.len()
                            )));
                        }
                        if let Some(relocation) = storage.remove_at(index) {
                            if !table.patch(relocation.moved_owner, type_id, relocation.to) {
                                return Err(StructuralError::new(format!(
                                    "relocated component {} of entity {} has no table row",
                                    type_id.value(),
                                    relocation.moved_owner.raw()
                                )));
                            }
                            events.push(relocation.moved_owner, type_id, CacheOp::Clear);
                        }
                        events.push(op.entity, type_id, CacheOp::Clear);
                    }
                }
            }
        }

        for entity in destroys {
            if world.shared.live.remove(&entity).is_none() {
                warn!("entity {} destroyed twice", entity.raw());
                continue;
            }
            // Entities without components have no row; that is a clean
            // destroy.
            let Some(row) = table.remove_row(entity) else {
                continue;
            };
            for (type_id, index) in row {
                let Some(storage) = storages.get_mut(type_id) else {
                    return Err(StructuralError::new(format!(
                        "entity {} refers to missing storage {}",
                        entity.raw(),
                        type_id.value()
                    )));
                };
                if index >= storage.len() {
                    return Err(StructuralError::new(format!(
                        "entity {} component {} index {} beyond storage length {}",
                        entity.raw(),
                        type_id.value(),
                        index,
                        storage.len()
                    )));
                }
                if let Some(relocation) = storage.remove_at(index) {
                    if !table.patch(relocation.moved_owner, type_id, relocation.to) {
                        return Err(StructuralError::new(format!(
                            "relocated component {} of entity {} has no table row",
                            type_id.value(),
                            relocation.moved_owner.raw()
                        )));
                    }
                    events.push(relocation.moved_owner, type_id, CacheOp::Clear);
                }
                events.push(entity, type_id, CacheOp::Clear);
            }
        }

        Ok(())
    }

    /// Apply queued cache events to every system's sibling cache. This is
    /// the single between-frames consumer, pinned to worker 0 so the cache
    /// memory stays with one thread.
    fn maintain_caches(&mut self, world: &World) {
        let events = self.events.drain();
        if events.is_empty() {
            return;
        }
        let entries = self.systems.entries_mut();
        if entries.is_empty() {
            return;
        }
        world.shared.pool.scope(|scope| {
            scope.spawn_at(0, move || {
                for entry in entries.iter_mut() {
                    let mut cache = entry.meta.cache.borrow_mut();
                    for event in &events {
                        cache.apply(event);
                    }
                }
            });
        });
    }

    /// Phases 3 and 4: refresh the schedule if needed, then run each
    /// parallel group on the pool with a join barrier between groups.
    fn execute(&mut self, world: &World, delta: Duration) {
        if self.systems.take_dirty() || self.schedule.is_none() {
            self.schedule = Some(Schedule::rebuild(self.systems.entries()));
        }

        for entry in self.systems.entries_mut() {
            if entry.meta.state == State::Start {
                entry.meta.state = State::Update;
            }
        }

        let WorldState {
            storages,
            table,
            systems,
            schedule,
            frame,
            ..
        } = self;
        let storages: &Storages = storages;
        let table: &EntityTable = table;
        let frame = *frame;
        let pool = &world.shared.pool;
        let schedule = schedule.as_ref().expect("schedule just built");

        for group in schedule.groups() {
            let entries = systems.entries_mut();
            pool.scope(|scope| {
                for (index, entry) in entries.iter_mut().enumerate() {
                    if !group.contains(&index) || entry.meta.state != State::Update {
                        continue;
                    }
                    scope.spawn(move || {
                        let Entry { system, meta } = entry;
                        let mut ctx = Context {
                            world,
                            storages,
                            table,
                            requirements: &meta.requirements,
                            cache: &meta.cache,
                            delta,
                            frame,
                        };
                        if let Err(payload) =
                            catch_unwind(AssertUnwindSafe(|| system.update(&mut ctx)))
                        {
                            world.shared.failures.fetch_add(1, Ordering::Relaxed);
                            error!(
                                "system {} panicked during update: {}",
                                meta.name,
                                panic_message(payload.as_ref())
                            );
                        }
                    });
                }
            });
        }
    }

    /// Phase 5: clear storages of disposable types that staged additions
    /// this frame, dropping the matching entity-table rows.
    fn dispose(&mut self) -> Result<(), StructuralError> {
        if self.disposable.is_empty() {
            return Ok(());
        }
        let WorldState {
            storages,
            table,
            events,
            disposable,
            ..
        } = self;
        for type_id in disposable.drain() {
            let Some(storage) = storages.get_mut(type_id) else {
                continue;
            };
            for owner in storage.clear() {
                if owner.is_none() {
                    continue;
                }
                if table.detach(owner, type_id).is_none() {
                    return Err(StructuralError::new(format!(
                        "disposable component {} owner {} has no table row",
                        type_id.value(),
                        owner.raw()
                    )));
                }
                events.push(owner, type_id, CacheOp::Clear);
            }
        }
        Ok(())
    }

    /// Phase 6: re-sort storages for sibling locality when the optimizer is
    /// armed.
    fn optimize_pass(&mut self, world: &World) -> Result<(), StructuralError> {
        if !world.shared.optimize_enabled.load(Ordering::Relaxed) {
            return Ok(());
        }
        let budget =
            Duration::from_nanos(world.shared.optimize_budget_nanos.load(Ordering::Relaxed));
        if budget.is_zero() {
            return Ok(());
        }
        let WorldState {
            storages,
            table,
            systems,
            optimizer,
            ..
        } = self;
        let moved = optimizer.run(storages, table, budget)?;
        if moved {
            // Every cached index may have changed; drop them all and let
            // lookups repopulate.
            for entry in systems.entries_mut() {
                entry.meta.cache.borrow_mut().clear();
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> &EntityTable {
        &self.table
    }

    #[cfg(test)]
    pub(crate) fn storages(&self) -> &Storages {
        &self.storages
    }
}
