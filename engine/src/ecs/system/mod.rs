//! Systems: the stateless processors of the frame pipeline.
//!
//! A system declares the component types it requires (with a Read or Write
//! mode) and is called once per frame with a [`Context`] that hands out
//! borrow-guarded component views. Systems never mutate storages directly;
//! structural changes go through the world handle on the context and take
//! effect at the next frame boundary.
//!
//! # Example
//!
//! ```ignore
//! struct Movement;
//!
//! impl System for Movement {
//!     fn declare(&self, requirements: &mut Requirements) {
//!         requirements.read::<Velocity>().write::<Position>();
//!     }
//!
//!     fn update(&mut self, ctx: &mut Context<'_>) {
//!         let mut positions = ctx.interested_mut::<Position>();
//!         for (entity, position) in positions.iter_mut() {
//!             if let Some(velocity) = ctx.related::<Velocity>(entity) {
//!                 position.x += velocity.dx * ctx.delta().as_secs_f32();
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! # Lifecycle
//!
//! `Invalid → Init → Start → Update ⇄ Pause → Destroy → Destroyed`
//!
//! The pipeline advances states; user code requests Pause/Resume/Stop
//! through a [`Handle`], and the requests are drained at the top of the next
//! frame.

pub mod registry;

use std::any::TypeId as RustTypeId;
use std::cell::RefCell;
use std::time::Duration;

use crossbeam::channel::Sender;
use log::warn;

use crate::ecs::component::{self, Component, Sibling, SiblingMut, Storages, View, ViewMut};
use crate::ecs::entity::{Entity, EntityTable};
use crate::ecs::sibling::SiblingCache;
use crate::ecs::world::World;

/// Execution order of a system within a frame. Smaller runs earlier; systems
/// with distinct orders never share a parallel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Order(u32);

impl Order {
    /// Runs before default-ordered systems.
    pub const FRONT: Order = Order(0);
    /// The middle of the range; where unordered systems land.
    pub const DEFAULT: Order = Order(u32::MAX / 2);
    /// Runs after default-ordered systems.
    pub const BACK: Order = Order(u32::MAX);

    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl Default for Order {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Access mode for a required component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Read,
    Write,
}

/// Lifecycle state of a registered system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Invalid,
    Init,
    Start,
    Update,
    Pause,
    Destroy,
    Destroyed,
}

/// The component types a system requires, each with an access mode, plus the
/// thread-safety assertion.
///
/// Declaring a requirement resolves the component type through the
/// process-wide registry, so every required type has an id before the first
/// frame runs.
#[derive(Default)]
pub struct Requirements {
    entries: Vec<(component::Id, Mode)>,
    safe: bool,
}

impl Requirements {
    /// Require component type `C` with the given mode. Re-declaring a type
    /// overwrites its mode.
    pub fn require<C: Component>(&mut self, mode: Mode) -> &mut Self {
        let id = component::type_id_of::<C>();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = mode,
            None => self.entries.push((id, mode)),
        }
        self
    }

    /// Require read access to `C`.
    pub fn read<C: Component>(&mut self) -> &mut Self {
        self.require::<C>(Mode::Read)
    }

    /// Require write access to `C`.
    pub fn write<C: Component>(&mut self) -> &mut Self {
        self.require::<C>(Mode::Write)
    }

    /// Assert that this system manages its own synchronization. The
    /// scheduler will place it in a parallel group regardless of read/write
    /// conflicts.
    pub fn thread_safe(&mut self) -> &mut Self {
        self.safe = true;
        self
    }

    #[inline]
    pub fn is_thread_safe(&self) -> bool {
        self.safe
    }

    /// The declared mode for a component id, if any.
    pub fn mode_of(&self, id: component::Id) -> Option<Mode> {
        self.entries
            .iter()
            .find(|&&(existing, _)| existing == id)
            .map(|&(_, mode)| mode)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (component::Id, Mode)> + '_ {
        self.entries.iter().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A frame processor.
pub trait System: Send + 'static {
    /// Declare the component types this system iterates and relates, with
    /// their access modes. Called once at registration.
    fn declare(&self, requirements: &mut Requirements);

    /// Called once before the first update.
    fn init(&mut self) {}

    /// Called every frame while the system is live.
    fn update(&mut self, ctx: &mut Context<'_>);
}

/// Asynchronous lifecycle requests, drained at the top of the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Pause,
    Resume,
    Stop,
}

/// A control handle for a registered system, obtained from
/// [`World::get_system`](crate::ecs::world::World::get_system).
pub struct Handle {
    pub(crate) target: RustTypeId,
    pub(crate) sender: Sender<(RustTypeId, Control)>,
}

impl Handle {
    /// Request that the system skip updates until resumed.
    pub fn pause(&self) {
        let _ = self.sender.send((self.target, Control::Pause));
    }

    /// Request that a paused system resume updating.
    pub fn resume(&self) {
        let _ = self.sender.send((self.target, Control::Resume));
    }

    /// Request that the system be destroyed.
    pub fn stop(&self) {
        let _ = self.sender.send((self.target, Control::Stop));
    }
}

/// The per-frame execution context handed to [`System::update`].
///
/// Storages are structurally frozen while systems run: views hand out
/// references into stable arrays, and every mutation staged through
/// [`world()`](Context::world) becomes visible at the start of the next
/// frame.
pub struct Context<'a> {
    pub(crate) world: &'a World,
    pub(crate) storages: &'a Storages,
    pub(crate) table: &'a EntityTable,
    pub(crate) requirements: &'a Requirements,
    pub(crate) cache: &'a RefCell<SiblingCache>,
    pub(crate) delta: Duration,
    pub(crate) frame: u64,
}

impl<'a> Context<'a> {
    /// Duration of the previous frame.
    #[inline]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// The running frame counter.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The world handle, for staging mutations (new entities, component
    /// adds/removes, destruction). Everything staged here applies at the
    /// next frame boundary.
    #[inline]
    pub fn world(&self) -> &'a World {
        self.world
    }

    /// Iterate every component of a declared type. Returns an empty view
    /// (and reports the misuse) when the type was not declared.
    pub fn interested<C: Component>(&self) -> View<'a, C> {
        let id = component::type_id_of::<C>();
        if self.requirements.mode_of(id).is_none() {
            warn!(
                "system requested undeclared component {}",
                std::any::type_name::<C>()
            );
            return View::empty();
        }
        match self.storages.get(id) {
            Some(cell) => View::acquire(cell),
            None => View::empty(),
        }
    }

    /// Iterate every component of a type declared with write access.
    pub fn interested_mut<C: Component>(&self) -> ViewMut<'a, C> {
        let id = component::type_id_of::<C>();
        if self.requirements.mode_of(id) != Some(Mode::Write) {
            warn!(
                "system requested undeclared write access to {}",
                std::any::type_name::<C>()
            );
            return ViewMut::empty();
        }
        match self.storages.get(id) {
            Some(cell) => ViewMut::acquire(cell),
            None => ViewMut::empty(),
        }
    }

    /// Fetch `entity`'s component of a declared type, consulting the sibling
    /// cache before falling back to the entity table (and repopulating the
    /// cache on the way out).
    pub fn related<C: Component>(&self, entity: Entity) -> Option<Sibling<'a, C>> {
        let id = component::type_id_of::<C>();
        if self.requirements.mode_of(id).is_none() {
            warn!(
                "system requested undeclared component {}",
                std::any::type_name::<C>()
            );
            return None;
        }
        let cell = self.storages.get(id)?;

        // The cache borrow must end before the miss path re-borrows mutably.
        let cached = self.cache.borrow().find(entity, id);
        if let Some(index) = cached {
            if let Some(sibling) = Sibling::acquire(cell, index, entity) {
                return Some(sibling);
            }
            self.cache.borrow_mut().invalidate(entity, id);
        }

        let index = self.table.index_of(entity, id)?;
        let sibling = Sibling::acquire(cell, index, entity)?;
        self.cache.borrow_mut().insert(entity, id, index);
        Some(sibling)
    }

    /// Fetch `entity`'s component of a type declared with write access.
    pub fn related_mut<C: Component>(&self, entity: Entity) -> Option<SiblingMut<'a, C>> {
        let id = component::type_id_of::<C>();
        if self.requirements.mode_of(id) != Some(Mode::Write) {
            warn!(
                "system requested undeclared write access to {}",
                std::any::type_name::<C>()
            );
            return None;
        }
        let cell = self.storages.get(id)?;

        let cached = self.cache.borrow().find(entity, id);
        if let Some(index) = cached {
            if let Some(sibling) = SiblingMut::acquire(cell, index, entity) {
                return Some(sibling);
            }
            self.cache.borrow_mut().invalidate(entity, id);
        }

        let index = self.table.index_of(entity, id)?;
        let sibling = SiblingMut::acquire(cell, index, entity)?;
        self.cache.borrow_mut().insert(entity, id, index);
        Some(sibling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    impl Component for Position {}

    struct Velocity;
    impl Component for Velocity {}

    #[test]
    fn requirements_resolve_and_record_modes() {
        // Given
        let mut requirements = Requirements::default();

        // When
        requirements.read::<Position>().write::<Velocity>();

        // Then
        let pos = component::type_id_of::<Position>();
        let vel = component::type_id_of::<Velocity>();
        assert_eq!(requirements.mode_of(pos), Some(Mode::Read));
        assert_eq!(requirements.mode_of(vel), Some(Mode::Write));
        assert_eq!(requirements.len(), 2);
        assert!(!requirements.is_thread_safe());
    }

    #[test]
    fn redeclaring_overwrites_mode() {
        // Given
        let mut requirements = Requirements::default();
        requirements.read::<Position>();

        // When
        requirements.write::<Position>();

        // Then
        let pos = component::type_id_of::<Position>();
        assert_eq!(requirements.mode_of(pos), Some(Mode::Write));
        assert_eq!(requirements.len(), 1);
    }

    #[test]
    fn order_constants_are_ordered() {
        assert!(Order::FRONT < Order::DEFAULT);
        assert!(Order::DEFAULT < Order::BACK);
        assert_eq!(Order::default(), Order::DEFAULT);
    }

    #[test]
    fn lifecycle_states_are_ordered() {
        assert!(State::Init < State::Start);
        assert!(State::Start < State::Update);
        assert!(State::Update < State::Pause);
        assert!(State::Pause < State::Destroy);
        assert!(State::Destroy < State::Destroyed);
    }
}
