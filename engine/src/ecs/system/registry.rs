//! Registry of a world's systems.
//!
//! Registration resolves every declared requirement through the component
//! registry and assigns a registration id used as the scheduler's
//! tie-breaker among systems of equal order.

use std::any::TypeId as RustTypeId;
use std::cell::RefCell;

use log::warn;

use crate::ecs::sibling::SiblingCache;
use crate::ecs::system::{Order, Requirements, State, System};
use crate::ecs::world::access::Access;

/// Bookkeeping the pipeline keeps per system.
pub(crate) struct Meta {
    /// Registration sequence, breaks order ties.
    pub id: u32,
    /// The system's Rust type, for control-handle lookups.
    pub type_id: RustTypeId,
    /// Type name, for diagnostics.
    pub name: &'static str,
    pub order: Order,
    pub requirements: Requirements,
    pub access: Access,
    pub state: State,
    /// Per-system sibling cache. RefCell because each system runs on exactly
    /// one thread per frame while the context only holds shared references.
    pub cache: RefCell<SiblingCache>,
}

/// A registered system and its bookkeeping.
pub(crate) struct Entry {
    pub system: Box<dyn System>,
    pub meta: Meta,
}

/// The set of registered systems.
#[derive(Default)]
pub(crate) struct SystemRegistry {
    entries: Vec<Entry>,
    next_id: u32,
    dirty: bool,
}

impl SystemRegistry {
    /// Register a system. Fails (with a report) when a system of the same
    /// type is already present.
    pub fn register(
        &mut self,
        system: Box<dyn System>,
        type_id: RustTypeId,
        name: &'static str,
        order: Order,
    ) -> bool {
        if self.entries.iter().any(|e| e.meta.type_id == type_id) {
            warn!("system {name} is already registered");
            return false;
        }

        let mut requirements = Requirements::default();
        system.declare(&mut requirements);
        let access = Access::from_requirements(&requirements);

        let meta = Meta {
            id: self.next_id,
            type_id,
            name,
            order,
            requirements,
            access,
            state: State::Init,
            cache: RefCell::new(SiblingCache::new()),
        };
        self.next_id += 1;
        self.entries.push(Entry { system, meta });
        self.dirty = true;
        true
    }

    #[inline]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[inline]
    pub fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    pub fn find_mut(&mut self, type_id: RustTypeId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.meta.type_id == type_id)
    }

    /// Drop entries in the `Destroy` state. Returns whether any were
    /// removed.
    pub fn remove_destroyed(&mut self) -> bool {
        let before = self.entries.len();
        self.entries.retain_mut(|entry| {
            if entry.meta.state == State::Destroy {
                entry.meta.state = State::Destroyed;
                false
            } else {
                true
            }
        });
        let removed = self.entries.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Whether the system set changed since the last call; clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::system::Context;

    struct Noop;
    impl System for Noop {
        fn declare(&self, _requirements: &mut Requirements) {}
        fn update(&mut self, _ctx: &mut Context<'_>) {}
    }

    struct OtherNoop;
    impl System for OtherNoop {
        fn declare(&self, _requirements: &mut Requirements) {}
        fn update(&mut self, _ctx: &mut Context<'_>) {}
    }

    fn register<S: System>(registry: &mut SystemRegistry, system: S, order: Order) -> bool {
        registry.register(
            Box::new(system),
            RustTypeId::of::<S>(),
            std::any::type_name::<S>(),
            order,
        )
    }

    #[test]
    fn registration_assigns_sequential_ids() {
        // Given
        let mut registry = SystemRegistry::default();

        // When
        assert!(register(&mut registry, Noop, Order::DEFAULT));
        assert!(register(&mut registry, OtherNoop, Order::FRONT));

        // Then
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.entries()[0].meta.id, 0);
        assert_eq!(registry.entries()[1].meta.id, 1);
        assert!(registry.take_dirty());
        assert!(!registry.take_dirty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        // Given
        let mut registry = SystemRegistry::default();
        register(&mut registry, Noop, Order::DEFAULT);

        // When
        let accepted = register(&mut registry, Noop, Order::DEFAULT);

        // Then
        assert!(!accepted);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_destroyed_drops_entries_and_dirties() {
        // Given
        let mut registry = SystemRegistry::default();
        register(&mut registry, Noop, Order::DEFAULT);
        register(&mut registry, OtherNoop, Order::DEFAULT);
        registry.take_dirty();
        registry.entries_mut()[0].meta.state = State::Destroy;

        // When
        let removed = registry.remove_destroyed();

        // Then
        assert!(removed);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entries()[0].meta.type_id, RustTypeId::of::<OtherNoop>());
        assert!(registry.take_dirty());
    }
}
