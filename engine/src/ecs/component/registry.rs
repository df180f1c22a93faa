//! The process-wide component type registry.
//!
//! Every component type is assigned a dense, monotonically increasing `u16`
//! [`Id`] on first observation. The registry is shared by all worlds in the
//! process so that a type means the same id everywhere, and it is the one
//! intentional piece of global state in the crate.

use std::any::{type_name, TypeId as RustTypeId};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::RwLock;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::ecs::component::{Component, Id, Kind};

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// Resolve the process-wide id for component type `C`, registering it on
/// first use.
#[inline]
pub fn type_id_of<C: Component>() -> Id {
    GLOBAL.register::<C>()
}

/// Access the process-wide registry.
#[inline]
pub fn global() -> &'static Registry {
    &GLOBAL
}

/// Metadata recorded for a registered component type.
#[derive(Debug, Clone, Copy)]
pub struct Info {
    id: Id,
    kind: Kind,
    name: &'static str,
}

impl Info {
    /// The component id.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The component kind.
    #[inline]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The component's Rust type name, for diagnostics.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A thread-safe component type registry.
///
/// Lookups take the lock-free `DashMap` path; registration touches one map
/// shard plus a short write lock on the info table. Worlds running on
/// different threads all resolve through the same instance, which is what
/// keeps component ids consistent across worlds.
pub struct Registry {
    /// Rust TypeId to dense component id. Lock-free reads.
    type_map: DashMap<RustTypeId, Id>,

    /// Info records indexed by component id. Rarely written.
    infos: RwLock<Vec<Option<Info>>>,

    /// Next id in the sequence.
    next_id: AtomicU16,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            type_map: DashMap::new(),
            infos: RwLock::new(Vec::new()),
            next_id: AtomicU16::new(0),
        }
    }

    /// Register component type `C`, returning its id. Registering an already
    /// known type returns the existing id.
    pub fn register<C: Component>(&self) -> Id {
        let rust_id = RustTypeId::of::<C>();

        // Fast path: already registered.
        if let Some(id) = self.type_map.get(&rust_id) {
            return *id;
        }

        // Slow path: the entry API resolves the race where two threads both
        // miss the fast path for the same type.
        *self
            .type_map
            .entry(rust_id)
            .or_insert_with(|| {
                let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
                let id = Id::new(raw);

                let mut infos = self.infos.write().unwrap();
                let index = id.index();
                if index >= infos.len() {
                    infos.resize(index + 1, None);
                }
                infos[index] = Some(Info {
                    id,
                    kind: C::KIND,
                    name: type_name::<C>(),
                });

                id
            })
            .value()
    }

    /// Look up the id for component type `C`, if it has been registered.
    #[inline]
    pub fn get<C: Component>(&self) -> Option<Id> {
        self.type_map
            .get(&RustTypeId::of::<C>())
            .map(|entry| *entry.value())
    }

    /// Look up the info record for a component id.
    #[inline]
    pub fn info(&self, id: Id) -> Option<Info> {
        self.infos.read().unwrap().get(id.index()).copied().flatten()
    }

    /// The number of registered component types. Any assigned id is valid
    /// for indexing sparse tables of at least this length.
    #[inline]
    pub fn len(&self) -> usize {
        self.next_id.load(Ordering::Relaxed) as usize
    }

    /// Whether no component types have been registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    struct Position;
    impl Component for Position {}

    struct Velocity;
    impl Component for Velocity {}

    struct Sparks;
    impl Component for Sparks {
        const KIND: Kind = Kind::FreeDisposable;
    }

    #[test]
    fn registration_assigns_dense_ids() {
        // Given
        let registry = Registry::new();

        // When
        let pos = registry.register::<Position>();
        let vel = registry.register::<Velocity>();

        // Then
        assert_ne!(pos, vel);
        assert_eq!(registry.len(), 2);
        assert_eq!(pos.index().max(vel.index()), 1);

        // Then - registering again returns the same id
        assert_eq!(registry.register::<Position>(), pos);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn info_records_kind_and_name() {
        // Given
        let registry = Registry::new();
        let id = registry.register::<Sparks>();

        // When
        let info = registry.info(id).unwrap();

        // Then
        assert_eq!(info.id(), id);
        assert_eq!(info.kind(), Kind::FreeDisposable);
        assert!(info.name().contains("Sparks"));
    }

    #[test]
    fn lookup_of_unregistered_type_is_none() {
        struct Unseen;
        impl Component for Unseen {}

        let registry = Registry::new();
        assert!(registry.get::<Unseen>().is_none());
        assert!(registry.info(Id::new(7)).is_none());
    }

    #[test]
    fn concurrent_registration_agrees() {
        // Given
        let registry = Arc::new(Registry::new());

        // When - many threads race to register the same types
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    if i % 2 == 0 {
                        registry.register::<Position>()
                    } else {
                        registry.register::<Velocity>()
                    }
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Then - each type resolved to a single id
        let pos: Vec<_> = results.iter().step_by(2).collect();
        let vel: Vec<_> = results.iter().skip(1).step_by(2).collect();
        assert!(pos.iter().all(|&&id| id == *pos[0]));
        assert!(vel.iter().all(|&&id| id == *vel[0]));
        assert_ne!(pos[0], vel[0]);
        assert_eq!(registry.len(), 2);
    }
}
