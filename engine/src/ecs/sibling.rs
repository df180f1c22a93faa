//! The sibling-lookup cache.
//!
//! Hot iteration often scans storage A and, for each element, fetches the
//! same entity's component in storage B. Going through the entity table every
//! time is an extra indirection; each system keeps a small cache of
//! `entity → component type → storage index` learned lazily on first lookup.
//!
//! The cache is advisory. The apply and dispose phases emit [`CacheEvent`]s
//! into a channel for every structural change, and a single consumer applies
//! them between frames, so a cached index is either current or absent; the
//! entity table stays authoritative either way.

use std::collections::HashMap;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::ecs::component;
use crate::ecs::entity::Entity;

/// What a cache event does to the `(entity, type)` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    /// The component was (re)located. Entries are still invalidated rather
    /// than populated: the storage index is not canonical until the
    /// optimizer has had its say, so lookups repopulate lazily.
    Set,
    /// The component is gone.
    Clear,
}

/// A cache maintenance event produced while applying mutations.
#[derive(Debug, Clone, Copy)]
pub struct CacheEvent {
    pub entity: Entity,
    pub type_id: component::Id,
    pub op: CacheOp,
}

/// The world-side channel collecting cache events for the between-frames
/// consumer.
pub(crate) struct EventQueue {
    tx: Sender<CacheEvent>,
    rx: Receiver<CacheEvent>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub(crate) fn push(&self, entity: Entity, type_id: component::Id, op: CacheOp) {
        let _ = self.tx.send(CacheEvent {
            entity,
            type_id,
            op,
        });
    }

    /// Take every queued event.
    pub(crate) fn drain(&self) -> Vec<CacheEvent> {
        self.rx.try_iter().collect()
    }
}

/// A per-system sibling cache.
#[derive(Default)]
pub struct SiblingCache {
    entries: HashMap<Entity, HashMap<component::Id, usize>>,
}

impl SiblingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached storage index of `entity`'s component of the given type.
    pub fn find(&self, entity: Entity, type_id: component::Id) -> Option<usize> {
        self.entries.get(&entity)?.get(&type_id).copied()
    }

    /// Record a looked-up index.
    pub fn insert(&mut self, entity: Entity, type_id: component::Id, index: usize) {
        self.entries.entry(entity).or_default().insert(type_id, index);
    }

    /// Apply a maintenance event. Both ops drop the entry; see [`CacheOp`].
    pub fn apply(&mut self, event: &CacheEvent) {
        self.invalidate(event.entity, event.type_id);
    }

    /// Forget the entry for `(entity, type)`.
    pub fn invalidate(&mut self, entity: Entity, type_id: component::Id) {
        if let Some(types) = self.entries.get_mut(&entity) {
            types.remove(&type_id);
            if types.is_empty() {
                self.entries.remove(&entity);
            }
        }
    }

    /// Forget everything. Used after the optimizer permutes storages.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entities with cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
