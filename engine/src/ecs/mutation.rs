//! Deferred mutation staging.
//!
//! Systems never touch storages structurally during execution; every add,
//! remove, and entity destruction lands in the [`MutationLog`] and is applied
//! by the pipeline at the next frame boundary. The log is sharded: operations
//! on the same owned entity hash to the same shard (`entity & mask`), which
//! preserves per-entity submission order without a global lock. Free
//! components hash a monotonic counter instead, spreading them across shards
//! deterministically; the same counter value becomes the component's
//! addressable free id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::core::config::bucket_count;
use crate::ecs::component::storage::ErasedStorage;
use crate::ecs::component::{self, Component, Kind, Storage};
use crate::ecs::entity::Entity;

/// The staged operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Remove,
}

/// Moves a staged component value into its typed storage without the log
/// knowing the concrete type.
pub(crate) trait ErasedInsert: Send {
    /// Build an empty storage for this component type, used when the type is
    /// seen for the first time.
    fn new_storage(&self) -> Box<dyn ErasedStorage>;

    /// Append the staged value. Returns the new index, or `None` when a free
    /// id collision rejected the insert.
    fn insert(
        self: Box<Self>,
        storage: &mut dyn ErasedStorage,
        entity: Entity,
        free_id: Option<u64>,
    ) -> Option<usize>;
}

struct Insert<C: Component>(C);

impl<C: Component> ErasedInsert for Insert<C> {
    fn new_storage(&self) -> Box<dyn ErasedStorage> {
        Box::new(Storage::<C>::new())
    }

    fn insert(
        self: Box<Self>,
        storage: &mut dyn ErasedStorage,
        entity: Entity,
        free_id: Option<u64>,
    ) -> Option<usize> {
        let storage = storage
            .as_any_mut()
            .downcast_mut::<Storage<C>>()
            .expect("component storage type mismatch");
        match free_id {
            Some(id) => storage.append_with_id(id, self.0),
            None => Some(storage.append(entity, self.0)),
        }
    }
}

/// One staged operation.
pub struct Op {
    pub kind: OpKind,
    /// Owning entity, or [`Entity::NONE`] for free components.
    pub entity: Entity,
    pub component_kind: Kind,
    /// Assigned id for free adds.
    pub free_id: Option<u64>,
    pub(crate) payload: Option<Box<dyn ErasedInsert>>,
}

type PerType = HashMap<component::Id, Vec<Op>>;

#[derive(Default)]
struct ShardState {
    per_type: PerType,
    destroys: Vec<Entity>,
}

struct Shard {
    state: Mutex<ShardState>,
}

/// The sharded staging buffer for pending mutations.
pub struct MutationLog {
    shards: Vec<Shard>,
    mask: u64,
    free_seq: AtomicU64,
}

impl MutationLog {
    /// Create a log with `hash_buckets` shards, rounded up to a power of
    /// two.
    pub fn new(hash_buckets: usize) -> Self {
        let count = bucket_count(hash_buckets);
        let shards = (0..count)
            .map(|_| Shard {
                state: Mutex::new(ShardState::default()),
            })
            .collect();
        Self {
            shards,
            mask: (count - 1) as u64,
            free_seq: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Stage adding a component. Owned kinds record `entity` as the owner;
    /// free kinds ignore it and receive a fresh free id.
    pub fn submit_add<C: Component>(&self, entity: Entity, value: C) {
        let type_id = component::type_id_of::<C>();
        let kind = C::KIND;

        let (shard, owner, free_id) = if kind.is_owned() {
            debug_assert!(!entity.is_none());
            (self.shard_of(entity), entity, None)
        } else {
            let id = self.free_seq.fetch_add(1, Ordering::Relaxed);
            ((id & self.mask) as usize, Entity::NONE, Some(id))
        };

        self.push(
            shard,
            type_id,
            Op {
                kind: OpKind::Add,
                entity: owner,
                component_kind: kind,
                free_id,
                payload: Some(Box::new(Insert(value))),
            },
        );
    }

    /// Stage removing `entity`'s component of the given type.
    pub fn submit_remove(&self, entity: Entity, type_id: component::Id, kind: Kind) {
        debug_assert!(kind.is_owned());
        self.push(
            self.shard_of(entity),
            type_id,
            Op {
                kind: OpKind::Remove,
                entity,
                component_kind: kind,
                free_id: None,
                payload: None,
            },
        );
    }

    /// Stage destroying an entity: all owned components plus the entity row
    /// are removed when the log is drained.
    pub fn submit_destroy(&self, entity: Entity) {
        let shard = self.shard_of(entity);
        let mut state = self.shards[shard].state.lock().unwrap();
        state.destroys.push(entity);
    }

    /// Move every staged operation out of the log, merged per component
    /// type. Within a type, ops from one shard keep submission order, so
    /// per-entity ordering holds; the merge order across shards follows the
    /// shard index. Draining an empty log returns an empty batch.
    pub fn drain(&self) -> Drained {
        let mut per_type: PerType = HashMap::new();
        let mut destroys = Vec::new();

        for shard in &self.shards {
            let taken = {
                let mut state = shard.state.lock().unwrap();
                std::mem::take(&mut *state)
            };
            for (type_id, mut ops) in taken.per_type {
                per_type.entry(type_id).or_default().append(&mut ops);
            }
            destroys.extend(taken.destroys);
        }

        let mut per_type: Vec<_> = per_type.into_iter().collect();
        per_type.sort_by_key(|&(type_id, _)| type_id);

        Drained { per_type, destroys }
    }

    #[inline]
    fn shard_of(&self, entity: Entity) -> usize {
        (entity.raw() & self.mask) as usize
    }

    fn push(&self, shard: usize, type_id: component::Id, op: Op) {
        let mut state = self.shards[shard].state.lock().unwrap();
        state.per_type.entry(type_id).or_default().push(op);
    }
}

/// A drained batch of staged mutations, ready to apply.
pub struct Drained {
    /// Per-type operation lists, sorted by component id.
    pub per_type: Vec<(component::Id, Vec<Op>)>,
    /// Entities staged for destruction.
    pub destroys: Vec<Entity>,
}

impl Drained {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.per_type.is_empty() && self.destroys.is_empty()
    }
}
