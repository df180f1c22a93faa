//! The storage-locality optimizer (frame phase 6).
//!
//! Iterating storage A and fetching each entity's sibling in storage B is
//! fastest when both storages keep the same entity order. The optimizer
//! re-sorts owned-kind storages by owner entity, so siblings end up at
//! similar offsets, and patches every relocation into the entity table.
//!
//! The pass is budgeted: storages are visited round-robin across frames and
//! no new storage is started once the budget has elapsed. A storage is
//! always sorted whole; a partially optimized world simply resumes at the
//! next armed frame.

use std::time::{Duration, Instant};

use log::debug;

use crate::ecs::component::{registry, Storages};
use crate::ecs::entity::EntityTable;
use crate::ecs::world::pipeline::StructuralError;

#[derive(Default)]
pub(crate) struct Optimizer {
    /// Round-robin position across storages, persisted between frames.
    cursor: usize,
}

impl Optimizer {
    /// Sort storages by owner until the budget elapses. Returns whether any
    /// component moved.
    pub fn run(
        &mut self,
        storages: &mut Storages,
        table: &mut EntityTable,
        budget: Duration,
    ) -> Result<bool, StructuralError> {
        let total = storages.len();
        if total == 0 {
            return Ok(false);
        }

        let started = Instant::now();
        let ids = storages.ids().to_vec();
        let mut moved = false;

        for step in 0..total {
            // The first storage always runs, so an armed world makes
            // progress even under a tiny budget.
            if step > 0 && started.elapsed() >= budget {
                break;
            }

            let id = ids[self.cursor % total];
            self.cursor = (self.cursor + 1) % total;

            let owned = registry::global()
                .info(id)
                .is_some_and(|info| info.kind().is_owned());
            if !owned {
                continue;
            }

            let storage = storages.get_mut(id).expect("listed id has a storage");
            let Some(layout) = storage.sort_by_owner() else {
                continue;
            };
            for (owner, index) in layout {
                if owner.is_none() {
                    continue;
                }
                if !table.patch(owner, id, index) {
                    return Err(StructuralError::new(format!(
                        "optimizer relocated component {} of entity {} with no table row",
                        id.value(),
                        owner.raw()
                    )));
                }
            }
            moved = true;
        }

        if moved {
            debug!("optimizer re-sorted storages in {:?}", started.elapsed());
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{type_id_of, Component, Storage};
    use crate::ecs::entity::Entity;

    struct Mass(u32);
    impl Component for Mass {}

    #[test]
    fn sorting_patches_the_entity_table() {
        // Given - a storage with scrambled owner order
        let id = type_id_of::<Mass>();
        let mut storages = Storages::new();
        let mut table = EntityTable::new();

        let mut storage = Storage::<Mass>::new();
        for raw in [5u64, 2, 9, 1] {
            let entity = Entity::from_raw(raw);
            let index = storage.append(entity, Mass(raw as u32));
            table.attach(entity, id, index);
        }
        storages.insert(id, Box::new(storage));

        // When
        let mut optimizer = Optimizer::default();
        let moved = optimizer
            .run(&mut storages, &mut table, Duration::from_millis(10))
            .unwrap();

        // Then - every row points at the sorted position
        assert!(moved);
        assert_eq!(table.index_of(Entity::from_raw(1), id), Some(0));
        assert_eq!(table.index_of(Entity::from_raw(2), id), Some(1));
        assert_eq!(table.index_of(Entity::from_raw(5), id), Some(2));
        assert_eq!(table.index_of(Entity::from_raw(9), id), Some(3));

        // Then - a second run finds everything sorted
        let again = optimizer
            .run(&mut storages, &mut table, Duration::from_millis(10))
            .unwrap();
        assert!(!again);
    }

    #[test]
    fn empty_world_is_a_noop() {
        let mut optimizer = Optimizer::default();
        let mut storages = Storages::new();
        let mut table = EntityTable::new();
        assert!(!optimizer
            .run(&mut storages, &mut table, Duration::from_millis(1))
            .unwrap());
    }
}
