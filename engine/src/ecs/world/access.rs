//! Component access sets for scheduler conflict detection.
//!
//! Each system's declared requirements compile down to a pair of bitsets,
//! one bit per component id. Two accesses conflict when they cannot run
//! concurrently under the at-most-one-writer rule:
//! - multiple readers of the same component are fine,
//! - a writer excludes every other reader and writer of that component.

use fixedbitset::FixedBitSet;

use crate::ecs::component;
use crate::ecs::system::{Mode, Requirements};

/// The read/write component sets of a system, or the running union of a
/// parallel group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    reads: FixedBitSet,
    writes: FixedBitSet,
}

impl Access {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the access set from a system's declared requirements.
    pub fn from_requirements(requirements: &Requirements) -> Self {
        let mut access = Self::empty();
        for (id, mode) in requirements.iter() {
            match mode {
                Mode::Read => access.add_read(id),
                Mode::Write => access.add_write(id),
            }
        }
        access
    }

    pub fn add_read(&mut self, id: component::Id) {
        set(&mut self.reads, id.index());
    }

    pub fn add_write(&mut self, id: component::Id) {
        set(&mut self.writes, id.index());
    }

    /// Whether the two accesses may not run concurrently: either side writes
    /// a component the other touches.
    pub fn conflicts_with(&self, other: &Access) -> bool {
        !self.writes.is_disjoint(&other.writes)
            || !self.writes.is_disjoint(&other.reads)
            || !self.reads.is_disjoint(&other.writes)
    }

    /// Fold another access into this one.
    pub fn merge_with(&mut self, other: &Access) {
        self.reads.union_with(&other.reads);
        self.writes.union_with(&other.writes);
    }

    pub fn clear(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_clear() && self.writes.is_clear()
    }
}

fn set(bits: &mut FixedBitSet, index: usize) {
    bits.grow(index + 1);
    bits.insert(index);
}
