//! Partitioning ordered systems into parallel groups.
//!
//! The scheduler sorts systems by `(Order, registration id)` and walks the
//! sorted sequence once, packing consecutive systems into a group while they
//! stay compatible:
//!
//! - systems with a different `Order` never share a group (order is a hard
//!   barrier within the frame),
//! - a candidate joins when its writes are disjoint from the group's reads
//!   and writes, and its reads are disjoint from the group's writes,
//! - thread-safe-flagged systems join regardless of conflicts; they assert
//!   their own synchronization and do not contribute to the group's access
//!   union.
//!
//! Within a group, systems run concurrently on the worker pool; across
//! groups the pipeline barriers. The schedule is recomputed only when the
//! system set changes.

use crate::ecs::system::registry::Entry;
use crate::ecs::system::Order;
use crate::ecs::world::access::Access;

/// An ordered sequence of parallel groups, each a list of indices into the
/// system registry.
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    groups: Vec<Vec<usize>>,
}

impl Schedule {
    /// Compute the grouping for the current system set.
    pub fn rebuild(entries: &[Entry]) -> Self {
        let mut indices: Vec<usize> = (0..entries.len()).collect();
        indices.sort_by_key(|&i| (entries[i].meta.order, entries[i].meta.id));

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut group: Vec<usize> = Vec::new();
        let mut group_access = Access::empty();
        let mut group_order: Option<Order> = None;

        for index in indices {
            let meta = &entries[index].meta;

            let same_order = group_order == Some(meta.order);
            let compatible = meta.requirements.is_thread_safe()
                || !meta.access.conflicts_with(&group_access);

            if !group.is_empty() && (!same_order || !compatible) {
                groups.push(std::mem::take(&mut group));
                group_access.clear();
            }

            group.push(index);
            group_order = Some(meta.order);
            if !meta.requirements.is_thread_safe() {
                group_access.merge_with(&meta.access);
            }
        }
        if !group.is_empty() {
            groups.push(group);
        }

        Self { groups }
    }

    #[inline]
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{self, Component};
    use crate::ecs::system::registry::SystemRegistry;
    use crate::ecs::system::{Context, Mode, Requirements, System};

    struct CompA;
    impl Component for CompA {}

    struct CompB;
    impl Component for CompB {}

    // A configurable test system: declares the requirements it is given.
    struct Probe {
        reads: Vec<fn(&mut Requirements)>,
        safe: bool,
    }

    impl System for Probe {
        fn declare(&self, requirements: &mut Requirements) {
            for declare in &self.reads {
                declare(requirements);
            }
            if self.safe {
                requirements.thread_safe();
            }
        }

        fn update(&mut self, _ctx: &mut Context<'_>) {}
    }

    // The registry rejects duplicate system types, so scheduler tests
    // register hand-built entries directly through distinct marker types.
    macro_rules! probe_system {
        ($name:ident, $($decl:expr),* ; safe: $safe:expr) => {{
            struct $name;
            impl System for $name {
                fn declare(&self, _r: &mut Requirements) {}
                fn update(&mut self, _ctx: &mut Context<'_>) {}
            }
            (
                Box::new(Probe { reads: vec![$($decl),*], safe: $safe }) as Box<dyn System>,
                std::any::TypeId::of::<$name>(),
                stringify!($name),
            )
        }};
    }

    fn read_a(r: &mut Requirements) {
        r.require::<CompA>(Mode::Read);
    }
    fn write_a(r: &mut Requirements) {
        r.require::<CompA>(Mode::Write);
    }
    fn write_b(r: &mut Requirements) {
        r.require::<CompB>(Mode::Write);
    }

    #[test]
    fn empty_registry_schedules_no_groups() {
        let registry = SystemRegistry::default();
        let schedule = Schedule::rebuild(registry.entries());
        assert!(schedule.is_empty());
    }

    #[test]
    fn disjoint_writers_share_a_group() {
        // Given - one writer of A, one writer of B, same order
        let mut registry = SystemRegistry::default();
        let (s1, t1, n1) = probe_system!(WriterA, write_a ; safe: false);
        let (s2, t2, n2) = probe_system!(WriterB, write_b ; safe: false);
        registry.register(s1, t1, n1, Order::DEFAULT);
        registry.register(s2, t2, n2, Order::DEFAULT);

        // When
        let schedule = Schedule::rebuild(registry.entries());

        // Then - one parallel group of two
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.groups()[0], vec![0, 1]);
    }

    #[test]
    fn writer_and_reader_split_into_sequential_groups() {
        // Given - a writer of A followed by a reader of A
        let mut registry = SystemRegistry::default();
        let (s1, t1, n1) = probe_system!(WriteFirst, write_a ; safe: false);
        let (s2, t2, n2) = probe_system!(ReadSecond, read_a ; safe: false);
        registry.register(s1, t1, n1, Order::DEFAULT);
        registry.register(s2, t2, n2, Order::DEFAULT);

        // When
        let schedule = Schedule::rebuild(registry.entries());

        // Then - the writer completes before the reader starts
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.groups()[0], vec![0]);
        assert_eq!(schedule.groups()[1], vec![1]);
    }

    #[test]
    fn readers_of_same_component_share_a_group() {
        // Given
        let mut registry = SystemRegistry::default();
        let (s1, t1, n1) = probe_system!(ReaderOne, read_a ; safe: false);
        let (s2, t2, n2) = probe_system!(ReaderTwo, read_a ; safe: false);
        registry.register(s1, t1, n1, Order::DEFAULT);
        registry.register(s2, t2, n2, Order::DEFAULT);

        // When
        let schedule = Schedule::rebuild(registry.entries());

        // Then
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.groups()[0].len(), 2);
    }

    #[test]
    fn order_is_a_hard_barrier() {
        // Given - two non-conflicting systems with different orders
        let mut registry = SystemRegistry::default();
        let (s1, t1, n1) = probe_system!(LateWriter, write_b ; safe: false);
        let (s2, t2, n2) = probe_system!(EarlyWriter, write_a ; safe: false);
        registry.register(s1, t1, n1, Order::BACK);
        registry.register(s2, t2, n2, Order::FRONT);

        // When
        let schedule = Schedule::rebuild(registry.entries());

        // Then - sorted by order into separate groups, FRONT first
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.groups()[0], vec![1]);
        assert_eq!(schedule.groups()[1], vec![0]);
    }

    #[test]
    fn registration_id_breaks_order_ties() {
        // Given - two conflicting writers registered in a known order
        let mut registry = SystemRegistry::default();
        let (s1, t1, n1) = probe_system!(FirstRegistered, write_a ; safe: false);
        let (s2, t2, n2) = probe_system!(SecondRegistered, write_a ; safe: false);
        registry.register(s1, t1, n1, Order::DEFAULT);
        registry.register(s2, t2, n2, Order::DEFAULT);

        // When
        let schedule = Schedule::rebuild(registry.entries());

        // Then - the earlier registration runs first
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.groups()[0], vec![0]);
        assert_eq!(schedule.groups()[1], vec![1]);
    }

    #[test]
    fn thread_safe_systems_join_despite_conflicts() {
        // Given - two writers of A, the second asserting thread safety
        let mut registry = SystemRegistry::default();
        let (s1, t1, n1) = probe_system!(PlainWriter, write_a ; safe: false);
        let (s2, t2, n2) = probe_system!(SafeWriter, write_a ; safe: true);
        registry.register(s1, t1, n1, Order::DEFAULT);
        registry.register(s2, t2, n2, Order::DEFAULT);

        // When
        let schedule = Schedule::rebuild(registry.entries());

        // Then - one group despite the write/write conflict
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.groups()[0], vec![0, 1]);
    }

    #[test]
    fn mixed_chain_produces_expected_waves() {
        // Given - writes A | writes B | reads A (conflicts with the first)
        let mut registry = SystemRegistry::default();
        let (s1, t1, n1) = probe_system!(ChainWriteA, write_a ; safe: false);
        let (s2, t2, n2) = probe_system!(ChainWriteB, write_b ; safe: false);
        let (s3, t3, n3) = probe_system!(ChainReadA, read_a ; safe: false);
        registry.register(s1, t1, n1, Order::DEFAULT);
        registry.register(s2, t2, n2, Order::DEFAULT);
        registry.register(s3, t3, n3, Order::DEFAULT);

        // When
        let schedule = Schedule::rebuild(registry.entries());

        // Then - the walk keeps {A, B} together and splits the reader off
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.groups()[0], vec![0, 1]);
        assert_eq!(schedule.groups()[1], vec![2]);
    }

    #[test]
    fn registering_many_readers_stays_single_group() {
        // Given - the component ids exist
        let _ = component::type_id_of::<CompA>();

        let mut registry = SystemRegistry::default();
        let (s1, t1, n1) = probe_system!(BulkOne, read_a ; safe: false);
        let (s2, t2, n2) = probe_system!(BulkTwo, read_a ; safe: false);
        let (s3, t3, n3) = probe_system!(BulkThree, read_a ; safe: false);
        registry.register(s1, t1, n1, Order::DEFAULT);
        registry.register(s2, t2, n2, Order::DEFAULT);
        registry.register(s3, t3, n3, Order::DEFAULT);

        // When
        let schedule = Schedule::rebuild(registry.entries());

        // Then
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.groups()[0].len(), 3);
    }
}
