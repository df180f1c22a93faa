//! A frame-synchronous entity-component-system runtime.
//!
//! Application logic is decomposed into *entities* (opaque identities),
//! *components* (plain data in dense per-type arrays), and *systems*
//! (processors declaring the component types they read and write). The
//! runtime drives deterministic frames: staged mutations apply at the frame
//! boundary, systems execute in conflict-free parallel groups on a fixed
//! worker pool, disposable components are cleared at frame end, and an
//! optional locality pass keeps sibling components at matching offsets.
//!
//! # Quick start
//!
//! ```ignore
//! use tempo_engine::prelude::*;
//!
//! struct Counter { value: u64 }
//! impl Component for Counter {}
//!
//! struct CountUp;
//! impl System for CountUp {
//!     fn declare(&self, requirements: &mut Requirements) {
//!         requirements.write::<Counter>();
//!     }
//!     fn update(&mut self, ctx: &mut Context<'_>) {
//!         let mut counters = ctx.interested_mut::<Counter>();
//!         for (_, counter) in counters.iter_mut() {
//!             counter.value += 1;
//!         }
//!     }
//! }
//!
//! let runtime = Runtime::new();
//! runtime.run();
//! let world = runtime.new_world(WorldConfig::default()).unwrap();
//! world.register_system(CountUp);
//! world.new_entity().add(Counter { value: 0 });
//! world.run();
//! ```

pub mod core;
pub mod ecs;

pub mod prelude {
    //! The crate's common imports.
    pub use crate::core::{Runtime, RuntimeConfig, WorldConfig};
    pub use crate::ecs::{
        Component, Context, Entity, EntityInfo, Kind, Mode, Order, Requirements, Status, System,
        World,
    };
}
