//! The entity-component-system core.
//!
//! - [`component`]: component types, the process-wide id registry, dense
//!   storages and borrow-guarded views.
//! - [`entity`]: entity identity and the entity-to-components table.
//! - [`mutation`]: the sharded staging buffer for deferred mutations.
//! - [`sibling`]: the advisory sibling-lookup cache.
//! - [`system`]: the system trait, requirements, lifecycle, and the per-frame
//!   context.
//! - [`world`]: the world handle and the frame pipeline driving it all.

pub mod component;
pub mod entity;
pub mod mutation;
pub(crate) mod schedule;
pub mod sibling;
pub mod system;
pub mod world;

pub use component::{Component, Kind};
pub use entity::Entity;
pub use system::{Context, Mode, Order, Requirements, System};
pub use world::{EntityInfo, Status, World};
