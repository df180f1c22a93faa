//! Component types, their process-wide ids, and their dense storage.
//!
//! A component is plain data attached to an entity (or, for free kinds, to no
//! entity at all). Every component type gets a dense `u16` [`Id`] from the
//! process-wide [`registry`] on first use; the id indexes the sparse per-type
//! storage table inside a world.

pub mod registry;
pub mod storage;
pub mod view;

pub use registry::type_id_of;
pub use storage::{Relocation, Storage, StorageCell, Storages};
pub use view::{Sibling, SiblingMut, View, ViewMut};

/// The kind of a component type, which determines its ownership and lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Owned by an entity, persists until removed.
    Normal,
    /// Owned by an entity, removed automatically at the end of the frame in
    /// which it was added.
    Disposable,
    /// Not owned by any entity.
    Free,
    /// Free and removed at the end of the frame in which it was added.
    FreeDisposable,
}

impl Kind {
    /// Whether components of this kind belong to an entity.
    #[inline]
    pub const fn is_owned(self) -> bool {
        matches!(self, Kind::Normal | Kind::Disposable)
    }

    /// Whether components of this kind are cleared at the end of the frame.
    #[inline]
    pub const fn is_disposable(self) -> bool {
        matches!(self, Kind::Disposable | Kind::FreeDisposable)
    }
}

/// A component: a plain data record stored in a dense per-type array.
///
/// Implementations only choose a [`Kind`]; everything else (the owning
/// entity, the storage index) is managed by the world.
///
/// ```ignore
/// struct Position { x: f32, y: f32 }
///
/// impl Component for Position {}
///
/// struct DamageTaken { amount: u32 }
///
/// impl Component for DamageTaken {
///     const KIND: Kind = Kind::Disposable;
/// }
/// ```
pub trait Component: Send + Sync + 'static {
    /// The kind of this component type.
    const KIND: Kind = Kind::Normal;
}

/// A component type identifier: a small dense integer assigned on first
/// registration, stable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u16);

impl Id {
    /// Construct an id from a raw value.
    #[inline]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// The raw id value.
    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// The index of this id in sparse per-type tables.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}
