//! Borrow-guarded component access for systems.
//!
//! A [`View`]/[`ViewMut`] is a whole-storage borrow used to iterate every
//! component of a declared type; a [`Sibling`]/[`SiblingMut`] is a borrow of
//! a single component found through the sibling lookup path. All four hold
//! the storage cell's atomic borrow flag and release it on drop.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::AtomicUsize;

use crate::ecs::component::storage::{Storage, StorageCell};
use crate::ecs::component::Component;
use crate::ecs::entity::Entity;

fn downcast<C: Component>(erased: &dyn super::storage::ErasedStorage) -> &Storage<C> {
    erased
        .as_any()
        .downcast_ref::<Storage<C>>()
        .expect("component storage type mismatch")
}

/// A shared borrow of every component of type `C`.
///
/// Yields `(owner, &C)` pairs in the storage's current physical order; free
/// components report [`Entity::NONE`] as their owner.
pub struct View<'a, C: Component> {
    inner: Option<ViewInner<'a, C>>,
}

struct ViewInner<'a, C: Component> {
    flag: &'a AtomicUsize,
    storage: &'a Storage<C>,
}

impl<'a, C: Component> View<'a, C> {
    /// A view over a storage that does not exist yet.
    pub(crate) fn empty() -> Self {
        Self { inner: None }
    }

    pub(crate) fn acquire(cell: &'a StorageCell) -> Self {
        let flag = cell.acquire_read();
        // SAFETY: the shared borrow taken above is held until this view
        // drops.
        let storage = downcast::<C>(unsafe { cell.storage() });
        Self {
            inner: Some(ViewInner { flag, storage }),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |i| i.storage.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&C> {
        self.inner.as_ref().and_then(|i| i.storage.get(index))
    }

    /// Iterate `(owner, &component)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &C)> {
        self.inner.iter().flat_map(|i| i.storage.entries())
    }
}

impl<C: Component> Drop for View<'_, C> {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            StorageCell::release_read(inner.flag);
        }
    }
}

/// An exclusive borrow of every component of type `C`.
pub struct ViewMut<'a, C: Component> {
    inner: Option<ViewMutInner<'a, C>>,
}

struct ViewMutInner<'a, C: Component> {
    flag: &'a AtomicUsize,
    storage: &'a mut Storage<C>,
}

impl<'a, C: Component> ViewMut<'a, C> {
    pub(crate) fn empty() -> Self {
        Self { inner: None }
    }

    pub(crate) fn acquire(cell: &'a StorageCell) -> Self {
        let flag = cell.acquire_write();
        // SAFETY: the exclusive borrow taken above is held until this view
        // drops.
        let storage = unsafe { cell.storage_mut() }
            .as_any_mut()
            .downcast_mut::<Storage<C>>()
            .expect("component storage type mismatch");
        Self {
            inner: Some(ViewMutInner { flag, storage }),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |i| i.storage.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut C> {
        self.inner.as_mut().and_then(|i| i.storage.get_mut(index))
    }

    /// Iterate `(owner, &mut component)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut C)> + use<'_, 'a, C> {
        self.inner.iter_mut().flat_map(|i| i.storage.entries_mut())
    }
}

impl<C: Component> Drop for ViewMut<'_, C> {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            StorageCell::release_write(inner.flag);
        }
    }
}

/// A shared borrow of one component found through the sibling lookup path.
pub struct Sibling<'a, C: Component> {
    flag: &'a AtomicUsize,
    value: &'a C,
}

impl<'a, C: Component> Sibling<'a, C> {
    /// Borrow the component at `index` when it is owned by `owner`. Returns
    /// `None` (releasing the borrow) when the index is out of range or owned
    /// by someone else, which callers treat as a stale-lookup miss.
    pub(crate) fn acquire(cell: &'a StorageCell, index: usize, owner: Entity) -> Option<Self> {
        let flag = cell.acquire_read();
        // SAFETY: the shared borrow taken above is held until this guard
        // drops or is released on the miss path below.
        let storage = downcast::<C>(unsafe { cell.storage() });
        if storage.owner_at(index) == Some(owner) {
            Some(Self {
                flag,
                value: storage.get(index).unwrap(),
            })
        } else {
            StorageCell::release_read(flag);
            None
        }
    }
}

impl<C: Component> Deref for Sibling<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.value
    }
}

impl<C: Component> Drop for Sibling<'_, C> {
    fn drop(&mut self) {
        StorageCell::release_read(self.flag);
    }
}

/// An exclusive borrow of one component found through the sibling lookup
/// path.
pub struct SiblingMut<'a, C: Component> {
    flag: &'a AtomicUsize,
    value: &'a mut C,
}

impl<'a, C: Component> SiblingMut<'a, C> {
    pub(crate) fn acquire(cell: &'a StorageCell, index: usize, owner: Entity) -> Option<Self> {
        let flag = cell.acquire_write();
        // SAFETY: the exclusive borrow taken above is held until this guard
        // drops or is released on the miss path below.
        let storage = unsafe { cell.storage_mut() }
            .as_any_mut()
            .downcast_mut::<Storage<C>>()
            .expect("component storage type mismatch");
        if storage.owner_at(index) == Some(owner) {
            Some(Self {
                flag,
                value: storage.get_mut(index).unwrap(),
            })
        } else {
            StorageCell::release_write(flag);
            None
        }
    }
}

impl<C: Component> Deref for SiblingMut<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.value
    }
}

impl<C: Component> DerefMut for SiblingMut<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.value
    }
}

impl<C: Component> Drop for SiblingMut<'_, C> {
    fn drop(&mut self) {
        StorageCell::release_write(self.flag);
    }
}
