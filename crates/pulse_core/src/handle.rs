//! Generational handle tables.
//!
//! Sessions and object trees are handed to integer-handle callers through a
//! [`HandleTable`]. A handle packs a slot index and the slot's generation;
//! releasing a slot bumps its generation so stale handles are detected
//! instead of aliasing whatever reuses the slot.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::fmt;

/// A handle into a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Packs the handle into one integer (generation high, index low).
    #[must_use]
    pub const fn to_raw(self) -> i64 {
        ((self.generation as i64) << 32) | self.index as i64
    }

    /// Unpacks an integer produced by [`Handle::to_raw`].
    ///
    /// Any integer unpacks; validity is only checked against a table.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self {
            index: (raw & 0xFFFF_FFFF) as u32,
            generation: ((raw >> 32) & 0xFFFF_FFFF) as u32,
        }
    }

    /// Slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct Slots<T> {
    // Slot 0 is a permanent placeholder so no handle ever packs to 0.
    slots: Vec<Slot<T>>,
    live: usize,
}

/// A fixed-capacity generational arena guarded by its own lock.
///
/// # Thread Safety
///
/// The table lock is independent of any session lock. Closures passed to
/// [`HandleTable::with`] and [`HandleTable::with_mut`] run under the table
/// lock and must not call back into the same table.
pub struct HandleTable<T> {
    what: &'static str,
    capacity: usize,
    inner: Mutex<Slots<T>>,
}

impl<T> HandleTable<T> {
    /// Creates an empty table holding at most `capacity` live values.
    ///
    /// `what` names the table in errors.
    #[must_use]
    pub fn new(what: &'static str, capacity: usize) -> Self {
        Self {
            what,
            capacity,
            inner: Mutex::new(Slots {
                slots: vec![Slot {
                    generation: 0,
                    value: None,
                }],
                live: 0,
            }),
        }
    }

    /// Stores `value` in the lowest free slot.
    ///
    /// # Errors
    ///
    /// Returns `HandleExhausted` if every slot is in use.
    pub fn acquire(&self, value: T) -> CoreResult<Handle> {
        let mut inner = self.inner.lock();
        if inner.live >= self.capacity {
            return Err(CoreError::HandleExhausted {
                what: self.what,
                capacity: self.capacity,
            });
        }

        let free = inner
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.value.is_none())
            .map(|(i, _)| i);
        let index = match free {
            Some(i) => i,
            None => {
                inner.slots.push(Slot {
                    generation: 1,
                    value: None,
                });
                inner.slots.len() - 1
            }
        };
        let index_u32 = u32::try_from(index).map_err(|_| CoreError::HandleExhausted {
            what: self.what,
            capacity: self.capacity,
        })?;

        let slot = &mut inner.slots[index];
        slot.value = Some(value);
        let generation = slot.generation;
        inner.live += 1;
        Ok(Handle {
            index: index_u32,
            generation,
        })
    }

    /// Removes and returns the value behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` if the handle is stale or was never issued.
    pub fn release(&self, handle: Handle) -> CoreResult<T> {
        let mut inner = self.inner.lock();
        let slot = Self::slot_mut(&mut inner, handle)?;
        let value = slot
            .value
            .take()
            .ok_or(CoreError::UseAfterRelease {
                handle: handle.to_raw(),
            })?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        inner.live -= 1;
        Ok(value)
    }

    /// Runs `f` on the value behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` if the handle is stale.
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&T) -> R) -> CoreResult<R> {
        let mut inner = self.inner.lock();
        let slot = Self::slot_mut(&mut inner, handle)?;
        slot.value.as_ref().map(f).ok_or(CoreError::UseAfterRelease {
            handle: handle.to_raw(),
        })
    }

    /// Runs `f` on the value behind `handle`, mutably.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` if the handle is stale.
    pub fn with_mut<R>(&self, handle: Handle, f: impl FnOnce(&mut T) -> R) -> CoreResult<R> {
        let mut inner = self.inner.lock();
        let slot = Self::slot_mut(&mut inner, handle)?;
        slot.value.as_mut().map(f).ok_or(CoreError::UseAfterRelease {
            handle: handle.to_raw(),
        })
    }

    /// Whether `handle` refers to a live value.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.with(handle, |_| ()).is_ok()
    }

    /// Number of live values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    /// Whether no values are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of live values.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot_mut(inner: &mut Slots<T>, handle: Handle) -> CoreResult<&mut Slot<T>> {
        let stale = CoreError::UseAfterRelease {
            handle: handle.to_raw(),
        };
        if handle.index == 0 {
            return Err(stale);
        }
        match inner.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => Ok(slot),
            _ => Err(stale),
        }
    }
}

impl<T: Clone> HandleTable<T> {
    /// Returns a clone of the value behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` if the handle is stale.
    pub fn get(&self, handle: Handle) -> CoreResult<T> {
        self.with(handle, Clone::clone)
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("what", &self.what)
            .field("capacity", &self.capacity)
            .field("live", &self.len())
            .finish()
    }
}
