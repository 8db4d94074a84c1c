/*
Fixed-block pool for short-lived simulator objects.

Storage is a list of slabs, each holding up to `SLAB` objects in one contiguous allocation that is
never resized.  Objects are addressed by `PoolHandle`, a flat slot index plus the generation of the
slot at allocation time.  Released slots go on an intrusive free list: a vacant slot only stores the
index of the next vacant slot, so release never touches the released object's neighbours.

Allocation and release are O(1).  The pool is meant for a single simulation thread; nothing here is
synchronised.
*/

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use super::stats::PoolStats;

pub struct PoolHandle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PoolHandle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Flat slot index across all slabs.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PoolHandle<T> {}

impl<T> PartialEq for PoolHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for PoolHandle<T> {}

impl<T> Hash for PoolHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolHandle({}v{})", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool exhausted: {slabs} slabs of {slab_capacity} objects are all live")]
    Exhausted { slabs: usize, slab_capacity: usize },
    #[error("contiguous run of {requested} objects exceeds slab capacity {slab_capacity}")]
    RunTooLong { requested: usize, slab_capacity: usize },
}

/// Growth policy. `max_slabs: None` lets the pool grow without bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolLimits {
    pub max_slabs: Option<usize>,
}

#[derive(Debug)]
enum Slot<T> {
    Vacant { next_free: Option<u32> },
    Occupied(T),
}

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

#[derive(Debug)]
pub struct PoolAllocator<T, const SLAB: usize> {
    // Only the last slab can have len() < SLAB.
    slabs: Vec<Vec<Entry<T>>>,
    free_head: Option<u32>,
    limits: PoolLimits,
    stats: PoolStats,
}

impl<T, const SLAB: usize> Default for PoolAllocator<T, SLAB> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const SLAB: usize> PoolAllocator<T, SLAB> {
    pub fn new() -> Self {
        Self::with_limits(PoolLimits::default())
    }

    pub fn with_limits(limits: PoolLimits) -> Self {
        assert!(SLAB > 0, "slab capacity must be > 0");
        Self {
            slabs: Vec::new(),
            free_head: None,
            limits,
            stats: PoolStats::default(),
        }
    }

    pub fn slab_capacity(&self) -> usize {
        SLAB
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.stats.live() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots currently backed by slabs, live or not.
    pub fn capacity(&self) -> usize {
        self.slabs.len() * SLAB
    }

    /// Place `value` in a free slot. Panics if the pool is capped and full.
    pub fn allocate(&mut self, value: T) -> PoolHandle<T> {
        match self.try_allocate(value) {
            Ok(handle) => handle,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn try_allocate(&mut self, value: T) -> Result<PoolHandle<T>, PoolError> {
        if let Some(index) = self.free_head {
            let entry = self.entry_mut(index);
            let next_free = match entry.slot {
                Slot::Vacant { next_free } => next_free,
                Slot::Occupied(_) => panic!("free list points at live slot {}", index),
            };
            entry.slot = Slot::Occupied(value);
            let generation = entry.generation;
            self.free_head = next_free;
            self.stats.record_allocate(1);
            return Ok(PoolHandle::new(index, generation));
        }

        self.reserve_fresh(1)?;
        let handle = self.push_fresh(value);
        self.stats.record_allocate(1);
        Ok(handle)
    }

    /// Place every value of `values` in adjacent slots of one slab. Slots on the free list are not
    /// considered, since they are not guaranteed to be adjacent.
    pub fn allocate_n<I>(&mut self, values: I) -> Result<Vec<PoolHandle<T>>, PoolError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let values = values.into_iter();
        let count = values.len();
        if count == 0 {
            return Ok(Vec::new());
        }
        if count > SLAB {
            return Err(PoolError::RunTooLong {
                requested: count,
                slab_capacity: SLAB,
            });
        }

        self.reserve_fresh(count)?;
        let handles: Vec<_> = values.map(|value| self.push_fresh(value)).collect();
        self.stats.record_allocate(handles.len() as u64);
        Ok(handles)
    }

    /// Return the object in `handle`'s slot and put the slot on the free list.
    ///
    /// Panics if the handle was already released or never came from this pool.
    pub fn deallocate(&mut self, handle: PoolHandle<T>) -> T {
        let free_head = self.free_head;
        let entry = self.live_entry_mut(handle);
        let slot = std::mem::replace(
            &mut entry.slot,
            Slot::Vacant {
                next_free: free_head,
            },
        );
        entry.generation = entry.generation.wrapping_add(1);
        self.free_head = Some(handle.index);
        self.stats.record_release();

        match slot {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => unreachable!("live_entry_mut returned a vacant slot"),
        }
    }

    pub fn contains(&self, handle: PoolHandle<T>) -> bool {
        self.try_get(handle).is_some()
    }

    pub fn try_get(&self, handle: PoolHandle<T>) -> Option<&T> {
        let entry = self.entry(handle.index)?;
        match &entry.slot {
            Slot::Occupied(value) if entry.generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn try_get_mut(&mut self, handle: PoolHandle<T>) -> Option<&mut T> {
        let (slab, offset) = Self::split(handle.index);
        let entry = self.slabs.get_mut(slab)?.get_mut(offset)?;
        match &mut entry.slot {
            Slot::Occupied(value) if entry.generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Panics on a stale handle.
    pub fn get(&self, handle: PoolHandle<T>) -> &T {
        match self.try_get(handle) {
            Some(value) => value,
            None => panic!("use of released or foreign pool handle {:?}", handle),
        }
    }

    /// Panics on a stale handle.
    pub fn get_mut(&mut self, handle: PoolHandle<T>) -> &mut T {
        match self.live_entry_mut(handle).slot {
            Slot::Occupied(ref mut value) => value,
            Slot::Vacant { .. } => unreachable!("live_entry_mut returned a vacant slot"),
        }
    }

    /// Live objects in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (PoolHandle<T>, &T)> {
        self.slabs
            .iter()
            .flat_map(|slab| slab.iter())
            .enumerate()
            .filter_map(|(index, entry)| match &entry.slot {
                Slot::Occupied(value) => {
                    Some((PoolHandle::new(index as u32, entry.generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    fn split(index: u32) -> (usize, usize) {
        let index = index as usize;
        (index / SLAB, index % SLAB)
    }

    fn entry(&self, index: u32) -> Option<&Entry<T>> {
        let (slab, offset) = Self::split(index);
        self.slabs.get(slab)?.get(offset)
    }

    fn entry_mut(&mut self, index: u32) -> &mut Entry<T> {
        let (slab, offset) = Self::split(index);
        &mut self.slabs[slab][offset]
    }

    fn live_entry_mut(&mut self, handle: PoolHandle<T>) -> &mut Entry<T> {
        let (slab, offset) = Self::split(handle.index);
        let entry = self
            .slabs
            .get_mut(slab)
            .and_then(|slab| slab.get_mut(offset));
        match entry {
            Some(entry)
                if entry.generation == handle.generation
                    && matches!(entry.slot, Slot::Occupied(_)) =>
            {
                entry
            }
            _ => panic!("use of released or foreign pool handle {:?}", handle),
        }
    }

    // Make sure the last slab has `count` never-used slots, opening a new slab if needed.
    fn reserve_fresh(&mut self, count: usize) -> Result<(), PoolError> {
        let room = self.slabs.last().map_or(0, |slab| SLAB - slab.len());
        if room >= count {
            return Ok(());
        }

        if let Some(max_slabs) = self.limits.max_slabs {
            if self.slabs.len() >= max_slabs {
                self.stats.record_exhausted();
                return Err(PoolError::Exhausted {
                    slabs: self.slabs.len(),
                    slab_capacity: SLAB,
                });
            }
        }

        self.retire_tail();
        assert!(
            (self.slabs.len() + 1) * SLAB <= u32::MAX as usize,
            "pool index space exhausted"
        );
        self.slabs.push(Vec::with_capacity(SLAB));
        self.stats.record_slab();
        debug!(
            "pool: opened slab {} ({} slots per slab, {} live)",
            self.slabs.len() - 1,
            SLAB,
            self.stats.live()
        );
        Ok(())
    }

    // Hand the unused tail of the last slab to the free list before a new slab is opened.
    fn retire_tail(&mut self) {
        let Some(slab_idx) = self.slabs.len().checked_sub(1) else {
            return;
        };
        let base = slab_idx * SLAB;
        let slab = &mut self.slabs[slab_idx];
        while slab.len() < SLAB {
            let index = (base + slab.len()) as u32;
            slab.push(Entry {
                generation: 0,
                slot: Slot::Vacant {
                    next_free: self.free_head,
                },
            });
            self.free_head = Some(index);
        }
    }

    fn push_fresh(&mut self, value: T) -> PoolHandle<T> {
        let slab_idx = self.slabs.len() - 1;
        let slab = &mut self.slabs[slab_idx];
        debug_assert!(slab.len() < SLAB);
        let index = (slab_idx * SLAB + slab.len()) as u32;
        slab.push(Entry {
            generation: 0,
            slot: Slot::Occupied(value),
        });
        PoolHandle::new(index, 0)
    }
}

impl<T, const SLAB: usize> Index<PoolHandle<T>> for PoolAllocator<T, SLAB> {
    type Output = T;

    fn index(&self, handle: PoolHandle<T>) -> &T {
        self.get(handle)
    }
}

impl<T, const SLAB: usize> IndexMut<PoolHandle<T>> for PoolAllocator<T, SLAB> {
    fn index_mut(&mut self, handle: PoolHandle<T>) -> &mut T {
        self.get_mut(handle)
    }
}
