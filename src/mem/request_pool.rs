use log::debug;

use super::ops::OperationKind;
use super::pool::{PoolAllocator, PoolError, PoolHandle, PoolLimits};
use super::request::MemoryRequest;
use super::stats::PoolStats;
use crate::Cycle;

/// Requests per slab. Sized for issue width x pipeline depth x cores of the configurations we run;
/// with `max_slabs` set, exceeding it is fatal.
pub const REQUEST_SLAB_CAPACITY: usize = 1024;

pub type RequestHandle = PoolHandle<MemoryRequest>;

/// Outcome of dropping one reference to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefRelease {
    /// Other holders remain; carries the counter after the decrement.
    Retained(i32),
    /// The caller held the last reference and now owns the decision to `free` the request.
    LastHolder,
}

/// Pool of memory requests. Stages share a request by copying its handle and bumping the reference
/// counter; nothing is freed until a stage calls `free`.
#[derive(Debug, Default)]
pub struct RequestPool {
    pool: PoolAllocator<MemoryRequest, REQUEST_SLAB_CAPACITY>,
}

impl RequestPool {
    pub fn new(limits: PoolLimits) -> Self {
        Self {
            pool: PoolAllocator::with_limits(limits),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        &mut self,
        core_id: usize,
        thread_id: usize,
        physical_address: u64,
        rob_id: i32,
        init_cycle: Cycle,
        is_instruction: bool,
        owner_rip: u64,
        owner_uuid: u64,
        kind: OperationKind,
    ) -> Result<RequestHandle, PoolError> {
        let request = MemoryRequest::new(
            core_id,
            thread_id,
            physical_address,
            rob_id,
            init_cycle,
            is_instruction,
            owner_rip,
            owner_uuid,
            kind,
        );
        self.insert(request)
    }

    /// Pool an already built request.
    pub fn insert(&mut self, request: MemoryRequest) -> Result<RequestHandle, PoolError> {
        let handle = self.pool.try_allocate(request)?;
        debug!("issue {:?}: {}", handle, self.pool[handle]);
        Ok(handle)
    }

    /// Pool an independent copy of `handle`'s request.
    pub fn duplicate(&mut self, handle: RequestHandle) -> Result<RequestHandle, PoolError> {
        let copy = self.pool[handle].clone();
        self.insert(copy)
    }

    pub fn get(&self, handle: RequestHandle) -> &MemoryRequest {
        &self.pool[handle]
    }

    pub fn get_mut(&mut self, handle: RequestHandle) -> &mut MemoryRequest {
        &mut self.pool[handle]
    }

    pub fn try_get(&self, handle: RequestHandle) -> Option<&MemoryRequest> {
        self.pool.try_get(handle)
    }

    /// Register one more holder.
    pub fn acquire(&mut self, handle: RequestHandle) {
        self.pool[handle].inc_ref_counter();
    }

    /// Drop one holder. Never frees; a `LastHolder` result hands the caller the choice.
    pub fn release_ref(&mut self, handle: RequestHandle) -> RefRelease {
        match self.pool[handle].dec_ref_counter() {
            count if count > 0 => RefRelease::Retained(count),
            _ => RefRelease::LastHolder,
        }
    }

    /// Return the request's slot to the pool.
    pub fn free(&mut self, handle: RequestHandle) -> MemoryRequest {
        let request = self.pool.deallocate(handle);
        debug!("free {:?}: {}", handle, request);
        request
    }

    pub fn iter(&self) -> impl Iterator<Item = (RequestHandle, &MemoryRequest)> {
        self.pool.iter()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue_load(pool: &mut RequestPool, addr: u64) -> RequestHandle {
        pool.issue(0, 0, addr, 5, 100, false, 0x400000, 1, OperationKind::Load)
            .expect("uncapped pool")
    }

    #[test]
    fn shared_request_survives_until_freed() {
        let mut pool = RequestPool::default();
        let handle = issue_load(&mut pool, 0x1000);
        pool.acquire(handle);
        pool.acquire(handle);

        assert_eq!(pool.release_ref(handle), RefRelease::Retained(1));
        assert_eq!(pool.get(handle).ref_counter(), 1);
        assert_eq!(pool.release_ref(handle), RefRelease::LastHolder);

        // reaching zero does not free
        assert!(pool.try_get(handle).is_some());
        let req = pool.free(handle);
        assert_eq!(req.physical_address(), 0x1000);
        assert!(pool.try_get(handle).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn duplicate_is_independent() {
        let mut pool = RequestPool::default();
        let original = issue_load(&mut pool, 0x2000);
        pool.acquire(original);
        pool.get_mut(original).record_hop(format_args!("L1"));

        let copy = pool.duplicate(original).unwrap();
        assert_ne!(copy, original);
        assert_eq!(pool.get(copy), pool.get(original));
        assert_eq!(pool.get(copy).ref_counter(), 0);
        assert!(pool.get(copy).history().is_empty());

        pool.get_mut(copy).set_physical_address(0x2040);
        assert_eq!(pool.get(original).physical_address(), 0x2000);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn freed_slot_is_recycled() {
        let mut pool = RequestPool::default();
        let first = issue_load(&mut pool, 0x10);
        pool.free(first);
        let second = issue_load(&mut pool, 0x20);
        assert_eq!(first.index(), second.index());
        assert_eq!(pool.stats().allocations(), 2);
        assert_eq!(pool.stats().releases(), 1);
        assert_eq!(pool.stats().slabs(), 1);
    }

    #[test]
    fn capped_pool_refuses_issue() {
        let mut pool = RequestPool::new(PoolLimits { max_slabs: Some(1) });
        for i in 0..REQUEST_SLAB_CAPACITY as u64 {
            issue_load(&mut pool, i * 64);
        }
        let err = pool
            .issue(0, 0, 0, 0, 0, false, 0, 0, OperationKind::Store)
            .unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { slabs: 1, .. }));
    }

    #[test]
    #[should_panic(expected = "released or foreign")]
    fn acquire_after_free_panics() {
        let mut pool = RequestPool::default();
        let handle = issue_load(&mut pool, 0x10);
        pool.free(handle);
        pool.acquire(handle);
    }
}
