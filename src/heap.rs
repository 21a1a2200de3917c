// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Heap sub-allocation with resource aliasing.

A [`ResourceHeap`] owns one contiguous region of raw device memory and hands
out aligned byte ranges from it.  Free space is tracked as offset-sorted
fragments that merge on deallocate, so repeated allocate/free churn does not
permanently shred the region.

Aliasing is a cooperative protocol: allocations can be tagged with a named
alias group, and at most one group of a given name may be *active* at a
time.  The heap enforces exactly that conflict check and nothing more -
callers are responsible for not touching two aliased resources in the same
frame, the same way they would be on a raw graphics API.

[`defragment`](ResourceHeap::defragment) merges and reorders free fragments
only.  It never relocates live allocations; an allocated offset is stable
for the allocation's whole lifetime.

A [`HeapManager`] owns several named heaps (by default a long-lived `main`
heap and a short-lived `transient` heap) sized as fractions of the device
budget, and runs best-effort housekeeping across all of them.
*/

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::fragment::FreeList;
use crate::imp::{Device, DeviceError, HeapHandle};

/// Errors from heap operations.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    /// No free fragment can hold the request.  Recoverable: defragment,
    /// free something, or fall back to a dedicated allocation.
    #[error("heap `{heap}` cannot fit {requested} bytes (free {available}, largest fragment {largest})")]
    InsufficientSpace {
        heap: String,
        requested: u64,
        available: u64,
        largest: u64,
    },
    /// The named alias group is already active.  This is a lifetime bug in
    /// the caller, not a resource shortage.
    #[error("alias group `{0}` is already active")]
    AliasConflict(String),
    /// The allocation does not belong to this heap (or was already freed).
    #[error("allocation is not resident in heap `{0}`")]
    ResourceNotInHeap(String),
    /// The device could not create the backing region.
    #[error("heap creation failed")]
    CreationFailed(#[source] DeviceError),
}

/// A byte range handed out by [`ResourceHeap::allocate`].
///
/// The record is the deallocation token; the heap looks allocations up by
/// the id inside it, never by pointer identity.
#[derive(Debug, Clone)]
pub struct HeapAllocation {
    id: u64,
    pub offset: u64,
    pub size: u64,
    pub alignment: u64,
    pub alias_group: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct AllocationRecord {
    offset: u64,
    size: u64,
}

#[derive(Debug)]
struct HeapState {
    free: FreeList,
    allocations: std::collections::HashMap<u64, AllocationRecord>,
    active_alias_groups: HashSet<String>,
    next_allocation_id: u64,
}

/// Read-only snapshot of one heap, for periodic logging/dashboards.
#[derive(Debug, Clone)]
pub struct HeapStatistics {
    pub name: String,
    pub capacity: u64,
    pub used: u64,
    pub free: u64,
    pub largest_free: u64,
    pub fragment_count: usize,
    pub fragmentation_ratio: f64,
    pub allocation_count: usize,
    pub active_alias_groups: usize,
}

/// One contiguous device memory region, sub-allocated by first fit.
pub struct ResourceHeap {
    name: String,
    handle: HeapHandle,
    capacity: u64,
    device: Arc<dyn Device>,
    state: RwLock<HeapState>,
}

impl ResourceHeap {
    /// Creates a heap backed by `capacity` bytes of raw device memory.
    pub fn new(
        device: Arc<dyn Device>,
        name: impl Into<String>,
        capacity: u64,
    ) -> Result<Self, HeapError> {
        let name = name.into();
        let handle = device
            .create_heap(capacity)
            .map_err(HeapError::CreationFailed)?;
        logwise::trace_sync!(
            "Created heap {name} with {capacity} bytes",
            name = name.clone(),
            capacity = capacity
        );
        Ok(ResourceHeap {
            name,
            handle,
            capacity,
            device,
            state: RwLock::new(HeapState {
                free: FreeList::new(capacity),
                allocations: std::collections::HashMap::new(),
                active_alias_groups: HashSet::new(),
                next_allocation_id: 1,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The backing device memory region this heap carves up.
    pub const fn backing(&self) -> HeapHandle {
        self.handle
    }

    /// Sub-allocates `size` bytes at `alignment`.
    ///
    /// With an `alias_group`, the allocation joins that named group; the
    /// call fails with [`HeapError::AliasConflict`] if the group is
    /// currently active, because carving new resources into memory another
    /// live group may be using is exactly the bug the protocol exists to
    /// catch.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
        alias_group: Option<&str>,
    ) -> Result<HeapAllocation, HeapError> {
        let mut state = self.state.write().unwrap();
        if let Some(group) = alias_group
            && state.active_alias_groups.contains(group)
        {
            return Err(HeapError::AliasConflict(group.to_string()));
        }
        let Some(offset) = state.free.allocate(size, alignment) else {
            return Err(HeapError::InsufficientSpace {
                heap: self.name.clone(),
                requested: size,
                available: state.free.total_free(),
                largest: state.free.largest_free(),
            });
        };
        let id = state.next_allocation_id;
        state.next_allocation_id += 1;
        state
            .allocations
            .insert(id, AllocationRecord { offset, size });
        Ok(HeapAllocation {
            id,
            offset,
            size,
            alignment,
            alias_group: alias_group.map(str::to_string),
        })
    }

    /// Returns an allocation's range to the free list, merging with any
    /// offset-adjacent free neighbors in both directions.
    pub fn deallocate(&self, allocation: &HeapAllocation) -> Result<(), HeapError> {
        let mut state = self.state.write().unwrap();
        let Some(record) = state.allocations.remove(&allocation.id) else {
            return Err(HeapError::ResourceNotInHeap(self.name.clone()));
        };
        state.free.free(record.offset, record.size);
        Ok(())
    }

    /// Marks the named alias group live.  Fails with
    /// [`HeapError::AliasConflict`] if it already is.
    pub fn activate_alias_group(&self, name: &str) -> Result<(), HeapError> {
        let mut state = self.state.write().unwrap();
        if !state.active_alias_groups.insert(name.to_string()) {
            return Err(HeapError::AliasConflict(name.to_string()));
        }
        Ok(())
    }

    /// Clears the live marker.  Deactivating a group that is not active is
    /// a no-op: teardown paths may double-fire and that is harmless.
    pub fn deactivate_alias_group(&self, name: &str) {
        let mut state = self.state.write().unwrap();
        if !state.active_alias_groups.remove(name) {
            logwise::trace_sync!(
                "deactivate_alias_group: {name} was not active",
                name = name.to_string()
            );
        }
    }

    /// `1 - largest_free / total_free`: 0 when free space is one contiguous
    /// block, trending toward 1 as it scatters.
    pub fn fragmentation_ratio(&self) -> f64 {
        self.state.read().unwrap().free.fragmentation_ratio()
    }

    /// Coalesces free fragments and reorders them largest-first so upcoming
    /// allocations land in big fragments.
    ///
    /// Live allocations are never moved - this is free-list hygiene, not
    /// compaction.
    pub fn defragment(&self) {
        let mut state = self.state.write().unwrap();
        let before = state.free.fragment_count();
        state.free.defragment();
        let after = state.free.fragment_count();
        if after < before {
            logwise::trace_sync!(
                "Heap {name}: defragment merged {merged} fragments",
                name = self.name.clone(),
                merged = ((before - after) as u64)
            );
        }
    }

    pub fn statistics(&self) -> HeapStatistics {
        let state = self.state.read().unwrap();
        HeapStatistics {
            name: self.name.clone(),
            capacity: self.capacity,
            used: self.capacity - state.free.total_free(),
            free: state.free.total_free(),
            largest_free: state.free.largest_free(),
            fragment_count: state.free.fragment_count(),
            fragmentation_ratio: state.free.fragmentation_ratio(),
            allocation_count: state.allocations.len(),
            active_alias_groups: state.active_alias_groups.len(),
        }
    }
}

impl Drop for ResourceHeap {
    fn drop(&mut self) {
        let leaked = self.state.read().unwrap().allocations.len();
        if leaked > 0 {
            logwise::warn_sync!(
                "Heap {name} dropped with {leaked} live allocations",
                name = self.name.clone(),
                leaked = leaked
            );
        }
        self.device.destroy_heap(self.handle);
    }
}

/// How a [`HeapManager`] should size its heaps.
#[derive(Debug, Clone)]
pub struct HeapManagerConfig {
    pub heaps: Vec<HeapSpec>,
}

/// One named heap, sized as a fraction of the device memory budget.
#[derive(Debug, Clone)]
pub struct HeapSpec {
    pub name: String,
    pub budget_fraction: f64,
}

impl Default for HeapManagerConfig {
    /// A long-lived `main` heap (half the budget) and a short-lived
    /// `transient` heap (an eighth) for intra-frame scratch.
    fn default() -> Self {
        HeapManagerConfig {
            heaps: vec![
                HeapSpec {
                    name: "main".to_string(),
                    budget_fraction: 0.5,
                },
                HeapSpec {
                    name: "transient".to_string(),
                    budget_fraction: 0.125,
                },
            ],
        }
    }
}

/// Owns the named heaps and runs best-effort housekeeping across them.
pub struct HeapManager {
    heaps: Vec<Arc<ResourceHeap>>,
}

impl HeapManager {
    pub fn new(device: Arc<dyn Device>, config: HeapManagerConfig) -> Result<Self, HeapError> {
        let budget = device.memory_budget();
        let mut heaps = Vec::with_capacity(config.heaps.len());
        for spec in &config.heaps {
            //round down to a 256-byte boundary; heaps of odd sizes help nobody
            let capacity = ((budget as f64 * spec.budget_fraction) as u64) & !255;
            heaps.push(Arc::new(ResourceHeap::new(
                device.clone(),
                spec.name.clone(),
                capacity,
            )?));
        }
        Ok(HeapManager { heaps })
    }

    pub fn heap(&self, name: &str) -> Option<&Arc<ResourceHeap>> {
        self.heaps.iter().find(|h| h.name() == name)
    }

    /// Housekeeping sweep: defragments every heap and logs utilization.
    /// Never raises - this is maintenance, not a request path.
    pub fn garbage_collect(&self) {
        let sweep = logwise::perfwarn_begin!("HeapManager::garbage_collect");
        for heap in &self.heaps {
            heap.defragment();
            let stats = heap.statistics();
            logwise::trace_sync!(
                "Heap {name}: {used}/{capacity} bytes used across {count} allocations",
                name = stats.name,
                used = stats.used,
                capacity = stats.capacity,
                count = (stats.allocation_count as u64)
            );
        }
        drop(sweep);
    }

    pub fn statistics(&self) -> Vec<HeapStatistics> {
        self.heaps.iter().map(|h| h.statistics()).collect()
    }
}
