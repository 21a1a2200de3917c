// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Type-segmented buffer pooling.

Rendering code burns through small buffer allocations every frame - vertex
scratch, uniform blocks, staging space for uploads.  Creating a device
buffer per request would stall constantly, so the pool keeps a set of large
*chunks* per [`BufferType`] and sub-allocates from them with a per-chunk
free list.

Chunks grow on demand: when no existing chunk of a segment can hold a
request, a new chunk sized `max(2 x request, segment default)` is created,
provided the pool's memory budget allows.  Chunk search is emptiest-first,
which biases load toward under-used chunks and lets busy ones drain so
maintenance can reclaim them.

[`run_maintenance`](BufferPool::run_maintenance) bounds growth after bursty
frames: chunks whose utilization fell below the shrink threshold are pulled
out of rotation (always leaving at least one chunk per segment).  A pulled
chunk with live allocations is parked in a retired list and destroyed when
its last allocation comes back; nothing an earlier frame handed out is ever
invalidated.
*/

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::descriptor::BufferType;
use crate::fragment::{FreeList, align_up};
use crate::imp::{BufferHandle, Device, DeviceError};

/// Errors from buffer pool operations.
#[derive(Debug, thiserror::Error)]
pub enum BufferPoolError {
    /// Creating another chunk would exceed the pool budget.  Recoverable:
    /// run maintenance, free something, or allocate unpooled.
    #[error("buffer pool exhausted: {requested} bytes requested, {committed}/{budget} committed")]
    PoolExhausted {
        requested: u64,
        committed: u64,
        budget: u64,
    },
    /// The device could not create a chunk's backing buffer.
    #[error("buffer creation failed")]
    CreationFailed(#[source] DeviceError),
    /// The allocation does not belong to this pool (or was already freed).
    #[error("allocation is not resident in this pool")]
    UnknownAllocation,
}

/// A sub-range of a pooled chunk, handed out by
/// [`BufferPool::allocate`].
///
/// `buffer` + `offset` locate the bytes for binding; the whole record is
/// the deallocation token.
#[derive(Debug, Clone)]
pub struct BufferAllocation {
    pub buffer: BufferHandle,
    pub buffer_type: BufferType,
    pub offset: u64,
    /// Reserved size: the request rounded up to the segment alignment.
    pub size: u64,
    chunk_id: u64,
}

struct Chunk {
    id: u64,
    buffer: BufferHandle,
    free: FreeList,
    live_allocations: usize,
}

impl Chunk {
    fn capacity(&self) -> u64 {
        self.free.capacity()
    }

    fn used(&self) -> u64 {
        self.free.capacity() - self.free.total_free()
    }

    fn utilization(&self) -> f64 {
        if self.free.capacity() == 0 {
            return 0.0;
        }
        self.used() as f64 / self.free.capacity() as f64
    }
}

struct PoolState {
    chunks: HashMap<BufferType, Vec<Chunk>>,
    /// Pulled from rotation by maintenance but still carrying live
    /// allocations; destroyed when the last one is returned.
    retired: Vec<(BufferType, Chunk)>,
    committed: u64,
}

/// Per-segment slice of a [`BufferPoolStatistics`] snapshot.
#[derive(Debug, Clone)]
pub struct BufferSegmentStatistics {
    pub buffer_type: BufferType,
    pub chunk_count: usize,
    pub capacity: u64,
    pub used: u64,
    pub largest_free: u64,
}

/// Read-only snapshot of the pool, for periodic logging/dashboards.
#[derive(Debug, Clone)]
pub struct BufferPoolStatistics {
    pub segments: Vec<BufferSegmentStatistics>,
    pub retired_chunks: usize,
    pub committed: u64,
    pub budget: u64,
}

/// Tunables for [`BufferPool`].
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Total bytes the pool may commit across all chunks.  `None` uses the
    /// device's budget hint.
    pub memory_budget: Option<u64>,
    /// Chunks below this utilization are eligible for retirement during
    /// maintenance.
    pub shrink_threshold: f64,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            memory_budget: None,
            shrink_threshold: 0.25,
        }
    }
}

/// Growable, type-segmented buffer capacity.
pub struct BufferPool {
    device: Arc<dyn Device>,
    budget: u64,
    shrink_threshold: f64,
    state: RwLock<PoolState>,
    next_chunk_id: std::sync::atomic::AtomicU64,
}

impl BufferPool {
    pub fn new(device: Arc<dyn Device>, config: BufferPoolConfig) -> Self {
        let budget = config.memory_budget.unwrap_or_else(|| device.memory_budget());
        BufferPool {
            device,
            budget,
            shrink_threshold: config.shrink_threshold,
            state: RwLock::new(PoolState {
                chunks: HashMap::new(),
                retired: Vec::new(),
                committed: 0,
            }),
            next_chunk_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Sub-allocates `size` bytes of `buffer_type` capacity.
    ///
    /// The request is rounded up to the segment's alignment.  Existing
    /// chunks are searched emptiest-first; a new chunk sized
    /// `max(2 x request, segment default)` is created when none fits and
    /// the budget allows.
    pub fn allocate(
        &self,
        size: u64,
        buffer_type: BufferType,
    ) -> Result<BufferAllocation, BufferPoolError> {
        let alignment = buffer_type.alignment();
        let aligned = align_up(size.max(1), alignment);
        let mut state = self.state.write().unwrap();

        let chunks = state.chunks.entry(buffer_type).or_default();
        //emptiest-first: drain under-used chunks before touching busy ones
        let mut order: Vec<usize> = (0..chunks.len()).collect();
        order.sort_by(|&a, &b| {
            chunks[a]
                .utilization()
                .partial_cmp(&chunks[b].utilization())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for index in order {
            let chunk = &mut chunks[index];
            if chunk.free.largest_free() < aligned {
                continue;
            }
            if let Some(offset) = chunk.free.allocate(aligned, alignment) {
                chunk.live_allocations += 1;
                return Ok(BufferAllocation {
                    buffer: chunk.buffer,
                    buffer_type,
                    offset,
                    size: aligned,
                    chunk_id: chunk.id,
                });
            }
        }

        //no chunk fits; grow if the budget allows
        let chunk_capacity = (2 * aligned).max(buffer_type.default_chunk_size());
        if state.committed + chunk_capacity > self.budget {
            return Err(BufferPoolError::PoolExhausted {
                requested: aligned,
                committed: state.committed,
                budget: self.budget,
            });
        }
        let buffer = self
            .device
            .create_buffer(chunk_capacity, buffer_type)
            .map_err(BufferPoolError::CreationFailed)?;
        let id = self
            .next_chunk_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut chunk = Chunk {
            id,
            buffer,
            free: FreeList::new(chunk_capacity),
            live_allocations: 0,
        };
        let offset = chunk
            .free
            .allocate(aligned, alignment)
            .expect("fresh chunk must fit the request it was sized for");
        chunk.live_allocations = 1;
        state.committed += chunk_capacity;
        logwise::trace_sync!(
            "BufferPool: grew new chunk of {capacity} bytes",
            capacity = chunk_capacity
        );
        let allocation = BufferAllocation {
            buffer: chunk.buffer,
            buffer_type,
            offset,
            size: aligned,
            chunk_id: id,
        };
        state.chunks.entry(buffer_type).or_default().push(chunk);
        Ok(allocation)
    }

    /// Returns an allocation's range to its owning chunk, coalescing with
    /// adjacent free ranges.
    pub fn deallocate(&self, allocation: &BufferAllocation) -> Result<(), BufferPoolError> {
        let mut state = self.state.write().unwrap();
        if let Some(chunks) = state.chunks.get_mut(&allocation.buffer_type)
            && let Some(chunk) = chunks.iter_mut().find(|c| c.id == allocation.chunk_id)
        {
            chunk.free.free(allocation.offset, allocation.size);
            chunk.live_allocations -= 1;
            return Ok(());
        }
        //retired chunks still accept their outstanding deallocations
        if let Some(index) = state
            .retired
            .iter()
            .position(|(_, c)| c.id == allocation.chunk_id)
        {
            let (_, chunk) = &mut state.retired[index];
            chunk.free.free(allocation.offset, allocation.size);
            chunk.live_allocations -= 1;
            if chunk.live_allocations == 0 {
                let (_, chunk) = state.retired.swap_remove(index);
                state.committed -= chunk.capacity();
                self.device.destroy_buffer(chunk.buffer);
                logwise::trace_sync!(
                    "BufferPool: destroyed retired chunk of {capacity} bytes",
                    capacity = chunk.capacity()
                );
            }
            return Ok(());
        }
        Err(BufferPoolError::UnknownAllocation)
    }

    /// Shrink pass: pulls chunks under the shrink threshold out of rotation,
    /// keeping at least one chunk per segment.  Best-effort housekeeping -
    /// logs and never raises.
    pub fn run_maintenance(&self) {
        let maintenance = logwise::perfwarn_begin!("BufferPool::run_maintenance");
        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;
        let mut destroyed = 0u64;
        let mut parked = 0u64;
        for buffer_type in BufferType::all() {
            let Some(chunks) = state.chunks.get_mut(&buffer_type) else {
                continue;
            };
            while chunks.len() > 1 {
                //retire the emptiest eligible chunk each round
                let candidate = chunks
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.utilization() < self.shrink_threshold)
                    .min_by(|(_, a), (_, b)| {
                        a.utilization()
                            .partial_cmp(&b.utilization())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(i, _)| i);
                let Some(index) = candidate else { break };
                let chunk = chunks.swap_remove(index);
                if chunk.live_allocations == 0 {
                    state.committed -= chunk.capacity();
                    self.device.destroy_buffer(chunk.buffer);
                    destroyed += 1;
                } else {
                    //outstanding allocations keep the chunk alive until
                    //they all come back through deallocate
                    state.retired.push((buffer_type, chunk));
                    parked += 1;
                }
            }
        }
        if destroyed > 0 || parked > 0 {
            logwise::info_sync!(
                "BufferPool maintenance: destroyed {destroyed} chunks, retired {parked}",
                destroyed = destroyed,
                parked = parked
            );
        }
        drop(maintenance);
    }

    pub fn statistics(&self) -> BufferPoolStatistics {
        let state = self.state.read().unwrap();
        let mut segments = Vec::new();
        for buffer_type in BufferType::all() {
            let Some(chunks) = state.chunks.get(&buffer_type) else {
                continue;
            };
            if chunks.is_empty() {
                continue;
            }
            segments.push(BufferSegmentStatistics {
                buffer_type,
                chunk_count: chunks.len(),
                capacity: chunks.iter().map(Chunk::capacity).sum(),
                used: chunks.iter().map(Chunk::used).sum(),
                largest_free: chunks.iter().map(|c| c.free.largest_free()).max().unwrap_or(0),
            });
        }
        BufferPoolStatistics {
            segments,
            retired_chunks: state.retired.len(),
            committed: state.committed,
            budget: self.budget,
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        let live: usize = state
            .chunks
            .values()
            .flat_map(|chunks| chunks.iter())
            .map(|c| c.live_allocations)
            .sum::<usize>()
            + state
                .retired
                .iter()
                .map(|(_, c)| c.live_allocations)
                .sum::<usize>();
        if live > 0 {
            logwise::warn_sync!(
                "BufferPool dropped with {live} live allocations",
                live = live
            );
        }
        for chunk in state
            .chunks
            .values()
            .flat_map(|chunks| chunks.iter())
            .chain(state.retired.iter().map(|(_, c)| c))
        {
            self.device.destroy_buffer(chunk.buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::nop::NopDevice;

    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    fn test_pool(budget: u64) -> BufferPool {
        BufferPool::new(
            Arc::new(NopDevice::new()),
            BufferPoolConfig {
                memory_budget: Some(budget),
                ..Default::default()
            },
        )
    }

    fn segment<'a>(
        stats: &'a BufferPoolStatistics,
        buffer_type: BufferType,
    ) -> &'a BufferSegmentStatistics {
        stats
            .segments
            .iter()
            .find(|s| s.buffer_type == buffer_type)
            .expect("segment present")
    }

    #[test]
    fn allocate_rounds_up_to_segment_alignment() {
        let pool = test_pool(64 * MIB);
        let a = pool.allocate(100, BufferType::Uniform).unwrap();
        assert_eq!(a.size, 256);
        assert_eq!(a.offset % 256, 0);
        let b = pool.allocate(100, BufferType::Vertex).unwrap();
        assert_eq!(b.size, 112); //16-byte alignment
        pool.deallocate(&a).unwrap();
        pool.deallocate(&b).unwrap();
    }

    #[test]
    fn conservation_per_segment() {
        let pool = test_pool(64 * MIB);
        let a = pool.allocate(10 * KIB, BufferType::Vertex).unwrap();
        let b = pool.allocate(20 * KIB, BufferType::Vertex).unwrap();
        let stats = pool.statistics();
        let vertex = segment(&stats, BufferType::Vertex);
        assert_eq!(vertex.used, a.size + b.size);
        assert_eq!(vertex.capacity, BufferType::Vertex.default_chunk_size());
        pool.deallocate(&a).unwrap();
        pool.deallocate(&b).unwrap();
        let stats = pool.statistics();
        let vertex = segment(&stats, BufferType::Vertex);
        assert_eq!(vertex.used, 0);
        assert_eq!(vertex.largest_free, vertex.capacity);
    }

    #[test]
    fn chunks_are_sized_for_oversized_requests() {
        let pool = test_pool(256 * MIB);
        //bigger than the vertex default chunk: chunk must be 2x the request
        let big = 10 * MIB;
        let allocation = pool.allocate(big, BufferType::Vertex).unwrap();
        let stats = pool.statistics();
        assert_eq!(segment(&stats, BufferType::Vertex).capacity, 2 * big);
        pool.deallocate(&allocation).unwrap();
    }

    #[test]
    fn segments_are_independent() {
        let pool = test_pool(256 * MIB);
        let vertex = pool.allocate(KIB, BufferType::Vertex).unwrap();
        let uniform = pool.allocate(KIB, BufferType::Uniform).unwrap();
        assert_ne!(vertex.buffer, uniform.buffer);
        let stats = pool.statistics();
        assert_eq!(stats.segments.len(), 2);
        pool.deallocate(&vertex).unwrap();
        pool.deallocate(&uniform).unwrap();
    }

    #[test]
    fn budget_exhaustion() {
        //budget fits exactly one default staging chunk (32 MiB)
        let pool = test_pool(BufferType::Staging.default_chunk_size());
        let a = pool.allocate(16 * MIB, BufferType::Staging).unwrap();
        let b = pool.allocate(16 * MIB, BufferType::Staging).unwrap();
        assert_eq!(a.buffer, b.buffer, "both fit the one chunk");
        //the chunk is full now; a second chunk would blow the budget
        let err = pool.allocate(16 * MIB, BufferType::Staging).unwrap_err();
        assert!(matches!(err, BufferPoolError::PoolExhausted { .. }));
        //freeing makes the same request succeed again
        pool.deallocate(&a).unwrap();
        let c = pool.allocate(16 * MIB, BufferType::Staging).unwrap();
        pool.deallocate(&b).unwrap();
        pool.deallocate(&c).unwrap();
    }

    #[test]
    fn unknown_allocation_is_rejected() {
        let pool = test_pool(64 * MIB);
        let allocation = pool.allocate(KIB, BufferType::Index).unwrap();
        pool.deallocate(&allocation).unwrap();
        assert!(matches!(
            pool.deallocate(&allocation),
            Err(BufferPoolError::UnknownAllocation)
        ));
    }

    #[test]
    fn maintenance_keeps_one_chunk_per_segment() {
        let pool = test_pool(256 * MIB);
        //two uniform chunks: the second request does not fit the remainder
        //of the first chunk (2 MiB default, 1 MiB free after `first`)
        let first = pool.allocate(MIB, BufferType::Uniform).unwrap();
        let second = pool
            .allocate(MIB + 512 * KIB, BufferType::Uniform)
            .unwrap();
        assert_eq!(
            segment(&pool.statistics(), BufferType::Uniform).chunk_count,
            2
        );
        //drain both; maintenance may now drop down to a single chunk
        pool.deallocate(&first).unwrap();
        pool.deallocate(&second).unwrap();
        pool.run_maintenance();
        let stats = pool.statistics();
        assert_eq!(segment(&stats, BufferType::Uniform).chunk_count, 1);
        assert_eq!(stats.retired_chunks, 0);
    }

    #[test]
    fn retired_chunks_outlive_their_allocations() {
        let pool = test_pool(256 * MIB);
        //chunk A: 12 MiB with 6 MiB used; chunk B: 14 MiB with 7 MiB used
        let big1 = pool.allocate(6 * MIB, BufferType::Vertex).unwrap();
        let big2 = pool.allocate(7 * MIB, BufferType::Vertex).unwrap();
        assert_ne!(big1.buffer, big2.buffer);
        let straggler = pool.allocate(KIB, BufferType::Vertex).unwrap();
        assert_eq!(straggler.buffer, big1.buffer, "ties resolve to chunk A");
        //empty chunk A down to the straggler; it drops below the threshold
        pool.deallocate(&big1).unwrap();
        pool.run_maintenance();
        let stats = pool.statistics();
        assert_eq!(segment(&stats, BufferType::Vertex).chunk_count, 1);
        assert_eq!(stats.retired_chunks, 1, "live straggler parks the chunk");
        //returning the straggler destroys the retired chunk
        pool.deallocate(&straggler).unwrap();
        assert_eq!(pool.statistics().retired_chunks, 0);
        pool.deallocate(&big2).unwrap();
    }

    #[test]
    fn emptiest_chunk_is_preferred() {
        let pool = test_pool(256 * MIB);
        //chunk A: 4 MiB at 3/4 utilization
        let a1 = pool.allocate(2 * MIB, BufferType::Index).unwrap();
        let a2 = pool.allocate(MIB, BufferType::Index).unwrap();
        assert_eq!(a1.buffer, a2.buffer);
        //2 MiB no longer fits chunk A: chunk B appears at 1/2 utilization
        let b1 = pool.allocate(2 * MIB, BufferType::Index).unwrap();
        assert_ne!(b1.buffer, a1.buffer);
        //a small request must land in the emptier chunk B even though
        //chunk A still has a megabyte free
        let small = pool.allocate(512, BufferType::Index).unwrap();
        assert_eq!(small.buffer, b1.buffer);
        pool.deallocate(&a1).unwrap();
        pool.deallocate(&a2).unwrap();
        pool.deallocate(&b1).unwrap();
        pool.deallocate(&small).unwrap();
    }
}
