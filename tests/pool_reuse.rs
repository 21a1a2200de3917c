// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Cross-component integration: texture reuse across simulated frames,
//! pressure-gated pooling, and the buffer/heap managers working together
//! the way a compositor drives them.

use std::sync::Arc;

use pools_and_pipelines::buffer_pool::{BufferPool, BufferPoolConfig};
use pools_and_pipelines::descriptor::{BufferType, TextureDescriptor, TextureFormat};
use pools_and_pipelines::heap::{HeapManager, HeapManagerConfig};
use pools_and_pipelines::imp::nop::NopDevice;
use pools_and_pipelines::priority::{MemoryPressure, ResourcePriority};
use pools_and_pipelines::texture_pool::{TexturePool, TexturePoolConfig};

const MIB: u64 = 1024 * 1024;

fn frame_target() -> TextureDescriptor {
    TextureDescriptor::render_target(1920, 1080, TextureFormat::Bgra8Unorm)
}

/// Across simulated frames the pool serves the same textures over and over;
/// the device only ever sees the first frame's creations.
#[test]
fn steady_state_frames_create_nothing() {
    let device = Arc::new(NopDevice::new());
    let pool = TexturePool::new(
        device.clone(),
        TexturePoolConfig {
            memory_budget: Some(1 << 30),
            ..Default::default()
        },
    );
    let full = frame_target();
    let half = TextureDescriptor::render_target(960, 540, TextureFormat::Bgra8Unorm);

    let mut last_frame = Vec::new();
    for frame in 0..10 {
        let intermediate = pool.acquire(&full, ResourcePriority::High).unwrap();
        let blur_a = pool.acquire(&half, ResourcePriority::Normal).unwrap();
        let blur_b = pool.acquire(&half, ResourcePriority::Normal).unwrap();
        if frame > 0 {
            //every handle this frame came out of the pool
            for handle in [&intermediate, &blur_a, &blur_b] {
                assert!(last_frame.contains(handle), "frame {frame} reused textures");
            }
        }
        last_frame = vec![intermediate, blur_a, blur_b];
        pool.release(intermediate).unwrap();
        pool.release(blur_a).unwrap();
        pool.release(blur_b).unwrap();
    }
    assert_eq!(device.textures_created(), 3, "only the first frame allocates");
    let stats = pool.statistics();
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.hits, 27);
    assert_eq!(stats.active_count, 0);
}

/// The active and available sets stay disjoint through an interleaved
/// acquire/release pattern, and totals always add up.
#[test]
fn sets_stay_disjoint_under_interleaving() {
    let device = Arc::new(NopDevice::new());
    let pool = TexturePool::new(
        device,
        TexturePoolConfig {
            memory_budget: Some(1 << 30),
            ..Default::default()
        },
    );
    let descriptor = frame_target();
    let mut checked_out = Vec::new();
    for round in 0..20 {
        if round % 3 == 2 {
            let handle: pools_and_pipelines::imp::TextureHandle =
                checked_out.swap_remove(round % checked_out.len());
            pool.release(handle).unwrap();
        } else {
            checked_out.push(pool.acquire(&descriptor, ResourcePriority::Normal).unwrap());
        }
        let stats = pool.statistics();
        assert_eq!(stats.active_count, checked_out.len());
        assert_eq!(
            stats.active_bytes + stats.available_bytes,
            (stats.active_count + stats.available_count) as u64 * descriptor.byte_size()
        );
    }
    for handle in checked_out {
        pool.release(handle).unwrap();
    }
}

/// Under Critical pressure a Normal release is discarded instead of pooled;
/// with a roomy budget the identical sequence pools it.
#[test]
fn pressure_gates_the_release_path() {
    let descriptor = frame_target();
    let size = descriptor.byte_size();

    //tight budget: one live frame target is >95% utilization
    let tight = TexturePool::new(
        Arc::new(NopDevice::new()),
        TexturePoolConfig {
            memory_budget: Some(size + size / 100),
            ..Default::default()
        },
    );
    let handle = tight.acquire(&descriptor, ResourcePriority::Normal).unwrap();
    assert_eq!(tight.memory_pressure(), MemoryPressure::Critical);
    tight.release(handle).unwrap();
    assert_eq!(tight.statistics().available_count, 0, "discarded under pressure");

    //roomy budget: the same release is pooled
    let roomy = TexturePool::new(
        Arc::new(NopDevice::new()),
        TexturePoolConfig {
            memory_budget: Some(size * 64),
            ..Default::default()
        },
    );
    let handle = roomy.acquire(&descriptor, ResourcePriority::Normal).unwrap();
    assert_eq!(roomy.memory_pressure(), MemoryPressure::Normal);
    roomy.release(handle).unwrap();
    assert_eq!(roomy.statistics().available_count, 1, "pooled when calm");
}

/// A compositor frame's worth of buffer traffic: uniform blocks and vertex
/// scratch allocated and returned, with conservation holding at every step
/// and maintenance shrinking the burst back down.
#[test]
fn buffer_frame_traffic_conserves_and_shrinks() {
    let device = Arc::new(NopDevice::new());
    let pool = BufferPool::new(
        device.clone(),
        BufferPoolConfig {
            memory_budget: Some(256 * MIB),
            ..Default::default()
        },
    );

    //a bursty frame: lots of uniform blocks forces a second uniform chunk
    let mut allocations = Vec::new();
    for _ in 0..12 {
        allocations.push(pool.allocate(200 * 1024, BufferType::Uniform).unwrap());
    }
    let burst = pool.statistics();
    let uniform = burst
        .segments
        .iter()
        .find(|s| s.buffer_type == BufferType::Uniform)
        .unwrap();
    assert!(uniform.chunk_count > 1, "the burst grew extra chunks");
    assert_eq!(
        uniform.used,
        allocations.iter().map(|a| a.size).sum::<u64>()
    );

    //frame ends: everything returns, maintenance trims the burst capacity
    for allocation in &allocations {
        pool.deallocate(allocation).unwrap();
    }
    pool.run_maintenance();
    let after = pool.statistics();
    let uniform = after
        .segments
        .iter()
        .find(|s| s.buffer_type == BufferType::Uniform)
        .unwrap();
    assert_eq!(uniform.chunk_count, 1, "burst capacity reclaimed");
    assert_eq!(uniform.used, 0);
    assert!(after.committed < burst.committed);
}

/// The heap manager's named heaps come up sized from the device budget and
/// serve placements for heap-backed texture pooling.
#[test]
fn heap_manager_backs_a_texture_pool() {
    let device = Arc::new(NopDevice::with_budget(512 * MIB));
    let manager = HeapManager::new(device.clone(), HeapManagerConfig::default()).unwrap();
    let main = manager.heap("main").expect("main heap").clone();
    assert_eq!(main.capacity(), 256 * MIB);

    let pool = TexturePool::new(
        device,
        TexturePoolConfig {
            memory_budget: Some(1 << 30),
            heap: Some(main.clone()),
            ..Default::default()
        },
    );
    let descriptor = frame_target();
    let handle = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
    assert_eq!(main.statistics().used, descriptor.byte_size());

    //pooled releases keep their heap placement; the block frees when the
    //texture is actually discarded
    pool.release(handle).unwrap();
    assert_eq!(main.statistics().used, descriptor.byte_size());
    pool.evict(u64::MAX);
    assert_eq!(main.statistics().used, 0);
    manager.garbage_collect();
}
