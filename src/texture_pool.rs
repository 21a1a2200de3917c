// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Descriptor-keyed texture recycling.

Creating a GPU texture is one of the more expensive things a frame can do,
and a layer compositor asks for the same shapes over and over - full-screen
intermediates, half-resolution blur targets, tile-sized scratch.  The pool
keeps released textures in per-descriptor buckets and hands the
most-recently-returned one back on the next matching acquire (LIFO, which
keeps the hot texture hot in the driver's caches).

Every pooled texture carries bookkeeping - creation time, last use, use
count, a [`ResourcePriority`] - that feeds two reclamation paths:

- [`garbage_collect`](TexturePool::garbage_collect) drops available entries
  that sat idle past their priority's grace period.
- [`evict`](TexturePool::evict) frees a requested number of bytes *now*,
  highest [`eviction_score`] first.

Releases are gated by [`MemoryPressure`], recomputed against the device
budget after every operation: under Urgent or worse pressure a released
texture is destroyed instead of pooled, and Disposable textures are never
pooled at all.

Checked-out textures live in a separate active set.  The two sets are
disjoint at every observable point, and nothing in the active set is ever
eligible for GC or eviction.
*/

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::descriptor::TextureDescriptor;
use crate::heap::{HeapAllocation, ResourceHeap};
use crate::imp::{Device, DeviceError, TextureHandle};
use crate::priority::{MemoryPressure, ResourcePriority};

/// Errors from texture pool operations.
#[derive(Debug, thiserror::Error)]
pub enum TexturePoolError {
    /// The device could not create the texture.
    #[error("texture creation failed")]
    CreationFailed(#[source] DeviceError),
    /// The handle is not checked out of this pool.
    #[error("texture is not checked out of this pool")]
    NotAcquired,
}

/// Heuristic ranking for pressure eviction: higher scores evict first.
///
/// `idle_hours x size_mb x 1/max(1, use_count) x priority_weight`.
///
/// Units are deliberate: idle time is measured in *hours* and size in
/// *megabytes*, so a 100 MB texture idle for two hours with weight 1 and a
/// single use scores 200.  Weights come from
/// [`EvictionConfig::priority_weights`].
pub fn eviction_score(
    idle: Duration,
    size_bytes: u64,
    use_count: u64,
    priority_weight: f64,
) -> f64 {
    let idle_hours = idle.as_secs_f64() / 3600.0;
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    idle_hours * size_mb * (1.0 / use_count.max(1) as f64) * priority_weight
}

/// Tunable reclamation policy.
///
/// The tables are indexed by
/// [`ResourcePriority::table_index`](crate::priority::ResourcePriority::table_index),
/// ordered Critical..Disposable.  These are policy knobs, not laws; the
/// defaults match a compositor that would rather keep memory warm than
/// churn it.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Eviction score weight per priority tier.
    pub priority_weights: [f64; 5],
    /// How long an available entry of each tier may sit idle before
    /// garbage collection discards it.
    pub max_idle: [Duration; 5],
    /// Utilization fractions at which pressure becomes Warning, Urgent,
    /// and Critical.
    pub pressure_thresholds: [f64; 3],
    /// Most available entries retained per descriptor key.
    pub per_key_cap: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        EvictionConfig {
            priority_weights: [0.1, 0.5, 1.0, 2.0, 5.0],
            max_idle: [
                Duration::from_secs(3600),
                Duration::from_secs(1800),
                Duration::from_secs(600),
                Duration::from_secs(180),
                Duration::from_secs(60),
            ],
            pressure_thresholds: [0.70, 0.85, 0.95],
            per_key_cap: 8,
        }
    }
}

/// Tunables for [`TexturePool`].
#[derive(Default)]
pub struct TexturePoolConfig {
    pub eviction: EvictionConfig,
    /// Bytes the pool measures pressure against.  `None` uses the device's
    /// budget hint.
    pub memory_budget: Option<u64>,
    /// When set, texture footprints are placed in this heap; the heap block
    /// is released when the texture is discarded.
    pub heap: Option<Arc<ResourceHeap>>,
}

struct PoolEntry {
    handle: TextureHandle,
    size: u64,
    #[allow(dead_code)] //diagnostics; eviction scores on idle time, not age
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
    priority: ResourcePriority,
    #[allow(dead_code)] //diagnostics
    is_from_pool: bool,
    heap_block: Option<HeapAllocation>,
}

struct PoolState {
    active: HashMap<TextureHandle, (TextureDescriptor, PoolEntry)>,
    /// LIFO per key: push on release, pop from the back on acquire.
    available: HashMap<TextureDescriptor, Vec<PoolEntry>>,
    active_bytes: u64,
    available_bytes: u64,
    pressure: MemoryPressure,
    hits: u64,
    misses: u64,
    evictions: u64,
    discards: u64,
}

/// Read-only snapshot of the pool, for periodic logging/dashboards.
#[derive(Debug, Clone)]
pub struct TexturePoolStatistics {
    pub active_count: usize,
    pub available_count: usize,
    pub active_bytes: u64,
    pub available_bytes: u64,
    pub budget: u64,
    pub pressure: MemoryPressure,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub discards: u64,
}

/// Recycles whole GPU textures across frames.
pub struct TexturePool {
    device: Arc<dyn Device>,
    config: TexturePoolConfig,
    budget: u64,
    state: RwLock<PoolState>,
}

impl TexturePool {
    pub fn new(device: Arc<dyn Device>, config: TexturePoolConfig) -> Self {
        let budget = config.memory_budget.unwrap_or_else(|| device.memory_budget());
        TexturePool {
            device,
            config,
            budget,
            state: RwLock::new(PoolState {
                active: HashMap::new(),
                available: HashMap::new(),
                active_bytes: 0,
                available_bytes: 0,
                pressure: MemoryPressure::Normal,
                hits: 0,
                misses: 0,
                evictions: 0,
                discards: 0,
            }),
        }
    }

    /// Checks a texture matching `descriptor` out of the pool, creating one
    /// on a miss.
    ///
    /// Hits pop the most-recently-returned candidate.  The entry moves from
    /// the available set to the active set within this call; it is never
    /// observable in both.
    pub fn acquire(
        &self,
        descriptor: &TextureDescriptor,
        priority: ResourcePriority,
    ) -> Result<TextureHandle, TexturePoolError> {
        let mut state = self.state.write().unwrap();
        if let Some(bucket) = state.available.get_mut(descriptor)
            && let Some(mut entry) = bucket.pop()
        {
            if bucket.is_empty() {
                state.available.remove(descriptor);
            }
            entry.last_used_at = Instant::now();
            entry.use_count += 1;
            entry.priority = priority;
            entry.is_from_pool = true;
            let size = entry.size;
            let handle = entry.handle;
            state.available_bytes -= size;
            state.active_bytes += size;
            state.active.insert(handle, (descriptor.clone(), entry));
            state.hits += 1;
            self.recompute_pressure(&mut state);
            return Ok(handle);
        }

        //miss: create a new texture, placing its footprint in the backing
        //heap when one is configured
        let size = descriptor.byte_size();
        let heap_block = match &self.config.heap {
            Some(heap) => match heap.allocate(size, 256, None) {
                Ok(block) => Some(block),
                Err(error) => {
                    //heap exhaustion is not fatal to the acquire; fall back
                    //to a dedicated allocation
                    logwise::warn_sync!(
                        "TexturePool: heap placement failed, allocating directly: {error}",
                        error = logwise::privacy::LogIt(&error)
                    );
                    None
                }
            },
            None => None,
        };
        let handle = match self.device.create_texture(descriptor) {
            Ok(handle) => handle,
            Err(error) => {
                if let (Some(heap), Some(block)) = (&self.config.heap, &heap_block) {
                    let _ = heap.deallocate(block);
                }
                return Err(TexturePoolError::CreationFailed(error));
            }
        };
        let now = Instant::now();
        let entry = PoolEntry {
            handle,
            size,
            created_at: now,
            last_used_at: now,
            use_count: 1,
            priority,
            is_from_pool: false,
            heap_block,
        };
        state.active_bytes += size;
        state.active.insert(handle, (descriptor.clone(), entry));
        state.misses += 1;
        self.recompute_pressure(&mut state);
        Ok(handle)
    }

    /// Returns a checked-out texture to the pool.
    ///
    /// The texture is retained for reuse unless its priority is Disposable,
    /// pressure is Urgent or worse, or the per-key cap is reached (in which
    /// case the *oldest* pooled entry for the key is dropped, keeping the
    /// freshly returned one).
    pub fn release(&self, handle: TextureHandle) -> Result<(), TexturePoolError> {
        let mut state = self.state.write().unwrap();
        let Some((descriptor, mut entry)) = state.active.remove(&handle) else {
            return Err(TexturePoolError::NotAcquired);
        };
        let size = entry.size;
        state.active_bytes -= size;
        entry.last_used_at = Instant::now();

        let discard = entry.priority == ResourcePriority::Disposable
            || state.pressure >= MemoryPressure::Urgent;
        if discard {
            state.discards += 1;
            self.destroy_entry(entry);
        } else {
            state.available_bytes += size;
            let bucket = state.available.entry(descriptor).or_default();
            bucket.push(entry);
            if bucket.len() > self.config.eviction.per_key_cap {
                let oldest = bucket.remove(0);
                state.available_bytes -= oldest.size;
                state.discards += 1;
                self.destroy_entry(oldest);
            }
        }
        self.recompute_pressure(&mut state);
        Ok(())
    }

    /// Frees at least `bytes_needed` bytes of pooled (available) textures
    /// if it can, highest eviction score first.  Returns the bytes actually
    /// freed.
    ///
    /// Checked-out textures are never candidates.
    pub fn evict(&self, bytes_needed: u64) -> u64 {
        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;
        let now = Instant::now();
        //rank every available entry by score
        let mut candidates: Vec<(f64, TextureDescriptor, usize)> = Vec::new();
        for (descriptor, bucket) in &state.available {
            for (index, entry) in bucket.iter().enumerate() {
                let weight =
                    self.config.eviction.priority_weights[entry.priority.table_index()];
                let score = eviction_score(
                    now.duration_since(entry.last_used_at),
                    entry.size,
                    entry.use_count,
                    weight,
                );
                candidates.push((score, descriptor.clone(), index));
            }
        }
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut freed = 0u64;
        //collect per-key indices to remove, then remove back-to-front so
        //remaining indices stay valid
        let mut picked: HashMap<TextureDescriptor, Vec<usize>> = HashMap::new();
        for (_, descriptor, index) in candidates {
            if freed >= bytes_needed {
                break;
            }
            let size = state.available[&descriptor][index].size;
            freed += size;
            picked.entry(descriptor).or_default().push(index);
        }
        for (descriptor, mut indices) in picked {
            //remove back-to-front so remaining indices stay valid
            indices.sort_unstable_by(|a, b| b.cmp(a));
            let bucket = state
                .available
                .get_mut(&descriptor)
                .expect("picked from this bucket");
            for index in indices {
                let entry = bucket.remove(index);
                state.available_bytes -= entry.size;
                state.evictions += 1;
                self.destroy_entry(entry);
            }
            if bucket.is_empty() {
                state.available.remove(&descriptor);
            }
        }
        if freed > 0 {
            logwise::info_sync!(
                "TexturePool: evicted {freed} bytes under pressure",
                freed = freed
            );
        }
        self.recompute_pressure(state);
        freed
    }

    /// Discards available entries whose idle time exceeds their priority's
    /// grace period.  Best-effort housekeeping - logs and never raises.
    pub fn garbage_collect(&self) {
        let gc = logwise::perfwarn_begin!("TexturePool::garbage_collect");
        let mut state = self.state.write().unwrap();
        let now = Instant::now();
        let max_idle = self.config.eviction.max_idle;
        let mut collected = 0u64;
        let mut keys_to_drop = Vec::new();
        let mut expired = Vec::new();
        for (descriptor, bucket) in state.available.iter_mut() {
            let mut index = 0;
            while index < bucket.len() {
                let entry = &bucket[index];
                let limit = max_idle[entry.priority.table_index()];
                if now.duration_since(entry.last_used_at) > limit {
                    expired.push(bucket.remove(index));
                    collected += 1;
                } else {
                    index += 1;
                }
            }
            if bucket.is_empty() {
                keys_to_drop.push(descriptor.clone());
            }
        }
        for key in keys_to_drop {
            state.available.remove(&key);
        }
        for entry in expired {
            state.available_bytes -= entry.size;
            self.destroy_entry(entry);
        }
        if collected > 0 {
            logwise::trace_sync!(
                "TexturePool: garbage collected {collected} idle textures",
                collected = collected
            );
        }
        self.recompute_pressure(&mut state);
        drop(gc);
    }

    /// The pressure level as of the last operation.
    pub fn memory_pressure(&self) -> MemoryPressure {
        self.state.read().unwrap().pressure
    }

    pub fn statistics(&self) -> TexturePoolStatistics {
        let state = self.state.read().unwrap();
        TexturePoolStatistics {
            active_count: state.active.len(),
            available_count: state.available.values().map(Vec::len).sum(),
            active_bytes: state.active_bytes,
            available_bytes: state.available_bytes,
            budget: self.budget,
            pressure: state.pressure,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            discards: state.discards,
        }
    }

    fn recompute_pressure(&self, state: &mut PoolState) {
        let used = state.active_bytes + state.available_bytes;
        let utilization = if self.budget == 0 {
            1.0
        } else {
            used as f64 / self.budget as f64
        };
        let pressure = MemoryPressure::from_utilization(
            utilization,
            self.config.eviction.pressure_thresholds,
        );
        if pressure != state.pressure {
            logwise::info_sync!(
                "TexturePool: memory pressure is now {pressure}",
                pressure = logwise::privacy::LogIt(pressure)
            );
            state.pressure = pressure;
        }
    }

    fn destroy_entry(&self, entry: PoolEntry) {
        self.device.destroy_texture(entry.handle);
        if let (Some(heap), Some(block)) = (&self.config.heap, &entry.heap_block) {
            if let Err(error) = heap.deallocate(block) {
                logwise::warn_sync!(
                    "TexturePool: heap block release failed: {error}",
                    error = logwise::privacy::LogIt(&error)
                );
            }
        }
    }

    /// Test hook: pretends the available entries for `descriptor` have been
    /// idle for `idle`.
    #[cfg(test)]
    fn backdate_available(&self, descriptor: &TextureDescriptor, idle: Duration) {
        let mut state = self.state.write().unwrap();
        if let Some(bucket) = state.available.get_mut(descriptor) {
            for entry in bucket.iter_mut() {
                entry.last_used_at = Instant::now() - idle;
            }
        }
    }
}

impl Drop for TexturePool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        if !state.active.is_empty() {
            logwise::warn_sync!(
                "TexturePool dropped with {count} textures checked out",
                count = state.active.len()
            );
        }
        let active = std::mem::take(&mut state.active);
        let available = std::mem::take(&mut state.available);
        for (_, (_, entry)) in active {
            self.destroy_entry(entry);
        }
        for (_, bucket) in available {
            for entry in bucket {
                self.destroy_entry(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TextureFormat;
    use crate::imp::nop::NopDevice;

    fn rt(width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor::render_target(width, height, TextureFormat::Rgba8Unorm)
    }

    fn pool_with_budget(budget: u64) -> (Arc<NopDevice>, TexturePool) {
        let device = Arc::new(NopDevice::new());
        let pool = TexturePool::new(
            device.clone(),
            TexturePoolConfig {
                memory_budget: Some(budget),
                ..Default::default()
            },
        );
        (device, pool)
    }

    #[test]
    fn reuse_round_trip_preserves_identity() {
        let (device, pool) = pool_with_budget(1 << 30);
        let descriptor = rt(256, 256);
        let first = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        pool.release(first).unwrap();
        let second = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        assert_eq!(first, second, "same texture came back");
        assert_eq!(device.textures_created(), 1);
        let stats = pool.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn lifo_handout_order() {
        let (_, pool) = pool_with_budget(1 << 30);
        let descriptor = rt(128, 128);
        let t1 = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        let t2 = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        assert_ne!(t1, t2);
        pool.release(t1).unwrap();
        pool.release(t2).unwrap();
        //most recently returned comes back first
        assert_eq!(
            pool.acquire(&descriptor, ResourcePriority::Normal).unwrap(),
            t2
        );
        assert_eq!(
            pool.acquire(&descriptor, ResourcePriority::Normal).unwrap(),
            t1
        );
    }

    #[test]
    fn active_and_available_stay_disjoint() {
        let (_, pool) = pool_with_budget(1 << 30);
        let descriptor = rt(64, 64);
        let handle = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        let stats = pool.statistics();
        assert_eq!((stats.active_count, stats.available_count), (1, 0));
        pool.release(handle).unwrap();
        let stats = pool.statistics();
        assert_eq!((stats.active_count, stats.available_count), (0, 1));
        let handle = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        let stats = pool.statistics();
        assert_eq!((stats.active_count, stats.available_count), (1, 0));
        pool.release(handle).unwrap();
    }

    #[test]
    fn release_of_unknown_handle_is_rejected() {
        let (_, pool) = pool_with_budget(1 << 30);
        let descriptor = rt(64, 64);
        let handle = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        pool.release(handle).unwrap();
        assert!(matches!(
            pool.release(handle),
            Err(TexturePoolError::NotAcquired)
        ));
    }

    #[test]
    fn disposable_releases_are_discarded() {
        let (device, pool) = pool_with_budget(1 << 30);
        let descriptor = rt(64, 64);
        let handle = pool
            .acquire(&descriptor, ResourcePriority::Disposable)
            .unwrap();
        pool.release(handle).unwrap();
        assert_eq!(pool.statistics().available_count, 0);
        //the next acquire is a fresh creation
        let _again = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        assert_eq!(device.textures_created(), 2);
    }

    #[test]
    fn pressure_gates_pooling() {
        //256x256 RGBA8 is 256 KiB; a ~260 KiB budget puts one active
        //texture past the 95% threshold
        let descriptor = rt(256, 256);
        let size = descriptor.byte_size();
        let (_, pool) = pool_with_budget(size + size / 50);
        let handle = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        assert_eq!(pool.memory_pressure(), MemoryPressure::Critical);
        pool.release(handle).unwrap();
        //under Critical pressure a Normal release is discarded, not pooled
        assert_eq!(pool.statistics().available_count, 0);

        //the same release under Normal pressure is pooled
        let (_, roomy) = pool_with_budget(size * 100);
        let handle = roomy.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        assert_eq!(roomy.memory_pressure(), MemoryPressure::Normal);
        roomy.release(handle).unwrap();
        assert_eq!(roomy.statistics().available_count, 1);
    }

    #[test]
    fn per_key_cap_drops_oldest() {
        let device = Arc::new(NopDevice::new());
        let pool = TexturePool::new(
            device.clone(),
            TexturePoolConfig {
                memory_budget: Some(1 << 30),
                eviction: EvictionConfig {
                    per_key_cap: 2,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let descriptor = rt(32, 32);
        let t1 = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        let t2 = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        let t3 = pool.acquire(&descriptor, ResourcePriority::Normal).unwrap();
        pool.release(t1).unwrap();
        pool.release(t2).unwrap();
        pool.release(t3).unwrap();
        let stats = pool.statistics();
        assert_eq!(stats.available_count, 2, "cap enforced");
        assert_eq!(stats.discards, 1, "oldest was dropped");
        //t1 (the oldest) is gone; t3 then t2 come back
        assert_eq!(
            pool.acquire(&descriptor, ResourcePriority::Normal).unwrap(),
            t3
        );
        assert_eq!(
            pool.acquire(&descriptor, ResourcePriority::Normal).unwrap(),
            t2
        );
    }

    #[test]
    fn eviction_never_touches_active() {
        let (_, pool) = pool_with_budget(1 << 30);
        let descriptor = rt(512, 512);
        let active = pool.acquire(&descriptor, ResourcePriority::Low).unwrap();
        let pooled = pool.acquire(&descriptor, ResourcePriority::Low).unwrap();
        pool.release(pooled).unwrap();
        pool.backdate_available(&descriptor, Duration::from_secs(60));
        let freed = pool.evict(u64::MAX);
        assert_eq!(freed, descriptor.byte_size(), "only the pooled entry went");
        let stats = pool.statistics();
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.available_count, 0);
        //the checked-out texture is still valid and releasable
        pool.release(active).unwrap();
    }

    #[test]
    fn eviction_order_follows_score() {
        let (_, pool) = pool_with_budget(1 << 30);
        let small = rt(64, 64); //16 KiB
        let large = rt(1024, 1024); //4 MiB
        let small_handle = pool.acquire(&small, ResourcePriority::Normal).unwrap();
        let large_handle = pool.acquire(&large, ResourcePriority::Normal).unwrap();
        pool.release(small_handle).unwrap();
        pool.release(large_handle).unwrap();
        pool.backdate_available(&small, Duration::from_secs(3600));
        pool.backdate_available(&large, Duration::from_secs(3600));
        //equal idle, equal priority, equal use count: the larger texture
        //scores higher and goes first
        let freed = pool.evict(1);
        assert_eq!(freed, large.byte_size());
        assert_eq!(pool.statistics().available_count, 1);
        //the small one is still poolable
        assert_eq!(
            pool.acquire(&small, ResourcePriority::Normal).unwrap(),
            small_handle
        );
    }

    #[test]
    fn garbage_collect_honors_priority_grace() {
        let device = Arc::new(NopDevice::new());
        let pool = TexturePool::new(
            device.clone(),
            TexturePoolConfig {
                memory_budget: Some(1 << 30),
                eviction: EvictionConfig {
                    //tighten the grace periods so the test can backdate
                    //rather than sleep
                    max_idle: [
                        Duration::from_secs(3600),
                        Duration::from_secs(1800),
                        Duration::from_secs(600),
                        Duration::from_secs(180),
                        Duration::from_secs(60),
                    ],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let critical_desc = rt(64, 64);
        let low_desc = rt(128, 128);
        let critical = pool
            .acquire(&critical_desc, ResourcePriority::Critical)
            .unwrap();
        let low = pool.acquire(&low_desc, ResourcePriority::Low).unwrap();
        pool.release(critical).unwrap();
        pool.release(low).unwrap();
        //ten minutes idle: past Low's 3-minute grace, inside Critical's hour
        pool.backdate_available(&critical_desc, Duration::from_secs(600));
        pool.backdate_available(&low_desc, Duration::from_secs(600));
        pool.garbage_collect();
        let stats = pool.statistics();
        assert_eq!(stats.available_count, 1, "only the Low texture was collected");
        assert_eq!(
            pool.acquire(&critical_desc, ResourcePriority::Critical).unwrap(),
            critical
        );
    }

    #[test]
    fn score_units_are_hours_and_megabytes() {
        //100 MB, 2 hours idle, 4 uses, weight 2: 2 * 100 * (1/4) * 2 = 100
        let score = eviction_score(
            Duration::from_secs(2 * 3600),
            100 * 1024 * 1024,
            4,
            2.0,
        );
        assert!((score - 100.0).abs() < 1e-9);
        //zero use count is clamped to 1 rather than dividing by zero
        let unclamped = eviction_score(Duration::from_secs(3600), 1024 * 1024, 0, 1.0);
        assert!((unclamped - 1.0).abs() < 1e-9);
    }

    #[test]
    fn heap_backed_creation_releases_blocks() {
        let device = Arc::new(NopDevice::new());
        let heap = Arc::new(
            ResourceHeap::new(device.clone(), "texture-backing", 64 * 1024 * 1024).unwrap(),
        );
        let pool = TexturePool::new(
            device.clone(),
            TexturePoolConfig {
                memory_budget: Some(1 << 30),
                heap: Some(heap.clone()),
                ..Default::default()
            },
        );
        let descriptor = rt(256, 256);
        let handle = pool
            .acquire(&descriptor, ResourcePriority::Disposable)
            .unwrap();
        assert_eq!(heap.statistics().used, descriptor.byte_size());
        //Disposable release destroys the texture and returns its heap block
        pool.release(handle).unwrap();
        assert_eq!(heap.statistics().used, 0);
    }
}
