// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Compiled-pipeline caching with single-flight compilation.

Pipeline compiles are the slowest thing this layer ever does - tens of
milliseconds of driver work - and a compositor tends to request the same
handful of pipelines from many passes at once.  The cache guarantees that N
concurrent requests for the same uncached key trigger exactly one compile:
the first caller becomes the *runner* and actually awaits the backend, and
every other caller parks a continuation in the pending map and is resumed
with the runner's result.

Locking is deliberately boring.  Every map operation happens under one
writer lock held for microseconds; the compile itself - the only suspending
operation in the whole crate - runs with no lock held at all.

Failure is per-request and retryable: a failed key is never cached, every
attached waiter receives the same error, and the next `get` after the
shader is fixed starts a fresh compile.

When the cache outgrows `max_cache_size` it evicts down to 80% of capacity
by ascending access frequency (`use_count / age`), ties broken by the
oldest last use - entries that were hot once but stopped being requested go
first.
*/

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::descriptor::{PipelineDescriptor, PipelineKey};
use crate::imp::{CompileFailure, PipelineCompiler, PipelineHandle};

/// Errors from pipeline cache operations.
///
/// Cloneable so one compile outcome can be fanned out to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// The backend rejected the compile; the originating error is attached.
    /// The key is not cached, so a later call retries.
    #[error("pipeline compilation failed for `{name}`: {underlying}")]
    CompilationFailed {
        name: String,
        #[source]
        underlying: CompileFailure,
    },
    /// The backend produced neither a pipeline nor an error.  Defensive: a
    /// conforming backend never does this.
    #[error("pipeline compilation for `{name}` finished with neither a pipeline nor an error")]
    AsyncCompilationFailed { name: String },
    /// The cache was cleared (or torn down) while the compile was in
    /// flight.
    #[error("pipeline cache was cleared while the compile was in flight")]
    Cancelled,
}

/// Outcome of a [`precompile`](PipelineStateCache::precompile) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precompile {
    /// Already compiled; nothing to do.
    AlreadyCached,
    /// A compile for this key is already in flight.
    AlreadyPending,
    /// Too many compiles outstanding; request dropped (back-pressure).
    Rejected,
    /// A background compile task was started.
    Started,
}

/// Tunables for [`PipelineStateCache`].
#[derive(Debug, Clone)]
pub struct PipelineCacheConfig {
    /// Entry count that triggers eviction.
    pub max_cache_size: usize,
    /// Most compiles allowed in flight before `precompile` sheds load.
    pub max_pending_compilations: usize,
    /// Eviction target as a fraction of `max_cache_size`.
    pub evict_to_fraction: f64,
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        PipelineCacheConfig {
            max_cache_size: 128,
            max_pending_compilations: 8,
            evict_to_fraction: 0.8,
        }
    }
}

struct CacheEntry {
    handle: PipelineHandle,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
}

type Waiter = r#continue::Sender<Result<PipelineHandle, PipelineError>>;

struct CacheState {
    entries: HashMap<PipelineKey, CacheEntry>,
    /// One slot per in-flight compile; the Vec is the waiter list attached
    /// to that compile.  Presence of the key is what makes later callers
    /// wait instead of compiling.
    pending: HashMap<PipelineKey, Vec<Waiter>>,
    hits: u64,
    misses: u64,
    compiles: u64,
    failures: u64,
    evictions: u64,
}

/// Read-only snapshot of the cache, for periodic logging/dashboards.
#[derive(Debug, Clone)]
pub struct PipelineCacheStatistics {
    pub entries: usize,
    pub pending: usize,
    pub hits: u64,
    pub misses: u64,
    pub compiles: u64,
    pub failures: u64,
    pub evictions: u64,
}

/// Compiles each distinct pipeline once and serves the rest from cache.
pub struct PipelineStateCache {
    compiler: Arc<dyn PipelineCompiler>,
    config: PipelineCacheConfig,
    state: RwLock<CacheState>,
}

impl PipelineStateCache {
    pub fn new(compiler: Arc<dyn PipelineCompiler>, config: PipelineCacheConfig) -> Self {
        PipelineStateCache {
            compiler,
            config,
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                pending: HashMap::new(),
                hits: 0,
                misses: 0,
                compiles: 0,
                failures: 0,
                evictions: 0,
            }),
        }
    }

    /// Returns the compiled pipeline for `descriptor`, compiling it if this
    /// is the first request for its key.
    ///
    /// Concurrent callers with the same key share one compile: the first
    /// becomes the runner, everyone else suspends on a continuation and is
    /// resumed with the shared outcome.
    pub async fn get(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<PipelineHandle, PipelineError> {
        let key = descriptor.key();
        //admission happens entirely under the lock; insert-then-unlock is
        //what makes a second caller a waiter instead of a second runner
        let waiter = {
            let mut state = self.state.write().unwrap();
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.use_count += 1;
                entry.last_used_at = Instant::now();
                let handle = entry.handle;
                state.hits += 1;
                return Ok(handle);
            }
            state.misses += 1;
            match state.pending.get_mut(&key) {
                Some(waiters) => {
                    let (sender, receiver) = r#continue::continuation();
                    waiters.push(sender);
                    Some(receiver)
                }
                None => {
                    state.pending.insert(key.clone(), Vec::new());
                    None
                }
            }
        };
        match waiter {
            Some(receiver) => receiver.await,
            None => {
                //we are the runner; the compile is the slow path and runs
                //with no lock held
                let result = self.compiler.compile(descriptor).await;
                self.finish_compile(&key, &descriptor.label, result)
            }
        }
    }

    /// Fires a best-effort background compile for `descriptor`.
    ///
    /// Skipped if the key is already cached or already compiling, and
    /// rejected outright once `max_pending_compilations` compiles are in
    /// flight - precompile storms shed load rather than queueing it.
    pub fn precompile(self: &Arc<Self>, descriptor: &PipelineDescriptor) -> Precompile {
        let key = descriptor.key();
        {
            let mut state = self.state.write().unwrap();
            if state.entries.contains_key(&key) {
                return Precompile::AlreadyCached;
            }
            if state.pending.contains_key(&key) {
                return Precompile::AlreadyPending;
            }
            if state.pending.len() >= self.config.max_pending_compilations {
                logwise::trace_sync!(
                    "PipelineStateCache: precompile of {name} rejected, {pending} compiles in flight",
                    name = descriptor.label.clone(),
                    pending = (state.pending.len() as u64)
                );
                return Precompile::Rejected;
            }
            state.pending.insert(key.clone(), Vec::new());
        }
        let this = self.clone();
        let descriptor = descriptor.clone();
        let task = some_executor::task::Task::without_notifications(
            format!("pipeline precompile {}", descriptor.label),
            some_executor::task::Configuration::default(),
            async move {
                let result = this.compiler.compile(&descriptor).await;
                //nobody to report to; waiters (if any attached meanwhile)
                //are notified inside finish_compile
                let _ = this.finish_compile(&key, &descriptor.label, result);
            },
        );
        task.spawn_static_current();
        Precompile::Started
    }

    /// Completes a compile: caches success, records failure, and resumes
    /// every waiter with the shared outcome.
    fn finish_compile(
        &self,
        key: &PipelineKey,
        name: &str,
        result: Result<PipelineHandle, CompileFailure>,
    ) -> Result<PipelineHandle, PipelineError> {
        let outcome: Result<PipelineHandle, PipelineError> = match result {
            Ok(handle) if handle.is_null() => Err(PipelineError::AsyncCompilationFailed {
                name: name.to_string(),
            }),
            Ok(handle) => Ok(handle),
            Err(underlying) => Err(PipelineError::CompilationFailed {
                name: name.to_string(),
                underlying,
            }),
        };
        let waiters = {
            let mut state = self.state.write().unwrap();
            let Some(waiters) = state.pending.remove(key) else {
                //the cache was cleared while we compiled; the waiters were
                //already cancelled, and the fresh pipeline has no owner
                if let Ok(handle) = outcome {
                    self.compiler.discard(handle);
                }
                return Err(PipelineError::Cancelled);
            };
            match &outcome {
                Ok(handle) => {
                    let now = Instant::now();
                    state.entries.insert(
                        key.clone(),
                        CacheEntry {
                            handle: *handle,
                            created_at: now,
                            last_used_at: now,
                            use_count: 1,
                        },
                    );
                    state.compiles += 1;
                    self.evict_overflow(&mut state);
                }
                Err(error) => {
                    //the key is deliberately not cached: a later get retries
                    state.failures += 1;
                    logwise::warn_sync!(
                        "Pipeline compile failed: {error}",
                        error = logwise::privacy::LogIt(error)
                    );
                }
            }
            waiters
        };
        //resume waiters outside the lock
        for waiter in waiters {
            waiter.send(outcome.clone());
        }
        outcome
    }

    /// Evicts down to the target fraction of capacity by ascending access
    /// frequency, ties broken by oldest last use.
    fn evict_overflow(&self, state: &mut CacheState) {
        if state.entries.len() <= self.config.max_cache_size {
            return;
        }
        let target =
            (self.config.max_cache_size as f64 * self.config.evict_to_fraction) as usize;
        let now = Instant::now();
        let mut ranked: Vec<(f64, Instant, PipelineKey)> = state
            .entries
            .iter()
            .map(|(key, entry)| {
                let age = now
                    .duration_since(entry.created_at)
                    .as_secs_f64()
                    .max(f64::EPSILON);
                (entry.use_count as f64 / age, entry.last_used_at, key.clone())
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        let evict_count = state.entries.len().saturating_sub(target);
        let mut evicted = 0u64;
        for (_, _, key) in ranked.into_iter().take(evict_count) {
            if let Some(entry) = state.entries.remove(&key) {
                self.compiler.discard(entry.handle);
                evicted += 1;
            }
        }
        state.evictions += evicted;
        logwise::info_sync!(
            "PipelineStateCache: evicted {evicted} pipelines down to {target}",
            evicted = evicted,
            target = (target as u64)
        );
    }

    /// Empties the cache and cancels every pending compile.
    ///
    /// Waiters resume with [`PipelineError::Cancelled`].  A runner that is
    /// mid-compile discovers the cancellation when it finishes; its result
    /// is discarded.
    pub fn clear(&self) {
        let (entries, pending) = {
            let mut state = self.state.write().unwrap();
            (
                std::mem::take(&mut state.entries),
                std::mem::take(&mut state.pending),
            )
        };
        let mut cancelled = 0u64;
        for (_, entry) in &entries {
            self.compiler.discard(entry.handle);
        }
        for (_, waiters) in pending {
            for waiter in waiters {
                waiter.send(Err(PipelineError::Cancelled));
                cancelled += 1;
            }
        }
        logwise::info_sync!(
            "PipelineStateCache: cleared {entries} entries, cancelled {cancelled} waiters",
            entries = entries.len(),
            cancelled = cancelled
        );
    }

    pub fn statistics(&self) -> PipelineCacheStatistics {
        let state = self.state.read().unwrap();
        PipelineCacheStatistics {
            entries: state.entries.len(),
            pending: state.pending.len(),
            hits: state.hits,
            misses: state.misses,
            compiles: state.compiles,
            failures: state.failures,
            evictions: state.evictions,
        }
    }

    /// Test hook: rewrites an entry's age and use count so eviction ranking
    /// is deterministic.
    #[cfg(test)]
    fn shape_entry(
        &self,
        descriptor: &PipelineDescriptor,
        age: std::time::Duration,
        idle: std::time::Duration,
        use_count: u64,
    ) {
        let mut state = self.state.write().unwrap();
        let entry = state
            .entries
            .get_mut(&descriptor.key())
            .expect("entry exists");
        entry.created_at = Instant::now() - age;
        entry.last_used_at = Instant::now() - idle;
        entry.use_count = use_count;
    }
}
