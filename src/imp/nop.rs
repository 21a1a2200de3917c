// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Headless backend.
//!
//! [`NopDevice`] issues handles and tracks byte accounting without touching
//! any GPU API.  It exists so the pools can be exercised on machines with no
//! adapter at all - unit tests, integration tests, and benches all run
//! against it - and so tests can observe backend traffic (creation counts,
//! compile counts) and inject failures.
//!
//! Compiles take a configurable wall-clock delay so concurrent callers
//! genuinely overlap, which is what the single-flight machinery is for.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::descriptor::{BufferType, PipelineDescriptor, TextureDescriptor};
use crate::imp::{
    BufferHandle, CompileFailure, CompileFuture, Device, DeviceError, HeapHandle, PipelineHandle,
    TextureHandle,
};

const DEFAULT_BUDGET: u64 = 256 * 1024 * 1024;
const DEFAULT_COMPILE_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct LiveResources {
    textures: HashMap<u64, u64>,
    buffers: HashMap<u64, u64>,
    heaps: HashMap<u64, u64>,
}

/// A headless [`Device`] + [`PipelineCompiler`](crate::imp::PipelineCompiler).
///
/// Handle ids are issued from a shared counter starting at 1 (0 is the null
/// pipeline id).  Byte sizes are tracked per handle so destroy calls keep
/// the accounting honest.
#[derive(Debug)]
pub struct NopDevice {
    next_id: AtomicU64,
    budget: u64,
    compile_delay: Duration,
    live: Mutex<LiveResources>,
    textures_created: AtomicU64,
    buffers_created: AtomicU64,
    heaps_created: AtomicU64,
    compiles: std::sync::Arc<AtomicU64>,
    fail_next_creation: AtomicBool,
    fail_compiles_matching: Mutex<Option<String>>,
}

impl NopDevice {
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_BUDGET)
    }

    pub fn with_budget(budget: u64) -> Self {
        NopDevice {
            next_id: AtomicU64::new(1),
            budget,
            compile_delay: DEFAULT_COMPILE_DELAY,
            live: Mutex::new(LiveResources::default()),
            textures_created: AtomicU64::new(0),
            buffers_created: AtomicU64::new(0),
            heaps_created: AtomicU64::new(0),
            compiles: std::sync::Arc::new(AtomicU64::new(0)),
            fail_next_creation: AtomicBool::new(false),
            fail_compiles_matching: Mutex::new(None),
        }
    }

    /// Slows every compile down by `delay`, so tests can arrange real
    /// overlap between concurrent requests.
    pub fn set_compile_delay(&mut self, delay: Duration) {
        self.compile_delay = delay;
    }

    /// The next create call fails with [`DeviceError::OutOfMemory`].
    pub fn fail_next_creation(&self) {
        self.fail_next_creation.store(true, Ordering::Relaxed);
    }

    /// Compiles whose descriptor label contains `needle` fail until cleared
    /// with [`clear_compile_failures`](NopDevice::clear_compile_failures).
    pub fn fail_compiles_matching(&self, needle: impl Into<String>) {
        *self.fail_compiles_matching.lock().unwrap() = Some(needle.into());
    }

    pub fn clear_compile_failures(&self) {
        *self.fail_compiles_matching.lock().unwrap() = None;
    }

    /// Number of compile invocations that actually executed.
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }

    pub fn textures_created(&self) -> u64 {
        self.textures_created.load(Ordering::Relaxed)
    }

    pub fn buffers_created(&self) -> u64 {
        self.buffers_created.load(Ordering::Relaxed)
    }

    pub fn heaps_created(&self) -> u64 {
        self.heaps_created.load(Ordering::Relaxed)
    }

    /// Bytes currently alive across textures, buffers, and heaps.
    pub fn allocated_bytes(&self) -> u64 {
        let live = self.live.lock().unwrap();
        live.textures.values().sum::<u64>()
            + live.buffers.values().sum::<u64>()
            + live.heaps.values().sum::<u64>()
    }

    fn issue_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_creation(&self) -> Result<(), DeviceError> {
        if self.fail_next_creation.swap(false, Ordering::Relaxed) {
            Err(DeviceError::OutOfMemory)
        } else {
            Ok(())
        }
    }
}

impl Default for NopDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for NopDevice {
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureHandle, DeviceError> {
        self.check_creation()?;
        let id = self.issue_id();
        self.live
            .lock()
            .unwrap()
            .textures
            .insert(id, descriptor.byte_size());
        self.textures_created.fetch_add(1, Ordering::Relaxed);
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.live.lock().unwrap().textures.remove(&texture.0);
    }

    fn create_buffer(
        &self,
        size: u64,
        _buffer_type: BufferType,
    ) -> Result<BufferHandle, DeviceError> {
        self.check_creation()?;
        let id = self.issue_id();
        self.live.lock().unwrap().buffers.insert(id, size);
        self.buffers_created.fetch_add(1, Ordering::Relaxed);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.live.lock().unwrap().buffers.remove(&buffer.0);
    }

    fn create_heap(&self, size: u64) -> Result<HeapHandle, DeviceError> {
        self.check_creation()?;
        let id = self.issue_id();
        self.live.lock().unwrap().heaps.insert(id, size);
        self.heaps_created.fetch_add(1, Ordering::Relaxed);
        Ok(HeapHandle(id))
    }

    fn destroy_heap(&self, heap: HeapHandle) {
        self.live.lock().unwrap().heaps.remove(&heap.0);
    }

    fn memory_budget(&self) -> u64 {
        self.budget
    }
}

impl crate::imp::PipelineCompiler for NopDevice {
    fn compile(&self, descriptor: &PipelineDescriptor) -> CompileFuture {
        let delay = self.compile_delay;
        let compiles = self.compiles.clone();
        let label = descriptor.label.clone();
        let fail = self
            .fail_compiles_matching
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|needle| label.contains(needle.as_str()));
        let id = self.issue_id();
        Box::pin(async move {
            portable_async_sleep::async_sleep(delay).await;
            compiles.fetch_add(1, Ordering::Relaxed);
            if fail {
                return Err(CompileFailure::new(format!(
                    "injected compile failure for `{label}`"
                )));
            }
            Ok(PipelineHandle(id))
        })
    }

    //discard: nothing to free headlessly; the default no-op applies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{TextureFormat, TextureUsage};
    use crate::imp::Device;

    #[test]
    fn accounting_round_trip() {
        let device = NopDevice::new();
        let descriptor = TextureDescriptor::new(
            64,
            64,
            TextureFormat::Rgba8Unorm,
            TextureUsage::ShaderSample,
        );
        let texture = device.create_texture(&descriptor).unwrap();
        assert_eq!(device.allocated_bytes(), descriptor.byte_size());
        device.destroy_texture(texture);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn creation_failure_is_one_shot() {
        let device = NopDevice::new();
        device.fail_next_creation();
        let descriptor = TextureDescriptor::new(
            4,
            4,
            TextureFormat::R8Unorm,
            TextureUsage::ShaderSample,
        );
        assert!(device.create_texture(&descriptor).is_err());
        assert!(device.create_texture(&descriptor).is_ok());
    }
}
