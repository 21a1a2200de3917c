// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Device abstraction layer.
//!
//! The pools never touch a GPU API directly.  They talk to two small traits:
//!
//! - [`Device`] - the opaque factory for raw textures, buffers, and heap
//!   backing memory, plus the memory-budget hint.
//! - [`PipelineCompiler`] - the shader/function provider that turns a
//!   [`PipelineDescriptor`](crate::descriptor::PipelineDescriptor) into a
//!   compiled pipeline.  Compilation is the one slow, suspending operation
//!   in the system, so it returns a future.
//!
//! Resources cross this boundary as opaque, device-issued handles
//! ([`TextureHandle`] and friends).  A handle is just an id: cheap to copy,
//! hashable, and with identity independent of any reference semantics.  The
//! backend owns the real GPU objects and maps handles to them internally.
//!
//! Two backends ship in-tree: [`nop`] is headless and always available
//! (tests, benches, CI); `wgpu` is behind the `backend_wgpu` feature
//! (default) and backs the handles with real `wgpu` objects.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::descriptor::{BufferType, PipelineDescriptor, TextureDescriptor};

/// Opaque id for a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Opaque id for a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Opaque id for a region of raw device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapHandle(pub(crate) u64);

/// Opaque id for a compiled pipeline.
///
/// Id 0 is reserved as the null handle; real handles start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

impl PipelineHandle {
    /// A backend returning this instead of a real pipeline (and no error)
    /// is misbehaving; the cache maps it to a defensive failure rather than
    /// caching it.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Creation failures surfaced by a [`Device`].
///
/// These typically indicate device-level resource exhaustion; they are
/// reported per request and never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device is out of memory")]
    OutOfMemory,
    #[error("backend error: {0}")]
    Backend(String),
}

/// A pipeline compile failure, carrying the originating error text.
///
/// Cloneable because the single-flight cache fans one failure out to every
/// waiter attached to the same compile.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CompileFailure {
    message: Arc<str>,
}

impl CompileFailure {
    pub fn new(message: impl Into<String>) -> Self {
        CompileFailure {
            message: message.into().into(),
        }
    }
}

/// The opaque factory for raw GPU resources.
///
/// All creation is synchronous: it completes or fails immediately and never
/// blocks on I/O.  Destroy operations are infallible by contract - a backend
/// that cannot destroy a handle it issued is broken, and housekeeping paths
/// must not propagate errors.
pub trait Device: Send + Sync {
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureHandle, DeviceError>;
    fn destroy_texture(&self, texture: TextureHandle);

    fn create_buffer(&self, size: u64, buffer_type: BufferType)
    -> Result<BufferHandle, DeviceError>;
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Creates a region of raw device memory for a
    /// [`ResourceHeap`](crate::heap::ResourceHeap) to sub-allocate.
    fn create_heap(&self, size: u64) -> Result<HeapHandle, DeviceError>;
    fn destroy_heap(&self, heap: HeapHandle);

    /// The device's working-set budget hint, in bytes.  Pools size their
    /// discard policies against this figure.
    fn memory_budget(&self) -> u64;
}

/// Future type returned by [`PipelineCompiler::compile`].
pub type CompileFuture =
    Pin<Box<dyn Future<Output = Result<PipelineHandle, CompileFailure>> + Send + 'static>>;

/// The shader/function provider the pipeline cache compiles through.
pub trait PipelineCompiler: Send + Sync {
    /// Starts compiling a pipeline.  The returned future is the slow path:
    /// the cache awaits it with no lock held.
    fn compile(&self, descriptor: &PipelineDescriptor) -> CompileFuture;

    /// Releases a compiled pipeline the cache no longer references
    /// (eviction, clear).  Best-effort.
    fn discard(&self, _pipeline: PipelineHandle) {}
}

pub mod nop;

#[cfg(feature = "backend_wgpu")]
pub mod wgpu;
