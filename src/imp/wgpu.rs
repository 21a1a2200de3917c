// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! wgpu backend.
//!
//! Backs the opaque handles with real `wgpu` objects.  The backend owns the
//! objects in handle-keyed maps; rendering code retrieves them through the
//! typed accessors ([`WgpuDevice::texture`] and friends).
//!
//! Two simplifications relative to a fully native API:
//!
//! - wgpu has no placed resources, so a "heap" is backed by one large
//!   buffer.  Sub-allocation bookkeeping (offsets, aliasing) lives entirely
//!   in [`ResourceHeap`](crate::heap::ResourceHeap); the backing buffer just
//!   pins the memory.
//! - wgpu reports creation problems through its error machinery rather than
//!   return values, so `create_*` only fails here for requests the backend
//!   can reject up front.  Pipeline compilation, which is where the real
//!   latency and failure modes are, is validated through an error scope and
//!   surfaced per request.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::descriptor::{
    BlendMode, BufferType, PipelineDescriptor, TextureDescriptor, TextureFormat, TextureUsage,
};
use crate::imp::{
    BufferHandle, CompileFailure, CompileFuture, Device, DeviceError, HeapHandle, PipelineHandle,
    TextureHandle,
};

impl TextureFormat {
    /// Converts this format to the corresponding wgpu format.
    pub const fn wgpu_format(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

impl TextureUsage {
    /// Converts this usage to the corresponding wgpu usage flags.
    pub const fn wgpu_usage(&self) -> wgpu::TextureUsages {
        match self {
            TextureUsage::ShaderSample => {
                wgpu::TextureUsages::TEXTURE_BINDING.union(wgpu::TextureUsages::COPY_DST)
            }
            TextureUsage::RenderTarget => wgpu::TextureUsages::RENDER_ATTACHMENT,
            TextureUsage::RenderTargetAndSample => {
                wgpu::TextureUsages::RENDER_ATTACHMENT.union(wgpu::TextureUsages::TEXTURE_BINDING)
            }
            TextureUsage::Storage => {
                wgpu::TextureUsages::STORAGE_BINDING.union(wgpu::TextureUsages::TEXTURE_BINDING)
            }
        }
    }
}

impl BufferType {
    /// Converts this segment to the corresponding wgpu buffer usage flags.
    pub const fn wgpu_usage(self) -> wgpu::BufferUsages {
        match self {
            BufferType::Vertex => wgpu::BufferUsages::VERTEX.union(wgpu::BufferUsages::COPY_DST),
            BufferType::Index => wgpu::BufferUsages::INDEX.union(wgpu::BufferUsages::COPY_DST),
            BufferType::Uniform => wgpu::BufferUsages::UNIFORM.union(wgpu::BufferUsages::COPY_DST),
            BufferType::Storage => wgpu::BufferUsages::STORAGE
                .union(wgpu::BufferUsages::COPY_DST)
                .union(wgpu::BufferUsages::COPY_SRC),
            //MAP_WRITE is only compatible with COPY_SRC
            BufferType::Staging => {
                wgpu::BufferUsages::MAP_WRITE.union(wgpu::BufferUsages::COPY_SRC)
            }
        }
    }
}

impl BlendMode {
    const fn wgpu_blend(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Opaque => None,
            BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            BlendMode::Premultiplied => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            BlendMode::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    device: wgpu::Device,
    #[allow(dead_code)] //kept for upload paths layered above this crate
    queue: wgpu::Queue,
    budget: u64,
    next_id: AtomicU64,
    textures: Mutex<HashMap<u64, wgpu::Texture>>,
    buffers: Mutex<HashMap<u64, wgpu::Buffer>>,
    heaps: Mutex<HashMap<u64, wgpu::Buffer>>,
    pipelines: Mutex<HashMap<u64, wgpu::RenderPipeline>>,
}

/// [`Device`] and [`PipelineCompiler`](crate::imp::PipelineCompiler) over a
/// bound `wgpu` device.
#[derive(Debug, Clone)]
pub struct WgpuDevice {
    inner: Arc<Inner>,
}

impl WgpuDevice {
    /// Wraps a bound device and queue.
    ///
    /// wgpu exposes no budget query, so the caller supplies the working-set
    /// budget (from adapter limits, platform hints, or configuration).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, memory_budget: u64) -> Self {
        WgpuDevice {
            inner: Arc::new(Inner {
                device,
                queue,
                budget: memory_budget,
                next_id: AtomicU64::new(1),
                textures: Mutex::new(HashMap::new()),
                buffers: Mutex::new(HashMap::new()),
                heaps: Mutex::new(HashMap::new()),
                pipelines: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The wgpu texture behind a handle, if the handle is live.
    pub fn texture(&self, handle: TextureHandle) -> Option<wgpu::Texture> {
        self.inner.textures.lock().unwrap().get(&handle.0).cloned()
    }

    /// The wgpu buffer behind a handle, if the handle is live.
    pub fn buffer(&self, handle: BufferHandle) -> Option<wgpu::Buffer> {
        self.inner.buffers.lock().unwrap().get(&handle.0).cloned()
    }

    /// The compiled pipeline behind a handle, if the handle is live.
    pub fn pipeline(&self, handle: PipelineHandle) -> Option<wgpu::RenderPipeline> {
        self.inner.pipelines.lock().unwrap().get(&handle.0).cloned()
    }

    fn issue_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Device for WgpuDevice {
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureHandle, DeviceError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(DeviceError::Backend("zero-sized texture".to_string()));
        }
        let texture = self.inner.device.create_texture(&wgpu::TextureDescriptor {
            label: None,
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: descriptor.array_length.max(1),
            },
            mip_level_count: descriptor.mip_level_count.max(1),
            sample_count: descriptor.sample_count.max(1),
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.wgpu_format(),
            usage: descriptor.usage.wgpu_usage(),
            view_formats: &[],
        });
        let id = self.issue_id();
        self.inner.textures.lock().unwrap().insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        if let Some(texture) = self.inner.textures.lock().unwrap().remove(&texture.0) {
            texture.destroy();
        }
    }

    fn create_buffer(
        &self,
        size: u64,
        buffer_type: BufferType,
    ) -> Result<BufferHandle, DeviceError> {
        //round up to the nearest COPY_BUFFER_ALIGNMENT to keep wgpu happy
        let allocated_size =
            (size + wgpu::COPY_BUFFER_ALIGNMENT - 1) & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
        let buffer = self.inner.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: allocated_size,
            usage: buffer_type.wgpu_usage(),
            mapped_at_creation: false,
        });
        let id = self.issue_id();
        self.inner.buffers.lock().unwrap().insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        if let Some(buffer) = self.inner.buffers.lock().unwrap().remove(&buffer.0) {
            buffer.destroy();
        }
    }

    fn create_heap(&self, size: u64) -> Result<HeapHandle, DeviceError> {
        //no placed resources in wgpu; one large buffer pins the region and
        //the heap's own bookkeeping carves it up
        let buffer = self.inner.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pools_and_pipelines heap backing"),
            size,
            usage: wgpu::BufferUsages::COPY_SRC.union(wgpu::BufferUsages::COPY_DST),
            mapped_at_creation: false,
        });
        let id = self.issue_id();
        self.inner.heaps.lock().unwrap().insert(id, buffer);
        Ok(HeapHandle(id))
    }

    fn destroy_heap(&self, heap: HeapHandle) {
        if let Some(buffer) = self.inner.heaps.lock().unwrap().remove(&heap.0) {
            buffer.destroy();
        }
    }

    fn memory_budget(&self) -> u64 {
        self.inner.budget
    }
}

impl crate::imp::PipelineCompiler for WgpuDevice {
    fn compile(&self, descriptor: &PipelineDescriptor) -> CompileFuture {
        let inner = self.inner.clone();
        let descriptor = descriptor.clone();
        Box::pin(async move {
            let perf = logwise::perfwarn_begin!("WgpuDevice::compile");
            //validation errors land in the scope rather than the global
            //handler, so one bad shader fails one request
            inner.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let vertex_module = inner
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&descriptor.vertex.name),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&descriptor.vertex.wgsl)),
                });
            let fragment_module = inner
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&descriptor.fragment.name),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&descriptor.fragment.wgsl)),
                });
            let targets: Vec<Option<wgpu::ColorTargetState>> = descriptor
                .color_formats
                .iter()
                .map(|format| {
                    Some(wgpu::ColorTargetState {
                        format: format.wgpu_format(),
                        blend: descriptor.blend.wgpu_blend(),
                        write_mask: wgpu::ColorWrites::ALL,
                    })
                })
                .collect();
            let render_descriptor = wgpu::RenderPipelineDescriptor {
                label: Some(&descriptor.label),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some(&descriptor.vertex.name),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: descriptor.sample_count.max(1),
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some(&descriptor.fragment.name),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                multiview: None,
                cache: None,
            };
            let pipeline = inner.device.create_render_pipeline(&render_descriptor);
            if let Some(error) = inner.device.pop_error_scope().await {
                drop(perf);
                return Err(CompileFailure::new(error.to_string()));
            }
            let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
            inner.pipelines.lock().unwrap().insert(id, pipeline);
            drop(perf);
            logwise::trace_sync!("Created render pipeline");
            Ok(PipelineHandle(id))
        })
    }

    fn discard(&self, pipeline: PipelineHandle) {
        self.inner.pipelines.lock().unwrap().remove(&pipeline.0);
    }
}
