// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Structural resource descriptors.
//!
//! Pools and caches in this crate are keyed by *what a resource looks like*,
//! never by which object happens to hold it.  Every type in this module is an
//! immutable value with derived structural equality and hashing, so two
//! descriptors built independently from the same parameters are
//! interchangeable as keys.
//!
//! # Overview
//!
//! - [`TextureDescriptor`] - shape/format/usage of a texture, the texture
//!   pool's key
//! - [`BufferType`] - the five buffer usage segments, each with its own chunk
//!   sizing and alignment rules
//! - [`PipelineDescriptor`] + [`PipelineKey`] - shader functions plus
//!   fixed-function state, the pipeline cache's key

use std::hash::{Hash, Hasher};

/// Texel formats the compositing renderer allocates.
///
/// This is intentionally the short list the layer compositor actually uses,
/// not a transcription of every format the backends support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    R32Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    /// Bytes per texel for this format.
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// How a texture will be accessed by the rendering pipeline.
///
/// Usage is part of the structural key: a render target and a sampled texture
/// of the same size and format are *not* interchangeable, so the pool must
/// never hand one out for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Sampled by shaders only (layer content, masks, LUTs).
    ShaderSample,
    /// Rendered into only (pure attachment, e.g. depth).
    RenderTarget,
    /// Rendered into by one pass and sampled by the next.  The common case
    /// for intermediate compositing surfaces.
    RenderTargetAndSample,
    /// Read and written by compute-style effect passes.
    Storage,
}

/// Where a texture's memory should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    /// GPU-only memory.  The default for everything the compositor renders.
    Private,
    /// CPU-visible memory, for textures the CPU uploads into.
    Shared,
    /// Transient attachment memory that never needs to be backed by a real
    /// allocation on tile-based GPUs.
    Memoryless,
}

/// Immutable, hashable description of a texture.
///
/// This is the texture pool's key type.  Equality is structural - two
/// descriptors with the same fields are the same key regardless of where they
/// were constructed.
///
/// # Examples
///
/// ```
/// use pools_and_pipelines::descriptor::{TextureDescriptor, TextureFormat, TextureUsage};
///
/// let a = TextureDescriptor::render_target(1920, 1080, TextureFormat::Bgra8Unorm);
/// let b = TextureDescriptor::render_target(1920, 1080, TextureFormat::Bgra8Unorm);
/// assert_eq!(a, b); //structural, not identity
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub storage: StorageClass,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub array_length: u32,
}

impl TextureDescriptor {
    /// A single-sample, single-mip, single-layer 2D texture.
    pub fn new(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        TextureDescriptor {
            width,
            height,
            format,
            usage,
            storage: StorageClass::Private,
            mip_level_count: 1,
            sample_count: 1,
            array_length: 1,
        }
    }

    /// Shorthand for the intermediate-surface case: rendered into, then
    /// sampled by the next pass.
    pub fn render_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self::new(width, height, format, TextureUsage::RenderTargetAndSample)
    }

    /// Estimated memory footprint in bytes.
    ///
    /// Each mip level halves both dimensions (floor, minimum 1 texel).  This
    /// is the figure the pool's eviction scoring and pressure accounting use;
    /// backends may round allocations up further.
    pub fn byte_size(&self) -> u64 {
        let texel = self.format.bytes_per_texel() as u64;
        let mut total = 0u64;
        let mut w = self.width.max(1) as u64;
        let mut h = self.height.max(1) as u64;
        for _ in 0..self.mip_level_count.max(1) {
            total += w * h * texel;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        total * self.sample_count.max(1) as u64 * self.array_length.max(1) as u64
    }
}

/// The five buffer usage segments the buffer pool manages.
///
/// Each segment grows its own chunks and aligns its own sub-allocations;
/// uniform and storage data need a coarser alignment than vertex or index
/// streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Vertex,
    Index,
    Uniform,
    Storage,
    Staging,
}

impl BufferType {
    /// Default size for a freshly created chunk of this segment.
    pub const fn default_chunk_size(self) -> u64 {
        match self {
            BufferType::Vertex => 8 * 1024 * 1024,
            BufferType::Index => 4 * 1024 * 1024,
            BufferType::Uniform => 2 * 1024 * 1024,
            BufferType::Storage => 16 * 1024 * 1024,
            BufferType::Staging => 32 * 1024 * 1024,
        }
    }

    /// Required alignment for sub-allocations of this segment.
    ///
    /// Uniform/storage alignments follow the common 256-byte binding-offset
    /// requirement; vertex and index streams only need element alignment.
    pub const fn alignment(self) -> u64 {
        match self {
            BufferType::Vertex => 16,
            BufferType::Index => 16,
            BufferType::Uniform => 256,
            BufferType::Storage => 256,
            BufferType::Staging => 64,
        }
    }

    pub const fn all() -> [BufferType; 5] {
        [
            BufferType::Vertex,
            BufferType::Index,
            BufferType::Uniform,
            BufferType::Storage,
            BufferType::Staging,
        ]
    }
}

/// A named shader function plus its source.
///
/// The pipeline cache keys on function *identity*: the name together with a
/// content hash of the source.  Recompiling after a source edit therefore
/// produces a different key, while re-creating the same function from the
/// same text lands on the cached pipeline.
#[derive(Debug, Clone)]
pub struct ShaderFunction {
    pub name: String,
    pub wgsl: String,
    content_hash: u64,
}

impl ShaderFunction {
    pub fn new(name: impl Into<String>, wgsl: impl Into<String>) -> Self {
        let name = name.into();
        let wgsl = wgsl.into();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        wgsl.hash(&mut hasher);
        let content_hash = hasher.finish();
        ShaderFunction {
            name,
            wgsl,
            content_hash,
        }
    }

    /// The function's identity for cache keying: name plus source hash.
    pub fn identity(&self) -> FunctionIdentity {
        FunctionIdentity {
            name: self.name.clone(),
            content_hash: self.content_hash,
        }
    }
}

/// The keyable identity of a shader function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    pub name: String,
    pub content_hash: u64,
}

/// Fixed-function blend configuration for a color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Source replaces destination.
    Opaque,
    /// Classic source-over with straight alpha.
    Alpha,
    /// Source-over with premultiplied alpha.  What the layer compositor uses
    /// for almost everything.
    Premultiplied,
    /// Additive accumulation (glows, particles).
    Additive,
}

/// Everything needed to compile one pipeline: shader functions plus the
/// fixed-function state that participates in pipeline identity.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    /// Human-readable name, used for labels and error reporting.  Not part
    /// of the cache key.
    pub label: String,
    pub vertex: ShaderFunction,
    pub fragment: ShaderFunction,
    pub color_formats: Vec<TextureFormat>,
    pub blend: BlendMode,
    pub sample_count: u32,
}

impl PipelineDescriptor {
    /// Computes the structural cache key for this descriptor.
    pub fn key(&self) -> PipelineKey {
        PipelineKey {
            vertex: self.vertex.identity(),
            fragment: self.fragment.identity(),
            color_formats: self.color_formats.clone(),
            blend: self.blend,
            sample_count: self.sample_count,
        }
    }
}

/// Content key for a compiled pipeline.
///
/// Covers the shader function identities and every piece of fixed-function
/// state that changes the compiled object.  The `label` of the descriptor is
/// deliberately excluded: renaming a pass must not defeat the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    vertex: FunctionIdentity,
    fragment: FunctionIdentity,
    color_formats: Vec<TextureFormat>,
    blend: BlendMode,
    sample_count: u32,
}
