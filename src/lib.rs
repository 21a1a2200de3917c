/*! pools_and_pipelines is the GPU resource management layer beneath a
real-time layer-compositing renderer.

Rendering code asks this crate for textures, buffer ranges, raw device
memory, and compiled pipelines; the crate's job is to make those requests
cheap.  Allocation stalls, shader-compile latency, and fragmentation are
the three costs it exists to hide.

| Manager | Keyed by | Amortizes | Reclamation |
|---------------------------------------------------------|--------------------------|-------------------------------|------------------------------------------|
| [Texture pool](texture_pool::TexturePool)               | structural descriptor    | texture object creation       | priority/age scoring, pressure gating    |
| [Buffer pool](buffer_pool::BufferPool)                  | usage segment            | per-request buffer creation   | chunk shrink maintenance                 |
| [Resource heap](heap::ResourceHeap)                     | explicit byte ranges     | raw memory allocation         | fragment coalescing, alias groups        |
| [Pipeline cache](pipeline_cache::PipelineStateCache)    | shader + state hash      | pipeline compilation          | LFU eviction, single-flight dedup        |

Each manager is its own lock domain; nothing in this crate takes two locks
at once on a request path.  The only suspending operation is the pipeline
compile, and concurrent requests for the same uncached pipeline share a
single compile (see [pipeline_cache]).

The compositor itself - draw calls, the layer graph, shader sources - lives
above this crate and talks to it through the acquire/release/get entry
points.  GPU APIs live below it, behind the [imp] device abstraction: a
`wgpu` backend (feature `backend_wgpu`, default) and a headless [imp::nop]
backend used by tests and benches.

# Pooling textures

```
use std::sync::Arc;
use pools_and_pipelines::descriptor::{TextureDescriptor, TextureFormat};
use pools_and_pipelines::imp::nop::NopDevice;
use pools_and_pipelines::priority::ResourcePriority;
use pools_and_pipelines::texture_pool::{TexturePool, TexturePoolConfig};

let device = Arc::new(NopDevice::new());
let pool = TexturePool::new(device, TexturePoolConfig::default());

let descriptor = TextureDescriptor::render_target(1920, 1080, TextureFormat::Bgra8Unorm);
let frame = pool.acquire(&descriptor, ResourcePriority::Normal).expect("acquire");
// ...render into it...
pool.release(frame).expect("release");

// the next frame gets the same texture back
let again = pool.acquire(&descriptor, ResourcePriority::Normal).expect("acquire");
assert_eq!(frame, again);
```

# Caching pipelines

```
use std::sync::Arc;
use pools_and_pipelines::descriptor::{
    BlendMode, PipelineDescriptor, ShaderFunction, TextureFormat,
};
use pools_and_pipelines::imp::nop::NopDevice;
use pools_and_pipelines::pipeline_cache::{PipelineCacheConfig, PipelineStateCache};

let device = Arc::new(NopDevice::new());
let cache = Arc::new(PipelineStateCache::new(device, PipelineCacheConfig::default()));

test_executors::sleep_on(async move {
    let descriptor = PipelineDescriptor {
        label: "layer composite".to_string(),
        vertex: ShaderFunction::new("vs_main", "fn vs_main() {}"),
        fragment: ShaderFunction::new("fs_main", "fn fs_main() {}"),
        color_formats: vec![TextureFormat::Bgra8UnormSrgb],
        blend: BlendMode::Premultiplied,
        sample_count: 1,
    };
    let pipeline = cache.get(&descriptor).await.expect("compile");
    //second request is a cache hit, same compiled object
    assert_eq!(cache.get(&descriptor).await.expect("cached"), pipeline);
});
```
*/

pub mod buffer_pool;
pub mod descriptor;
mod fragment;
pub mod heap;
pub mod imp;
pub mod pipeline_cache;
pub mod priority;
pub mod texture_pool;

pub use descriptor::{BufferType, PipelineDescriptor, TextureDescriptor};
pub use priority::{MemoryPressure, ResourcePriority};
