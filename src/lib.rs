//! Emberlight: a deferred rendering engine on Vulkan.
//!
//! The engine drives a multi-pass GPU pipeline over an explicit Vulkan
//! backend: shadow maps → depth pre-pass + G-buffer → full-screen deferred
//! lighting → histogram-based auto-exposure and ACES tone-mapping → egui
//! overlay. Per-frame resources are ringed across three frames in flight;
//! cross-pass hazards are handled exclusively through image layout
//! transitions at pass boundaries.
//!
//! # Architecture
//! - [`Context`]: device bundle (instance, device, queue, allocator,
//!   pools, deletion queue, frame ring index)
//! - [`resources`]: `Buffer`/`Image`/`Sampler` owning wrappers with
//!   explicit `destroy(&Context)` lifetimes and tracked image layouts
//! - [`descriptors`]: set layouts (incl. update-after-bind variable-count
//!   arrays), pool, batched writer
//! - [`pipelines`]: SPIR-V loading and dynamic-rendering pipeline builders
//! - [`passes`]: the five render passes
//! - [`Renderer`]: the per-frame orchestration loop
//!
//! The scene graph, asset importing and UI widget logic live outside the
//! engine; the [`scene`] module holds only the interfaces the renderer
//! consumes (`RenderItem`, `LightItem`, `CameraData`, lights, meshes and
//! the bindless texture registry).

pub mod commands;
pub mod config;
pub mod context;
pub mod debug;
pub mod deletion;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod passes;
pub mod pipelines;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use config::RendererConfig;
pub use context::{Context, MAX_FRAMES_IN_FLIGHT};
pub use error::{RenderError, RenderResult};
pub use renderer::{FrameStats, Renderer};
pub use window::create_window;

// Re-exported for application code driving the renderer.
pub use scene::{
    Camera, CameraData, ExposureSettings, Light, LightItem, LightKind, Material, Mesh, Model,
    RenderItem, SubMesh, Vertex,
};
