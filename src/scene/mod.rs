//! Scene-side producer interfaces.
//!
//! The scene graph itself is an external collaborator: the renderer only
//! consumes flat per-frame lists of [`RenderItem`] and [`LightItem`] plus a
//! [`CameraData`] snapshot, all rebuilt every frame by the owning
//! application. The types here are the thin concrete ends of that contract.

mod camera;
mod environment;
mod light;
mod mesh;
mod textures;

pub use camera::{Camera, CameraData, CameraMatrices, ExposureSettings, LightingCameraUniform};
pub use environment::{bake_environment, Environment};
pub use light::{light_buffer_size, GpuLightData, Light, LightKind, LightMatrices};
pub use mesh::{
    cube_mesh_data, plane_mesh_data, Material, Mesh, Model, SubMesh, Vertex,
};
pub use textures::{TextureIndexAllocator, TextureRegistry, MAX_BINDLESS_TEXTURES};

use std::sync::Arc;

use glam::Mat4;
use parking_lot::Mutex;

/// One mesh instance to draw this frame. Ephemeral: rebuilt every frame,
/// never persisted by the renderer.
#[derive(Clone)]
pub struct RenderItem {
    /// The model to draw.
    pub model: Arc<Model>,
    /// World transform.
    pub transform: Mat4,
}

/// One light to shade with this frame. Ephemeral like [`RenderItem`].
///
/// The light is shared: the renderer lazily creates its shadow-map ring and
/// recomputes its cached matrices, while the application mutates its
/// parameters between frames.
#[derive(Clone)]
pub struct LightItem {
    pub light: Arc<Mutex<Light>>,
}

impl LightItem {
    /// Wrap a light for submission.
    pub fn new(light: Arc<Mutex<Light>>) -> Self {
        Self { light }
    }
}
