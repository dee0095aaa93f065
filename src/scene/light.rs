//! Lights, their lazily derived shadow matrices, and the GPU light buffer
//! layout.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::context::Context;
use crate::resources::{Image, ImageBuilder};

/// Light variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
}

/// Derived light-space matrices, recomputed lazily whenever the light's
/// parameters or the scene bounds change.
#[derive(Debug, Clone)]
pub struct LightMatrices {
    /// Shared projection (orthographic for directional, 90° perspective for
    /// point lights).
    pub proj: Mat4,
    /// One view per shadow layer: 1 for directional, 6 cube faces for point.
    pub views: Vec<Mat4>,
    /// Far plane used for point-light depth normalization.
    pub far_plane: f32,
}

impl LightMatrices {
    /// Combined light-space matrix for one shadow layer.
    pub fn light_space(&self, face: usize) -> Mat4 {
        self.proj * self.views[face]
    }
}

/// A CPU-side light.
///
/// Owns its shadow-map ring (one depth image per frame in flight), created
/// lazily by the renderer the first frame the light is submitted. Until the
/// maps exist, the light shades unshadowed: a newly spawned light is
/// shadowless for exactly one frame.
pub struct Light {
    kind: LightKind,
    direction: Vec3,
    position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    range: f32,
    matrices: Option<LightMatrices>,
    scene_radius: f32,
    pub(crate) shadow_maps: Vec<Image>,
}

impl Light {
    /// Create a directional light.
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            direction: direction.normalize(),
            position: Vec3::ZERO,
            color,
            intensity,
            range: 0.0,
            matrices: None,
            scene_radius: 0.0,
            shadow_maps: Vec::new(),
        }
    }

    /// Create a point light with a falloff `range`.
    pub fn point(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            direction: Vec3::NEG_Y,
            position,
            color,
            intensity,
            range,
            matrices: None,
            scene_radius: 0.0,
            shadow_maps: Vec::new(),
        }
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn range(&self) -> f32 {
        self.range
    }

    /// Move the light, invalidating cached matrices.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.matrices = None;
    }

    /// Re-aim a directional light, invalidating cached matrices.
    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction.normalize();
        self.matrices = None;
    }

    /// Change the falloff range, invalidating cached matrices.
    pub fn set_range(&mut self, range: f32) {
        self.range = range;
        self.matrices = None;
    }

    /// Number of shadow layers: 1 for directional, 6 cube faces for point.
    pub fn shadow_layer_count(&self) -> u32 {
        match self.kind {
            LightKind::Directional => 1,
            LightKind::Point => 6,
        }
    }

    /// Whether the shadow-map ring has been created.
    pub fn has_shadow_maps(&self) -> bool {
        !self.shadow_maps.is_empty()
    }

    /// Shadow map for a frame ring slot, if the ring exists.
    pub(crate) fn shadow_map(&self, frame: usize) -> Option<&Image> {
        self.shadow_maps.get(frame)
    }

    pub(crate) fn shadow_map_mut(&mut self, frame: usize) -> Option<&mut Image> {
        self.shadow_maps.get_mut(frame)
    }

    /// The builder for one of this light's shadow maps.
    ///
    /// Point lights get a cube-compatible 6-layer image; both variants get
    /// per-layer views for use as single-layer depth render targets.
    pub fn shadow_map_builder(kind: LightKind, resolution: u32) -> ImageBuilder<'static> {
        let extent = vk::Extent2D {
            width: resolution,
            height: resolution,
        };
        let builder = Image::builder(extent, vk::Format::D32_SFLOAT)
            .usage(
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            )
            .layer_views();
        match kind {
            LightKind::Directional => builder,
            LightKind::Point => builder.cube(),
        }
    }

    /// Light-space matrices, recomputed only when the light parameters or
    /// the scene bounding radius changed since the last call.
    pub fn matrices(&mut self, scene_radius: f32) -> &LightMatrices {
        let stale = match &self.matrices {
            None => true,
            Some(_) => (self.scene_radius - scene_radius).abs() > f32::EPSILON,
        };
        if stale {
            self.scene_radius = scene_radius;
            self.matrices = Some(self.compute_matrices(scene_radius));
        }
        self.matrices.as_ref().unwrap()
    }

    fn compute_matrices(&self, scene_radius: f32) -> LightMatrices {
        match self.kind {
            LightKind::Directional => {
                let radius = scene_radius.max(1.0);
                let eye = -self.direction * radius * 2.0;
                let up = if self.direction.cross(Vec3::Y).length_squared() < 1e-4 {
                    Vec3::Z
                } else {
                    Vec3::Y
                };
                let view = Mat4::look_at_rh(eye, Vec3::ZERO, up);
                let far = radius * 4.0;
                let mut proj = Mat4::orthographic_rh(
                    -radius, radius, -radius, radius, 0.1, far,
                );
                proj.y_axis.y *= -1.0;
                LightMatrices {
                    proj,
                    views: vec![view],
                    far_plane: far,
                }
            }
            LightKind::Point => {
                let far = self.range.max(1.0);
                let mut proj =
                    Mat4::perspective_rh(90f32.to_radians(), 1.0, 0.05, far);
                proj.y_axis.y *= -1.0;
                let views = CUBE_FACE_DIRECTIONS
                    .iter()
                    .map(|&(forward, up)| {
                        Mat4::look_at_rh(self.position, self.position + forward, up)
                    })
                    .collect();
                LightMatrices {
                    proj,
                    views,
                    far_plane: far,
                }
            }
        }
    }

    /// Pack for the light SSBO. `shadow_index` is the slot in the
    /// directional or point shadow-map descriptor array, or -1 when the
    /// light has no map yet.
    pub fn to_gpu_data(&mut self, scene_radius: f32, shadow_index: i32) -> GpuLightData {
        let kind = match self.kind {
            LightKind::Directional => 0.0,
            LightKind::Point => 1.0,
        };
        let matrices = self.matrices(scene_radius);
        let light_space = matrices.light_space(0);
        let far_plane = matrices.far_plane;
        GpuLightData {
            position: self.position.extend(self.range),
            color: self.color.extend(self.intensity),
            direction: self.direction.extend(kind),
            shadow: Vec4::new(shadow_index as f32, far_plane, 0.0, 0.0),
            light_space,
        }
    }

    /// Destroy the shadow-map ring.
    pub fn destroy(&mut self, context: &Context) {
        for mut map in self.shadow_maps.drain(..) {
            map.destroy(context);
        }
    }
}

/// Cube face (forward, up) pairs in +X, -X, +Y, -Y, +Z, -Z order.
const CUBE_FACE_DIRECTIONS: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// One light as laid out in the structured light buffer (std430).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuLightData {
    /// xyz = world position (point lights), w = falloff range.
    pub position: Vec4,
    /// xyz = color, w = intensity.
    pub color: Vec4,
    /// xyz = direction (directional lights), w = kind (0 dir, 1 point).
    pub direction: Vec4,
    /// x = shadow array slot or -1, y = far plane, zw unused.
    pub shadow: Vec4,
    /// Light-space matrix for directional shadow lookup.
    pub light_space: Mat4,
}

/// Byte size of the light SSBO for `light_count` lights:
/// a 4-word header (count + padding) followed by the packed light array.
pub fn light_buffer_size(light_count: usize) -> u64 {
    (4 * std::mem::size_of::<u32>() + light_count * std::mem::size_of::<GpuLightData>()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_light_data_layout() {
        // 4 vec4s + mat4, 16-byte aligned, no implicit padding.
        assert_eq!(std::mem::size_of::<GpuLightData>(), 128);
        assert_eq!(std::mem::align_of::<GpuLightData>(), 16);
    }

    #[test]
    fn test_light_buffer_size_formula() {
        assert_eq!(light_buffer_size(0), 16);
        assert_eq!(light_buffer_size(1), 16 + 128);
        assert_eq!(light_buffer_size(7), 16 + 7 * 128);
    }

    #[test]
    fn test_shadow_layer_counts() {
        let directional = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0);
        assert_eq!(directional.shadow_layer_count(), 1);

        let point = Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 10.0);
        assert_eq!(point.shadow_layer_count(), 6);
    }

    #[test]
    fn test_point_shadow_map_is_cube() {
        let builder = Light::shadow_map_builder(LightKind::Point, 1024);
        assert_eq!(builder.array_layers, 6);
        assert!(builder.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(builder.format, vk::Format::D32_SFLOAT);

        let builder = Light::shadow_map_builder(LightKind::Directional, 2048);
        assert_eq!(builder.array_layers, 1);
        assert!(!builder.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
    }

    #[test]
    fn test_matrices_cached_until_invalidated() {
        let mut light = Light::point(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, 1.0, 10.0);
        let first = light.matrices(5.0).clone();
        // Same parameters: cache hit, identical values.
        let second = light.matrices(5.0).clone();
        assert_eq!(first.views[0], second.views[0]);

        light.set_position(Vec3::new(4.0, 2.0, 3.0));
        let third = light.matrices(5.0).clone();
        assert_ne!(first.views[0], third.views[0]);
    }

    #[test]
    fn test_point_light_has_six_faces() {
        let mut light = Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 25.0);
        let matrices = light.matrices(10.0);
        assert_eq!(matrices.views.len(), 6);
        assert_eq!(matrices.far_plane, 25.0);
    }

    #[test]
    fn test_directional_light_single_view() {
        let mut light = Light::directional(Vec3::new(0.2, -1.0, 0.1), Vec3::ONE, 3.0);
        let matrices = light.matrices(20.0);
        assert_eq!(matrices.views.len(), 1);
    }

    #[test]
    fn test_unshadowed_light_reports_negative_slot() {
        let mut light = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0);
        let data = light.to_gpu_data(10.0, -1);
        assert_eq!(data.shadow.x, -1.0);
        assert_eq!(data.direction.w, 0.0);
    }
}
