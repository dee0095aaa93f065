//! Camera and the GPU-visible uniform structs it feeds.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Auto-exposure parameters, part of the camera snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ExposureSettings {
    /// Lower bound of the luminance histogram in log2 space.
    pub min_log_luminance: f32,
    /// Width of the histogram range in log2 space.
    pub log_luminance_range: f32,
    /// Eye-adaptation time constant; higher adapts faster.
    pub adaptation_speed: f32,
    /// Manual exposure compensation in stops, applied after adaptation.
    pub compensation: f32,
}

impl Default for ExposureSettings {
    fn default() -> Self {
        Self {
            min_log_luminance: -8.0,
            log_luminance_range: 12.0,
            adaptation_speed: 1.1,
            compensation: 0.0,
        }
    }
}

/// A perspective camera owned by the application.
///
/// The renderer holds the active camera so it can update the aspect ratio
/// when the swapchain is recreated; everything else is application state.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub aspect: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub exposure: ExposureSettings,
}

impl Camera {
    /// Create a camera looking at `target` from `position`.
    pub fn new(position: Vec3, target: Vec3, aspect: f32) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y_radians: 60f32.to_radians(),
            aspect,
            z_near: 0.1,
            z_far: 500.0,
            exposure: ExposureSettings::default(),
        }
    }

    /// View matrix.
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Projection matrix with the Vulkan Y flip applied.
    pub fn proj(&self) -> Mat4 {
        let mut proj =
            Mat4::perspective_rh(self.fov_y_radians, self.aspect, self.z_near, self.z_far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Update the aspect ratio after a swapchain resize.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Snapshot the camera for this frame.
    pub fn data(&self) -> CameraData {
        CameraData {
            view: self.view(),
            proj: self.proj(),
            position: self.position,
            exposure: self.exposure,
        }
    }
}

/// Per-frame camera snapshot consumed by the renderer.
#[derive(Debug, Clone, Copy)]
pub struct CameraData {
    pub view: Mat4,
    pub proj: Mat4,
    pub position: Vec3,
    pub exposure: ExposureSettings,
}

/// Vertex-stage camera uniform for the geometry and depth pre-passes.
///
/// Must match the shader's binding 0 block byte-exactly, including the
/// 16-byte column alignment `Mat4` already satisfies.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub proj: Mat4,
}

impl CameraMatrices {
    pub fn from_data(data: &CameraData) -> Self {
        Self {
            view: data.view,
            proj: data.proj,
        }
    }
}

/// Extended camera uniform for the lighting pass, which also reconstructs
/// world positions and view rays.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightingCameraUniform {
    pub view: Mat4,
    pub proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
    pub position: Vec4,
}

impl LightingCameraUniform {
    pub fn from_data(data: &CameraData) -> Self {
        Self {
            view: data.view,
            proj: data.proj,
            inv_view: data.view.inverse(),
            inv_proj: data.proj.inverse(),
            position: data.position.extend(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_match_shader_layout() {
        // Shader-side: two column-major mat4s, no padding.
        assert_eq!(std::mem::size_of::<CameraMatrices>(), 128);
        // Four mat4s plus one vec4.
        assert_eq!(std::mem::size_of::<LightingCameraUniform>(), 4 * 64 + 16);
        assert_eq!(std::mem::align_of::<CameraMatrices>(), 16);
    }

    #[test]
    fn test_default_exposure_histogram_bounds() {
        let exposure = ExposureSettings::default();
        assert_eq!(exposure.min_log_luminance, -8.0);
        assert_eq!(exposure.log_luminance_range, 12.0);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::new(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, 16.0 / 9.0);
        let proj = camera.proj();
        assert!(proj.y_axis.y < 0.0);
    }
}
