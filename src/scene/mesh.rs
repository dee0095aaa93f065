//! Meshes, materials, and the vertex layout shared by the depth, shadow and
//! geometry pipelines.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

use crate::context::Context;
use crate::error::RenderResult;
use crate::resources::Buffer;

/// Interleaved vertex format.
///
/// Matches the vertex shader input block byte-exactly; the attribute table
/// below is the single source of truth for both pipeline creation and the
/// shader interface.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    /// Vertex input binding for a single interleaved buffer.
    pub fn input_bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Vertex attribute descriptions: position, normal, uv, tangent.
    pub fn input_attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 24,
            },
            vk::VertexInputAttributeDescription {
                location: 3,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 32,
            },
        ]
    }
}

/// A contiguous index range within a mesh, drawn with one material.
#[derive(Debug, Clone)]
pub struct SubMesh {
    /// First index.
    pub index_offset: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Index into the model's material list.
    pub material_index: usize,
    /// Alpha-tested geometry: drawn with the same opaque pipeline, the
    /// cutoff happens in-shader. Never blended.
    pub alpha_tested: bool,
}

/// Material parameters plus stable bindless texture slots.
///
/// Texture slots come from the registry's index allocator at load time and
/// never change afterwards, so push constants recorded in any draw order
/// stay valid.
#[derive(Debug, Clone)]
pub struct Material {
    pub base_color: Vec4,
    pub roughness: f32,
    pub metallic: f32,
    /// Bindless slot of the albedo texture, or `None` for untextured.
    pub albedo_texture: Option<u32>,
    /// Bindless slot of the roughness+metallic texture.
    pub rough_metal_texture: Option<u32>,
    /// Alpha cutoff for alpha-tested submeshes.
    pub alpha_cutoff: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            roughness: 0.5,
            metallic: 0.0,
            albedo_texture: None,
            rough_metal_texture: None,
            alpha_cutoff: 0.5,
        }
    }
}

/// GPU-resident mesh: one vertex buffer, one index buffer, submesh ranges.
pub struct Mesh {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub submeshes: Vec<SubMesh>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl Mesh {
    /// Upload vertices and indices into device-local buffers.
    pub fn new(
        context: &Context,
        vertices: &[Vertex],
        indices: &[u32],
        submeshes: Vec<SubMesh>,
        label: &str,
    ) -> RenderResult<Self> {
        let vertex_buffer = Buffer::builder(
            std::mem::size_of_val(vertices) as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )
        .label(format!("{} vertices", label))
        .build_with_data(context, bytemuck::cast_slice(vertices))?;

        let index_buffer = Buffer::builder(
            std::mem::size_of_val(indices) as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )
        .label(format!("{} indices", label))
        .build_with_data(context, bytemuck::cast_slice(indices))?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            submeshes,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    /// Destroy GPU buffers.
    pub fn destroy(&mut self, context: &Context) {
        self.vertex_buffer.destroy(context);
        self.index_buffer.destroy(context);
    }
}

/// A mesh plus its materials.
pub struct Model {
    pub mesh: Mesh,
    pub materials: Vec<Material>,
}

impl Model {
    /// Create a single-material model covering all indices.
    pub fn with_single_material(
        context: &Context,
        vertices: &[Vertex],
        indices: &[u32],
        material: Material,
        label: &str,
    ) -> RenderResult<Self> {
        let submeshes = vec![SubMesh {
            index_offset: 0,
            index_count: indices.len() as u32,
            material_index: 0,
            alpha_tested: false,
        }];
        let mesh = Mesh::new(context, vertices, indices, submeshes, label)?;
        Ok(Self {
            mesh,
            materials: vec![material],
        })
    }

    /// Destroy GPU buffers.
    pub fn destroy(&mut self, context: &Context) {
        self.mesh.destroy(context);
    }
}

/// CPU-side geometry for a Y-up ground plane centered at the origin.
pub fn plane_mesh_data(half_extent: f32) -> (Vec<Vertex>, Vec<u32>) {
    let uv_scale = half_extent;
    let vertices = vec![
        Vertex {
            position: Vec3::new(-half_extent, 0.0, -half_extent),
            normal: Vec3::Y,
            uv: Vec2::new(0.0, 0.0),
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
        },
        Vertex {
            position: Vec3::new(half_extent, 0.0, -half_extent),
            normal: Vec3::Y,
            uv: Vec2::new(uv_scale, 0.0),
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
        },
        Vertex {
            position: Vec3::new(half_extent, 0.0, half_extent),
            normal: Vec3::Y,
            uv: Vec2::new(uv_scale, uv_scale),
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
        },
        Vertex {
            position: Vec3::new(-half_extent, 0.0, half_extent),
            normal: Vec3::Y,
            uv: Vec2::new(0.0, uv_scale),
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
        },
    ];
    let indices = vec![0, 2, 1, 0, 3, 2];
    (vertices, indices)
}

/// CPU-side geometry for an axis-aligned cube centered at the origin.
pub fn cube_mesh_data(half_extent: f32) -> (Vec<Vertex>, Vec<u32>) {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, right, up) in faces {
        let base = vertices.len() as u32;
        let corners = [
            (-1.0f32, -1.0f32, 0.0f32, 1.0f32),
            (1.0, -1.0, 1.0, 1.0),
            (1.0, 1.0, 1.0, 0.0),
            (-1.0, 1.0, 0.0, 0.0),
        ];
        for (x, y, u, v) in corners {
            vertices.push(Vertex {
                position: (normal + right * x + up * y) * half_extent,
                normal,
                uv: Vec2::new(u, v),
                tangent: right.extend(1.0),
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);

        let attributes = Vertex::input_attributes();
        assert_eq!(attributes.len(), 4);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(attributes[3].offset, 32);

        let bindings = Vertex::input_bindings();
        assert_eq!(bindings[0].stride, 48);
    }

    #[test]
    fn test_plane_winding() {
        let (vertices, indices) = plane_mesh_data(5.0);
        assert_eq!(vertices.len(), 4);
        assert_eq!(indices.len(), 6);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn test_cube_face_count() {
        let (vertices, indices) = cube_mesh_data(1.0);
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        // Every face normal should be unit length.
        for v in &vertices {
            assert!((v.normal.length() - 1.0).abs() < 1e-6);
        }
    }
}
