//! Depth pre-pass and G-buffer generation.
//!
//! Rasterizes all opaque and alpha-tested geometry into four color targets
//! (albedo+opacity, world-space normal, world position, roughness+metallic)
//! plus depth. The depth pre-pass populates the depth buffer first, so the
//! G-buffer pass loads, not clears, depth.
//!
//! Textures are bindless: a single variable-count descriptor binding holds
//! every registered texture, so new textures can be appended as meshes
//! stream in without touching the pipeline. The set must be *reallocated*
//! whenever the registered count changes, since the variable descriptor
//! count is fixed at allocation time.

use std::path::Path;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::context::Context;
use crate::descriptors::{DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter};
use crate::error::RenderResult;
use crate::pipelines::{load_shader_module, GraphicsPipeline, GraphicsPipelineBuilder};
use crate::resources::{Buffer, Image};
use crate::scene::{
    CameraData, CameraMatrices, RenderItem, TextureRegistry, Vertex, MAX_BINDLESS_TEXTURES,
};

use super::{color_attachment, depth_attachment, render_area, set_viewport_scissor};

/// G-buffer color target formats, in attachment order.
pub const GBUFFER_ALBEDO_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const GBUFFER_NORMAL_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const GBUFFER_POSITION_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const GBUFFER_MATERIAL_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
/// Depth format shared by the pre-pass and the G-buffer pass.
pub const GBUFFER_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Fragment-stage push constants carrying material parameters and bindless
/// texture slots. Slots are stable registry indices assigned at load time.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialPush {
    pub base_color: Vec4,
    /// Bindless slot of the albedo texture, -1 for untextured.
    pub albedo_index: i32,
    /// Bindless slot of the roughness+metallic texture, -1 when absent.
    pub rough_metal_index: i32,
    pub roughness: f32,
    pub metallic: f32,
    /// Number of textures currently bound in the bindless array.
    pub texture_count: u32,
    /// Alpha cutoff; only applied for alpha-tested submeshes.
    pub alpha_cutoff: f32,
    pub _pad: [u32; 2],
}

/// Vertex-stage push constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ModelPush {
    model: Mat4,
}

/// One frame ring slot's G-buffer images.
pub struct GBufferTargets {
    pub albedo: Image,
    pub normal: Image,
    pub position: Image,
    pub material: Image,
    pub depth: Image,
}

impl GBufferTargets {
    fn new(context: &Context, extent: vk::Extent2D, frame: usize) -> RenderResult<Self> {
        let color_usage =
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        Ok(Self {
            albedo: Image::builder(extent, GBUFFER_ALBEDO_FORMAT)
                .usage(color_usage)
                .label(format!("gbuffer albedo[{}]", frame))
                .build(context)?,
            normal: Image::builder(extent, GBUFFER_NORMAL_FORMAT)
                .usage(color_usage)
                .label(format!("gbuffer normal[{}]", frame))
                .build(context)?,
            position: Image::builder(extent, GBUFFER_POSITION_FORMAT)
                .usage(color_usage)
                .label(format!("gbuffer position[{}]", frame))
                .build(context)?,
            material: Image::builder(extent, GBUFFER_MATERIAL_FORMAT)
                .usage(color_usage)
                .label(format!("gbuffer material[{}]", frame))
                .build(context)?,
            depth: Image::builder(extent, GBUFFER_DEPTH_FORMAT)
                .usage(
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                        | vk::ImageUsageFlags::SAMPLED,
                )
                .label(format!("gbuffer depth[{}]", frame))
                .build(context)?,
        })
    }

    /// Destroy all five images.
    pub fn destroy(&mut self, context: &Context) {
        self.albedo.destroy(context);
        self.normal.destroy(context);
        self.position.destroy(context);
        self.material.destroy(context);
        self.depth.destroy(context);
    }
}

/// The geometry pass (depth pre-pass + G-buffer).
pub struct GeometryPass {
    depth_pipeline: GraphicsPipeline,
    gbuffer_pipeline: GraphicsPipeline,
    uniform_layout: DescriptorSetLayout,
    texture_layout: DescriptorSetLayout,
    uniform_buffers: Vec<Buffer>,
    uniform_sets: Vec<vk::DescriptorSet>,
    /// The bindless texture set; reallocated when the registered count
    /// changes.
    texture_set: vk::DescriptorSet,
    /// Variable count the current set was allocated with.
    bound_texture_count: u32,
    targets: Vec<GBufferTargets>,
}

impl GeometryPass {
    /// Create pipelines, per-frame uniform buffers and the initial targets.
    pub fn new(
        context: &Context,
        shader_dir: &str,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let uniform_layout = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )
            .build(&context.device)?;

        let texture_layout = DescriptorSetLayoutBuilder::new()
            .variable_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                MAX_BINDLESS_TEXTURES,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(&context.device)?;

        let depth_vertex =
            load_shader_module(context, Path::new(shader_dir).join("depth.vert.spv"))?;
        let depth_pipeline = GraphicsPipelineBuilder::new(depth_vertex)
            .vertex_input(Vertex::input_bindings(), Vertex::input_attributes())
            .depth(GBUFFER_DEPTH_FORMAT, true)
            .set_layouts(&[uniform_layout.layout])
            .push_constants(
                vk::ShaderStageFlags::VERTEX,
                0,
                std::mem::size_of::<ModelPush>() as u32,
            )
            .label("depth pre-pass pipeline")
            .build(context)?;

        let geometry_vertex =
            load_shader_module(context, Path::new(shader_dir).join("geometry.vert.spv"))?;
        let geometry_fragment =
            load_shader_module(context, Path::new(shader_dir).join("geometry.frag.spv"))?;

        let gbuffer_pipeline = GraphicsPipelineBuilder::new(geometry_vertex)
            .fragment_shader(geometry_fragment)
            .vertex_input(Vertex::input_bindings(), Vertex::input_attributes())
            .color_formats(&[
                GBUFFER_ALBEDO_FORMAT,
                GBUFFER_NORMAL_FORMAT,
                GBUFFER_POSITION_FORMAT,
                GBUFFER_MATERIAL_FORMAT,
            ])
            .depth(GBUFFER_DEPTH_FORMAT, true)
            .set_layouts(&[uniform_layout.layout, texture_layout.layout])
            .push_constants(
                vk::ShaderStageFlags::VERTEX,
                0,
                std::mem::size_of::<ModelPush>() as u32,
            )
            .push_constants(
                vk::ShaderStageFlags::FRAGMENT,
                std::mem::size_of::<ModelPush>() as u32,
                std::mem::size_of::<MaterialPush>() as u32,
            )
            .label("gbuffer pipeline")
            .build(context)?;

        unsafe {
            context.device.destroy_shader_module(depth_vertex, None);
            context.device.destroy_shader_module(geometry_vertex, None);
            context
                .device
                .destroy_shader_module(geometry_fragment, None);
        }

        let mut uniform_buffers = Vec::new();
        let mut uniform_sets = Vec::new();
        let mut writer = DescriptorWriter::new();
        for frame in 0..context.frames_in_flight() {
            let buffer = Buffer::builder(
                std::mem::size_of::<CameraMatrices>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )
            .host_visible()
            .label(format!("geometry camera ubo[{}]", frame))
            .build(context)?;

            let set = context.descriptors.allocate(&context.device, &uniform_layout)?;
            writer.write_buffer(
                set,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                buffer.buffer,
                0,
                std::mem::size_of::<CameraMatrices>() as vk::DeviceSize,
            );

            uniform_buffers.push(buffer);
            uniform_sets.push(set);
        }
        writer.update(&context.device);

        let targets = (0..context.frames_in_flight())
            .map(|frame| GBufferTargets::new(context, extent, frame))
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            depth_pipeline,
            gbuffer_pipeline,
            uniform_layout,
            texture_layout,
            uniform_buffers,
            uniform_sets,
            texture_set: vk::DescriptorSet::null(),
            bound_texture_count: 0,
            targets,
        })
    }

    /// G-buffer targets for a frame ring slot.
    pub fn targets(&self, frame: usize) -> &GBufferTargets {
        &self.targets[frame]
    }

    /// Variable count the bindless set is currently allocated with.
    pub fn bound_texture_count(&self) -> u32 {
        self.bound_texture_count
    }

    /// Move the size-dependent targets out for deferred teardown on resize.
    pub fn take_targets(&mut self) -> Vec<GBufferTargets> {
        std::mem::take(&mut self.targets)
    }

    /// Recreate the size-dependent targets after a swapchain resize.
    pub fn resize(&mut self, context: &Context, extent: vk::Extent2D) -> RenderResult<()> {
        debug_assert!(self.targets.is_empty(), "take_targets before resize");
        self.targets = (0..context.frames_in_flight())
            .map(|frame| GBufferTargets::new(context, extent, frame))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(())
    }

    /// Rebuild the bindless texture set against the registry.
    ///
    /// Must be called whenever the scene's aggregate image set changes. The
    /// set is freed and reallocated because its variable descriptor count is
    /// fixed at allocation; every registered view is then written in
    /// ascending slot order. With an unchanged registry the call is a no-op,
    /// so repeated calls bind the identical view sequence.
    pub fn update_texture_descriptor(
        &mut self,
        context: &Context,
        registry: &TextureRegistry,
    ) -> RenderResult<()> {
        let count = registry.count();
        if !needs_reallocation(
            self.bound_texture_count,
            count,
            self.texture_set != vk::DescriptorSet::null(),
        ) {
            return Ok(());
        }

        if self.texture_set != vk::DescriptorSet::null() {
            context.descriptors.free(&context.device, self.texture_set);
        }

        // Variable count must be at least 1 even for an empty registry.
        let variable_count = count.max(1);
        self.texture_set = context.descriptors.allocate_variable(
            &context.device,
            &self.texture_layout,
            variable_count,
        )?;
        self.bound_texture_count = count;

        let views = registry.view_plan();
        let mut writer = DescriptorWriter::new();
        writer.write_image_array(
            self.texture_set,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            0,
            &views,
            registry.sampler(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        writer.update(&context.device);

        log::debug!(
            "Reallocated bindless texture set with {} descriptors",
            variable_count
        );
        Ok(())
    }

    /// Write this frame's camera matrices.
    pub fn update_uniforms(&mut self, frame: usize, camera: &CameraData) -> RenderResult<()> {
        let matrices = CameraMatrices::from_data(camera);
        self.uniform_buffers[frame].write(&matrices, 0)
    }

    /// Record the depth pre-pass.
    pub fn record_depth_prepass(
        &mut self,
        context: &Context,
        cmd: vk::CommandBuffer,
        frame: usize,
        items: &[RenderItem],
    ) {
        let device = &context.device;
        context
            .markers
            .begin_region(cmd, "depth pre-pass", [0.2, 0.2, 0.6, 1.0]);

        let targets = &mut self.targets[frame];
        let extent = targets.depth.extent;

        targets.depth.forget_contents();
        targets
            .depth
            .transition_layout(device, cmd, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);

        let depth = depth_attachment(targets.depth.view, vk::AttachmentLoadOp::CLEAR);
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area(extent))
            .layer_count(1)
            .depth_attachment(&depth);

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.depth_pipeline.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.depth_pipeline.layout,
                0,
                &[self.uniform_sets[frame]],
                &[],
            );
        }
        set_viewport_scissor(device, cmd, extent);

        for item in items {
            let mesh = &item.model.mesh;
            unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer.buffer], &[0]);
                device.cmd_bind_index_buffer(
                    cmd,
                    mesh.index_buffer.buffer,
                    0,
                    vk::IndexType::UINT32,
                );
            }

            let push = ModelPush {
                model: item.transform,
            };

            for submesh in &mesh.submeshes {
                if submesh.alpha_tested {
                    continue;
                }
                unsafe {
                    device.cmd_push_constants(
                        cmd,
                        self.depth_pipeline.layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::bytes_of(&push),
                    );
                    device.cmd_draw_indexed(
                        cmd,
                        submesh.index_count,
                        1,
                        submesh.index_offset,
                        0,
                        0,
                    );
                }
            }
        }

        unsafe {
            device.cmd_end_rendering(cmd);
        }
        context.markers.end_region(cmd);
    }

    /// Record the G-buffer pass, then hand every target to the lighting
    /// pass in `SHADER_READ_ONLY`.
    pub fn record(
        &mut self,
        context: &Context,
        cmd: vk::CommandBuffer,
        frame: usize,
        items: &[RenderItem],
    ) {
        let device = &context.device;
        context
            .markers
            .begin_region(cmd, "gbuffer pass", [0.2, 0.6, 0.2, 1.0]);

        let targets = &mut self.targets[frame];
        let extent = targets.albedo.extent;

        for image in [
            &mut targets.albedo,
            &mut targets.normal,
            &mut targets.position,
            &mut targets.material,
        ] {
            image.forget_contents();
            image.transition_layout(device, cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }

        let color_attachments = [
            color_attachment(
                targets.albedo.view,
                vk::AttachmentLoadOp::CLEAR,
                [0.0, 0.0, 0.0, 0.0],
            ),
            color_attachment(
                targets.normal.view,
                vk::AttachmentLoadOp::CLEAR,
                [0.0, 0.0, 0.0, 0.0],
            ),
            color_attachment(
                targets.position.view,
                vk::AttachmentLoadOp::CLEAR,
                [0.0, 0.0, 0.0, 0.0],
            ),
            color_attachment(
                targets.material.view,
                vk::AttachmentLoadOp::CLEAR,
                [0.0, 0.5, 0.0, 0.0],
            ),
        ];

        // Depth was populated by the pre-pass: load, do not clear.
        let depth = depth_attachment(targets.depth.view, vk::AttachmentLoadOp::LOAD);

        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area(extent))
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth);

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.gbuffer_pipeline.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.gbuffer_pipeline.layout,
                0,
                &[self.uniform_sets[frame], self.texture_set],
                &[],
            );
        }
        set_viewport_scissor(device, cmd, extent);

        // Opaque first, then alpha-tested with the same pipeline; the
        // cutoff happens in-shader, this pass never blends.
        self.draw_items(context, cmd, items, false);
        self.draw_items(context, cmd, items, true);

        unsafe {
            device.cmd_end_rendering(cmd);
        }

        let targets = &mut self.targets[frame];
        for image in [
            &mut targets.albedo,
            &mut targets.normal,
            &mut targets.position,
            &mut targets.material,
            &mut targets.depth,
        ] {
            image.transition_layout(device, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }

        context.markers.end_region(cmd);
    }

    fn draw_items(
        &self,
        context: &Context,
        cmd: vk::CommandBuffer,
        items: &[RenderItem],
        alpha_tested: bool,
    ) {
        let device = &context.device;
        for item in items {
            let mesh = &item.model.mesh;
            let materials = &item.model.materials;

            unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer.buffer], &[0]);
                device.cmd_bind_index_buffer(
                    cmd,
                    mesh.index_buffer.buffer,
                    0,
                    vk::IndexType::UINT32,
                );
            }

            let model_push = ModelPush {
                model: item.transform,
            };

            for submesh in &mesh.submeshes {
                if submesh.alpha_tested != alpha_tested {
                    continue;
                }
                let material = &materials[submesh.material_index];
                let material_push = MaterialPush {
                    base_color: material.base_color,
                    albedo_index: material
                        .albedo_texture
                        .map_or(-1, |slot| slot as i32),
                    rough_metal_index: material
                        .rough_metal_texture
                        .map_or(-1, |slot| slot as i32),
                    roughness: material.roughness,
                    metallic: material.metallic,
                    texture_count: self.bound_texture_count,
                    alpha_cutoff: if alpha_tested {
                        material.alpha_cutoff
                    } else {
                        0.0
                    },
                    _pad: [0; 2],
                };

                unsafe {
                    device.cmd_push_constants(
                        cmd,
                        self.gbuffer_pipeline.layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::bytes_of(&model_push),
                    );
                    device.cmd_push_constants(
                        cmd,
                        self.gbuffer_pipeline.layout,
                        vk::ShaderStageFlags::FRAGMENT,
                        std::mem::size_of::<ModelPush>() as u32,
                        bytemuck::bytes_of(&material_push),
                    );
                    device.cmd_draw_indexed(
                        cmd,
                        submesh.index_count,
                        1,
                        submesh.index_offset,
                        0,
                        0,
                    );
                }
            }
        }
    }

    /// Destroy pipelines, layouts, buffers, sets and targets.
    pub fn destroy(&mut self, context: &Context) {
        for mut targets in self.targets.drain(..) {
            targets.destroy(context);
        }
        for mut buffer in self.uniform_buffers.drain(..) {
            buffer.destroy(context);
        }
        for set in self.uniform_sets.drain(..) {
            context.descriptors.free(&context.device, set);
        }
        if self.texture_set != vk::DescriptorSet::null() {
            context.descriptors.free(&context.device, self.texture_set);
            self.texture_set = vk::DescriptorSet::null();
        }
        self.depth_pipeline.destroy(context);
        self.gbuffer_pipeline.destroy(context);
        self.uniform_layout.destroy(&context.device);
        self.texture_layout.destroy(&context.device);
    }
}

/// Whether the bindless set must be freed and reallocated.
///
/// True when no set exists yet or when the registered count differs from
/// the count the set was allocated with. The registry is append-only with
/// stable slots, so an unchanged count means an unchanged view sequence:
/// repeated update calls are then no-ops and the bound sequence is
/// identical to a single call's.
pub(crate) fn needs_reallocation(bound_count: u32, registered_count: u32, has_set: bool) -> bool {
    !has_set || bound_count != registered_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reallocation_only_on_count_change() {
        // First call always allocates.
        assert!(needs_reallocation(0, 0, false));
        // Unchanged set: idempotent.
        assert!(!needs_reallocation(10, 10, true));
        // Growth from 10 to 12 images forces a reallocation.
        assert!(needs_reallocation(10, 12, true));
    }

    #[test]
    fn test_material_push_layout() {
        // vec4 + 8 scalars, 16-byte aligned: must match the shader block.
        assert_eq!(std::mem::size_of::<MaterialPush>(), 48);
        assert_eq!(std::mem::align_of::<MaterialPush>(), 16);
    }

    #[test]
    fn test_push_constant_budget() {
        // Vertex model matrix + fragment material block must fit the
        // guaranteed 128-byte push constant minimum.
        let total = std::mem::size_of::<ModelPush>() + std::mem::size_of::<MaterialPush>();
        assert!(total <= 128, "push constants exceed 128 bytes: {}", total);
    }
}
