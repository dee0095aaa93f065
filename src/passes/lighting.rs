//! Deferred lighting resolve.
//!
//! A single full-screen-triangle draw combines the G-buffer, the shadow
//! maps and the light list into a lit HDR color target. Lights live in a
//! structured buffer (`4×u32` header + packed light array) that is resized
//! only when the light count changes and updated in place otherwise.
//!
//! Directional and point shadow maps are bound as two separate
//! variable-count descriptor sets, grown per frame ring slot only when the
//! required count exceeds what that slot already has, and never shrunk, which
//! amortizes reallocation.

use std::path::Path;

use ash::vk;

use crate::context::Context;
use crate::descriptors::{DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter};
use crate::error::RenderResult;
use crate::pipelines::{load_shader_module, GraphicsPipeline, GraphicsPipelineBuilder};
use crate::resources::{Buffer, Image, Sampler};
use crate::scene::{
    light_buffer_size, CameraData, GpuLightData, LightItem, LightKind, LightingCameraUniform,
};

use super::{color_attachment, render_area, set_viewport_scissor};
use super::geometry::GeometryPass;

/// HDR color target format.
pub const HDR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Capacity cap of each shadow-map descriptor array.
const MAX_SHADOWED_LIGHTS: u32 = 64;

/// The deferred lighting pass.
pub struct LightingPass {
    pipeline: GraphicsPipeline,
    camera_layout: DescriptorSetLayout,
    light_layout: DescriptorSetLayout,
    shadow_layout: DescriptorSetLayout,
    gbuffer_layout: DescriptorSetLayout,
    camera_buffers: Vec<Buffer>,
    camera_sets: Vec<vk::DescriptorSet>,
    light_buffers: Vec<Buffer>,
    light_counts: Vec<usize>,
    light_sets: Vec<vk::DescriptorSet>,
    dir_shadow_sets: Vec<vk::DescriptorSet>,
    dir_capacity: Vec<u32>,
    point_shadow_sets: Vec<vk::DescriptorSet>,
    point_capacity: Vec<u32>,
    gbuffer_sets: Vec<vk::DescriptorSet>,
    hdr_targets: Vec<Image>,
    /// Compare sampler for directional shadow lookups.
    shadow_compare_sampler: Sampler,
    /// Plain sampler for point cube shadows (manual depth compare).
    shadow_cube_sampler: Sampler,
    gbuffer_sampler: Sampler,
    environment_sampler: Sampler,
    /// 1x1 black cubemap bound while no environment is loaded.
    fallback_cubemap: Image,
}

impl LightingPass {
    /// Create the pipeline, layouts, per-frame buffers and HDR targets.
    pub fn new(
        context: &Context,
        shader_dir: &str,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let camera_layout = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(&context.device)?;

        let light_layout = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(&context.device)?;

        // One layout serves both the directional and point arrays; they are
        // separate sets with separately grown counts.
        let shadow_layout = DescriptorSetLayoutBuilder::new()
            .variable_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                MAX_SHADOWED_LIGHTS,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(&context.device)?;

        let gbuffer_layout = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .binding(
                2,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .binding(
                3,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .binding(
                4,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .binding(
                5,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(&context.device)?;

        let fullscreen_vertex =
            load_shader_module(context, Path::new(shader_dir).join("fullscreen.vert.spv"))?;
        let lighting_fragment =
            load_shader_module(context, Path::new(shader_dir).join("lighting.frag.spv"))?;

        let pipeline = GraphicsPipelineBuilder::new(fullscreen_vertex)
            .fragment_shader(lighting_fragment)
            .color_formats(&[HDR_FORMAT])
            .cull_mode(vk::CullModeFlags::NONE)
            .set_layouts(&[
                camera_layout.layout,
                light_layout.layout,
                shadow_layout.layout,
                shadow_layout.layout,
                gbuffer_layout.layout,
            ])
            .label("lighting pipeline")
            .build(context)?;

        unsafe {
            context.device.destroy_shader_module(fullscreen_vertex, None);
            context.device.destroy_shader_module(lighting_fragment, None);
        }

        let shadow_compare_sampler = Sampler::builder()
            .shadow()
            .label("directional shadow sampler")
            .build(context)?;
        let shadow_cube_sampler = Sampler::builder()
            .address_mode(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .label("point shadow sampler")
            .build(context)?;
        let gbuffer_sampler = Sampler::builder()
            .nearest()
            .address_mode(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .label("gbuffer sampler")
            .build(context)?;
        let environment_sampler = Sampler::builder()
            .address_mode(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .label("environment fallback sampler")
            .build(context)?;

        // Black 1x1 cubemap keeps binding 5 valid until an environment is
        // baked. 6 layers of one RGBA16F texel.
        let black = [0u8; 8 * 6];
        let fallback_cubemap = Image::builder(
            vk::Extent2D {
                width: 1,
                height: 1,
            },
            vk::Format::R16G16B16A16_SFLOAT,
        )
        .usage(vk::ImageUsageFlags::SAMPLED)
        .cube()
        .initial_data(&black)
        .label("fallback environment")
        .build(context)?;

        let frames = context.frames_in_flight();
        let mut camera_buffers = Vec::with_capacity(frames);
        let mut camera_sets = Vec::with_capacity(frames);
        let mut light_buffers = Vec::with_capacity(frames);
        let mut light_sets = Vec::with_capacity(frames);
        let mut dir_shadow_sets = Vec::with_capacity(frames);
        let mut point_shadow_sets = Vec::with_capacity(frames);
        let mut hdr_targets = Vec::with_capacity(frames);

        let mut writer = DescriptorWriter::new();
        for frame in 0..frames {
            let camera_buffer = Buffer::builder(
                std::mem::size_of::<LightingCameraUniform>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )
            .host_visible()
            .label(format!("lighting camera ubo[{}]", frame))
            .build(context)?;

            let camera_set = context.descriptors.allocate(&context.device, &camera_layout)?;
            writer.write_buffer(
                camera_set,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                camera_buffer.buffer,
                0,
                std::mem::size_of::<LightingCameraUniform>() as vk::DeviceSize,
            );
            camera_buffers.push(camera_buffer);
            camera_sets.push(camera_set);

            // Start each slot with room for zero lights (header only); the
            // buffer is reallocated the first frame lights are submitted.
            let light_buffer = Buffer::builder(
                light_buffer_size(0),
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )
            .host_visible()
            .label(format!("light buffer[{}]", frame))
            .build(context)?;

            let light_set = context.descriptors.allocate(&context.device, &light_layout)?;
            writer.write_buffer(
                light_set,
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                light_buffer.buffer,
                0,
                vk::WHOLE_SIZE,
            );
            light_buffers.push(light_buffer);
            light_sets.push(light_set);

            // Shadow sets start at capacity 1; grown on demand, never shrunk.
            dir_shadow_sets.push(context.descriptors.allocate_variable(
                &context.device,
                &shadow_layout,
                1,
            )?);
            point_shadow_sets.push(context.descriptors.allocate_variable(
                &context.device,
                &shadow_layout,
                1,
            )?);

            hdr_targets.push(Self::create_hdr_target(context, extent, frame)?);
        }
        writer.update(&context.device);

        let gbuffer_sets = (0..frames)
            .map(|_| context.descriptors.allocate(&context.device, &gbuffer_layout))
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            pipeline,
            camera_layout,
            light_layout,
            shadow_layout,
            gbuffer_layout,
            camera_buffers,
            camera_sets,
            light_buffers,
            light_counts: vec![0; frames],
            light_sets,
            dir_shadow_sets,
            dir_capacity: vec![1; frames],
            point_shadow_sets,
            point_capacity: vec![1; frames],
            gbuffer_sets,
            hdr_targets,
            shadow_compare_sampler,
            shadow_cube_sampler,
            gbuffer_sampler,
            environment_sampler,
            fallback_cubemap,
        })
    }

    fn create_hdr_target(
        context: &Context,
        extent: vk::Extent2D,
        frame: usize,
    ) -> RenderResult<Image> {
        Image::builder(extent, HDR_FORMAT)
            .usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::STORAGE,
            )
            .label(format!("hdr color[{}]", frame))
            .build(context)
    }

    /// HDR target for a frame ring slot.
    pub fn hdr_target(&self, frame: usize) -> &Image {
        &self.hdr_targets[frame]
    }

    /// Mutable HDR target (the blit pass transitions it).
    pub fn hdr_target_mut(&mut self, frame: usize) -> &mut Image {
        &mut self.hdr_targets[frame]
    }

    /// Number of directional shadow descriptors slot `frame` can hold.
    pub fn dir_shadow_capacity(&self, frame: usize) -> u32 {
        self.dir_capacity[frame]
    }

    /// Move size-dependent HDR targets out for deferred teardown on resize.
    pub fn take_hdr_targets(&mut self) -> Vec<Image> {
        std::mem::take(&mut self.hdr_targets)
    }

    /// Recreate HDR targets after a swapchain resize.
    pub fn resize(&mut self, context: &Context, extent: vk::Extent2D) -> RenderResult<()> {
        debug_assert!(self.hdr_targets.is_empty(), "take_hdr_targets before resize");
        self.hdr_targets = (0..context.frames_in_flight())
            .map(|frame| Self::create_hdr_target(context, extent, frame))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(())
    }

    /// Point the per-frame G-buffer sets at the geometry pass targets and
    /// the environment binding at the fallback cubemap. Called at init and
    /// after every resize.
    pub fn write_gbuffer_sets(&mut self, context: &Context, geometry: &GeometryPass) {
        let mut writer = DescriptorWriter::new();
        for frame in 0..context.frames_in_flight() {
            let targets = geometry.targets(frame);
            let set = self.gbuffer_sets[frame];
            for (binding, view) in [
                (0, targets.albedo.view),
                (1, targets.normal.view),
                (2, targets.position.view),
                (3, targets.material.view),
                (4, targets.depth.view),
            ] {
                writer.write_image(
                    set,
                    binding,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    view,
                    self.gbuffer_sampler.sampler,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
            writer.write_image(
                set,
                5,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                self.fallback_cubemap.view,
                self.environment_sampler.sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        }
        writer.update(&context.device);
    }

    /// Bind a baked environment cubemap for ambient lighting.
    pub fn set_environment(&mut self, context: &Context, view: vk::ImageView, sampler: vk::Sampler) {
        let mut writer = DescriptorWriter::new();
        for frame in 0..context.frames_in_flight() {
            writer.write_image(
                self.gbuffer_sets[frame],
                5,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                view,
                sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        }
        writer.update(&context.device);
    }

    /// Update the camera uniform, light buffer and shadow descriptor arrays
    /// for this frame. Returns the number of lights written.
    ///
    /// Shadow slots are assigned in submission order, separately for the
    /// directional and point arrays; lights whose shadow-map ring does not
    /// exist yet get slot -1 and shade unshadowed.
    pub fn update_frame(
        &mut self,
        context: &Context,
        frame: usize,
        camera: &CameraData,
        lights: &[LightItem],
        scene_radius: f32,
    ) -> RenderResult<usize> {
        let camera_uniform = LightingCameraUniform::from_data(camera);
        self.camera_buffers[frame].write(&camera_uniform, 0)?;

        let mut packed: Vec<GpuLightData> = Vec::with_capacity(lights.len());
        let mut dir_views: Vec<vk::ImageView> = Vec::new();
        let mut point_views: Vec<vk::ImageView> = Vec::new();

        for item in lights {
            let mut light = item.light.lock();
            let kind = light.kind();
            let shadow_index = match light.shadow_map(frame) {
                Some(map) => match kind {
                    LightKind::Directional => {
                        dir_views.push(map.view);
                        (dir_views.len() - 1) as i32
                    }
                    LightKind::Point => {
                        point_views.push(map.view);
                        (point_views.len() - 1) as i32
                    }
                },
                // Ring not created yet: unshadowed for this frame.
                None => -1,
            };
            packed.push(light.to_gpu_data(scene_radius, shadow_index));
        }

        self.upload_lights(context, frame, &packed)?;
        self.update_shadow_sets(context, frame, &dir_views, &point_views)?;

        Ok(packed.len())
    }

    /// Write the light SSBO, reallocating only when the count changed.
    fn upload_lights(
        &mut self,
        context: &Context,
        frame: usize,
        lights: &[GpuLightData],
    ) -> RenderResult<()> {
        if lights.len() != self.light_counts[frame] {
            // The fence wait at frame start guarantees this slot's previous
            // submission finished, so the old buffer can be destroyed now
            // and its descriptor slot rewritten.
            self.light_buffers[frame].destroy(context);
            self.light_buffers[frame] = Buffer::builder(
                light_buffer_size(lights.len()),
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )
            .host_visible()
            .label(format!("light buffer[{}]", frame))
            .build(context)?;
            self.light_counts[frame] = lights.len();

            let mut writer = DescriptorWriter::new();
            writer.write_buffer(
                self.light_sets[frame],
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                self.light_buffers[frame].buffer,
                0,
                vk::WHOLE_SIZE,
            );
            writer.update(&context.device);
            log::debug!(
                "Reallocated light buffer[{}] for {} lights",
                frame,
                lights.len()
            );
        }

        // Common case: count stable, in-place update of the mapped buffer.
        let header = [lights.len() as u32, 0, 0, 0];
        let buffer = &mut self.light_buffers[frame];
        buffer.write_bytes(bytemuck::cast_slice(&header), 0)?;
        if !lights.is_empty() {
            buffer.write_bytes(bytemuck::cast_slice(lights), 16)?;
        }
        Ok(())
    }

    /// Grow (never shrink) and rewrite the two shadow descriptor arrays.
    fn update_shadow_sets(
        &mut self,
        context: &Context,
        frame: usize,
        dir_views: &[vk::ImageView],
        point_views: &[vk::ImageView],
    ) -> RenderResult<()> {
        let needed_dir = (dir_views.len() as u32).max(1);
        if needed_dir > self.dir_capacity[frame] {
            context
                .descriptors
                .free(&context.device, self.dir_shadow_sets[frame]);
            self.dir_shadow_sets[frame] = context.descriptors.allocate_variable(
                &context.device,
                &self.shadow_layout,
                needed_dir,
            )?;
            self.dir_capacity[frame] = needed_dir;
        }

        let needed_point = (point_views.len() as u32).max(1);
        if needed_point > self.point_capacity[frame] {
            context
                .descriptors
                .free(&context.device, self.point_shadow_sets[frame]);
            self.point_shadow_sets[frame] = context.descriptors.allocate_variable(
                &context.device,
                &self.shadow_layout,
                needed_point,
            )?;
            self.point_capacity[frame] = needed_point;
        }

        let mut writer = DescriptorWriter::new();
        writer.write_image_array(
            self.dir_shadow_sets[frame],
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            0,
            dir_views,
            self.shadow_compare_sampler.sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        writer.write_image_array(
            self.point_shadow_sets[frame],
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            0,
            point_views,
            self.shadow_cube_sampler.sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        writer.update(&context.device);
        Ok(())
    }

    /// Record the full-screen lighting resolve into the HDR target.
    pub fn record(&mut self, context: &Context, cmd: vk::CommandBuffer, frame: usize) {
        let device = &context.device;
        context
            .markers
            .begin_region(cmd, "lighting pass", [0.8, 0.6, 0.1, 1.0]);

        let hdr = &mut self.hdr_targets[frame];
        let extent = hdr.extent;
        hdr.forget_contents();
        hdr.transition_layout(device, cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let color = [color_attachment(
            hdr.view,
            vk::AttachmentLoadOp::CLEAR,
            [0.0, 0.0, 0.0, 1.0],
        )];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area(extent))
            .layer_count(1)
            .color_attachments(&color);

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[
                    self.camera_sets[frame],
                    self.light_sets[frame],
                    self.dir_shadow_sets[frame],
                    self.point_shadow_sets[frame],
                    self.gbuffer_sets[frame],
                ],
                &[],
            );
        }
        set_viewport_scissor(device, cmd, extent);

        unsafe {
            // Full-screen triangle, no vertex or index buffers.
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_rendering(cmd);
        }

        // The tone-map samples the HDR image next.
        let hdr = &mut self.hdr_targets[frame];
        hdr.transition_layout(device, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        context.markers.end_region(cmd);
    }

    /// Destroy everything the pass owns.
    pub fn destroy(&mut self, context: &Context) {
        for mut hdr in self.hdr_targets.drain(..) {
            hdr.destroy(context);
        }
        for mut buffer in self.camera_buffers.drain(..) {
            buffer.destroy(context);
        }
        for mut buffer in self.light_buffers.drain(..) {
            buffer.destroy(context);
        }
        for set in self
            .camera_sets
            .drain(..)
            .chain(self.light_sets.drain(..))
            .chain(self.dir_shadow_sets.drain(..))
            .chain(self.point_shadow_sets.drain(..))
            .chain(self.gbuffer_sets.drain(..))
        {
            context.descriptors.free(&context.device, set);
        }
        self.fallback_cubemap.destroy(context);
        self.shadow_compare_sampler.destroy(context);
        self.shadow_cube_sampler.destroy(context);
        self.gbuffer_sampler.destroy(context);
        self.environment_sampler.destroy(context);
        self.pipeline.destroy(context);
        self.camera_layout.destroy(&context.device);
        self.light_layout.destroy(&context.device);
        self.shadow_layout.destroy(&context.device);
        self.gbuffer_layout.destroy(&context.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_buffer_header_is_four_words() {
        // Header layout: count + 3 padding words, then the light array.
        assert_eq!(light_buffer_size(0), 16);
        assert_eq!(
            light_buffer_size(3) - light_buffer_size(0),
            3 * std::mem::size_of::<GpuLightData>() as u64
        );
    }
}
