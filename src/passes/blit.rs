//! Tone-mapping and auto-exposure.
//!
//! Three sub-passes ping-ponged across frame ring slots:
//!
//! 1. **Tone-map (graphics)**: samples the HDR image, the *previous* ring
//!    slot's 1×1 average-luminance image and the exposure UBO, writes the
//!    final ACES-tone-mapped swapchain image.
//! 2. **Histogram (compute)**: reads the HDR image as a storage image and
//!    scatters a 256-bin log-luminance histogram into an SSBO.
//! 3. **Average (compute)**: reduces the histogram into *this* ring slot's
//!    average-luminance image, blending toward the previous slot's value
//!    for temporal eye adaptation.
//!
//! The luminance images form a ring with an intentional one-frame lag:
//! the compute for slot `N mod F` reads slot `(N-1) mod F` and writes slot
//! `N mod F`; the same slot is never both roles. That lag is what turns
//! per-frame exposure snaps into smooth adaptation.

use std::path::Path;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::context::Context;
use crate::descriptors::{DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter};
use crate::error::RenderResult;
use crate::pipelines::{
    load_shader_module, ComputePipeline, ComputePipelineBuilder, GraphicsPipeline,
    GraphicsPipelineBuilder,
};
use crate::resources::{Buffer, Image, Sampler};
use crate::scene::ExposureSettings;
use crate::sync::previous_slot;

use super::{color_attachment, render_area, set_viewport_scissor};
use super::lighting::LightingPass;

/// Number of histogram bins.
pub const HISTOGRAM_BINS: u32 = 256;

/// Histogram workgroup size in x and y.
const HISTOGRAM_WORKGROUP_SIZE: u32 = 16;

/// Push constants shared by both compute dispatches.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LuminancePush {
    /// Lower bound of the histogram in log2 luminance.
    pub min_log_luminance: f32,
    /// Width of the histogram range in log2 luminance.
    pub log_luminance_range: f32,
    /// Frame delta time, drives the adaptation blend.
    pub delta_seconds: f32,
    /// Total pixel count of the HDR image.
    pub pixel_count: u32,
}

/// Per-frame exposure uniform for the tone-map fragment stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ExposureUniform {
    compensation: f32,
    gamma: f32,
    _pad: [f32; 2],
}

/// The tone-mapping / auto-exposure pass.
pub struct BlitPass {
    tonemap_pipeline: GraphicsPipeline,
    histogram_pipeline: ComputePipeline,
    average_pipeline: ComputePipeline,
    tonemap_layout: DescriptorSetLayout,
    histogram_layout: DescriptorSetLayout,
    average_layout: DescriptorSetLayout,
    tonemap_sets: Vec<vk::DescriptorSet>,
    histogram_sets: Vec<vk::DescriptorSet>,
    average_sets: Vec<vk::DescriptorSet>,
    histogram_buffers: Vec<Buffer>,
    exposure_buffers: Vec<Buffer>,
    /// 1×1 R32F average-luminance ring, one per frame in flight.
    luminance_ring: Vec<Image>,
    sampler: Sampler,
    swapchain_format: vk::Format,
}

impl BlitPass {
    /// Create pipelines, the luminance ring and per-frame buffers.
    pub fn new(
        context: &Context,
        shader_dir: &str,
        swapchain_format: vk::Format,
    ) -> RenderResult<Self> {
        let tonemap_layout = DescriptorSetLayoutBuilder::new()
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
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(&context.device)?;

        let histogram_layout = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            )
            .binding(
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            )
            .build(&context.device)?;

        let average_layout = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            )
            .binding(
                1,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            )
            .binding(
                2,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            )
            .build(&context.device)?;

        let fullscreen_vertex =
            load_shader_module(context, Path::new(shader_dir).join("fullscreen.vert.spv"))?;
        let tonemap_fragment =
            load_shader_module(context, Path::new(shader_dir).join("tonemap.frag.spv"))?;

        let tonemap_pipeline = GraphicsPipelineBuilder::new(fullscreen_vertex)
            .fragment_shader(tonemap_fragment)
            .color_formats(&[swapchain_format])
            .cull_mode(vk::CullModeFlags::NONE)
            .set_layouts(&[tonemap_layout.layout])
            .label("tonemap pipeline")
            .build(context)?;

        let histogram_shader = load_shader_module(
            context,
            Path::new(shader_dir).join("luminance_histogram.comp.spv"),
        )?;
        let histogram_pipeline = ComputePipelineBuilder::new(histogram_shader)
            .set_layouts(&[histogram_layout.layout])
            .push_constants(std::mem::size_of::<LuminancePush>() as u32)
            .label("luminance histogram")
            .build(context)?;

        let average_shader = load_shader_module(
            context,
            Path::new(shader_dir).join("luminance_average.comp.spv"),
        )?;
        let average_pipeline = ComputePipelineBuilder::new(average_shader)
            .set_layouts(&[average_layout.layout])
            .push_constants(std::mem::size_of::<LuminancePush>() as u32)
            .label("luminance average")
            .build(context)?;

        unsafe {
            context.device.destroy_shader_module(fullscreen_vertex, None);
            context.device.destroy_shader_module(tonemap_fragment, None);
            context.device.destroy_shader_module(histogram_shader, None);
            context.device.destroy_shader_module(average_shader, None);
        }

        let sampler = Sampler::builder()
            .address_mode(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .label("blit sampler")
            .build(context)?;

        let frames = context.frames_in_flight();
        let mut histogram_buffers = Vec::with_capacity(frames);
        let mut exposure_buffers = Vec::with_capacity(frames);
        let mut luminance_ring = Vec::with_capacity(frames);

        for frame in 0..frames {
            histogram_buffers.push(
                Buffer::builder(
                    (HISTOGRAM_BINS as usize * std::mem::size_of::<u32>()) as vk::DeviceSize,
                    vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                )
                .label(format!("luminance histogram[{}]", frame))
                .build(context)?,
            );

            exposure_buffers.push(
                Buffer::builder(
                    std::mem::size_of::<ExposureUniform>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )
                .host_visible()
                .label(format!("exposure ubo[{}]", frame))
                .build(context)?,
            );

            luminance_ring.push(
                Image::builder(
                    vk::Extent2D {
                        width: 1,
                        height: 1,
                    },
                    vk::Format::R32_SFLOAT,
                )
                .usage(
                    vk::ImageUsageFlags::STORAGE
                        | vk::ImageUsageFlags::SAMPLED
                        | vk::ImageUsageFlags::TRANSFER_DST,
                )
                .label(format!("average luminance[{}]", frame))
                .build(context)?,
            );
        }

        // Seed the ring with mid-gray so the first frames do not adapt from
        // garbage, and leave every slot in GENERAL for the compute passes.
        crate::commands::submit_one_time(context, "luminance ring init", |cmd| {
            for image in &mut luminance_ring {
                image.transition_layout(
                    &context.device,
                    cmd,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                let clear = vk::ClearColorValue {
                    float32: [0.5, 0.0, 0.0, 0.0],
                };
                unsafe {
                    context.device.cmd_clear_color_image(
                        cmd,
                        image.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &clear,
                        &[vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        }],
                    );
                }
                image.transition_layout(&context.device, cmd, vk::ImageLayout::GENERAL);
            }
            Ok(())
        })?;

        let tonemap_sets = (0..frames)
            .map(|_| context.descriptors.allocate(&context.device, &tonemap_layout))
            .collect::<RenderResult<Vec<_>>>()?;
        let histogram_sets = (0..frames)
            .map(|_| context.descriptors.allocate(&context.device, &histogram_layout))
            .collect::<RenderResult<Vec<_>>>()?;
        let average_sets = (0..frames)
            .map(|_| context.descriptors.allocate(&context.device, &average_layout))
            .collect::<RenderResult<Vec<_>>>()?;

        let mut pass = Self {
            tonemap_pipeline,
            histogram_pipeline,
            average_pipeline,
            tonemap_layout,
            histogram_layout,
            average_layout,
            tonemap_sets,
            histogram_sets,
            average_sets,
            histogram_buffers,
            exposure_buffers,
            luminance_ring,
            sampler,
            swapchain_format,
        };
        pass.write_static_bindings(context);
        Ok(pass)
    }

    /// Swapchain format the tone-map pipeline targets.
    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain_format
    }

    /// Write the bindings that never change: histogram buffers, exposure
    /// UBOs, and the luminance ring (current + previous slots).
    fn write_static_bindings(&mut self, context: &Context) {
        let frames = context.frames_in_flight();
        let mut writer = DescriptorWriter::new();
        for frame in 0..frames {
            let previous = previous_slot(frame, frames);

            // Tone-map reads the PREVIOUS slot's average: this frame's
            // value is computed after the tone-map draw in the command
            // stream.
            writer.write_image(
                self.tonemap_sets[frame],
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                self.luminance_ring[previous].view,
                self.sampler.sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
            writer.write_buffer(
                self.tonemap_sets[frame],
                2,
                vk::DescriptorType::UNIFORM_BUFFER,
                self.exposure_buffers[frame].buffer,
                0,
                std::mem::size_of::<ExposureUniform>() as vk::DeviceSize,
            );

            writer.write_buffer(
                self.histogram_sets[frame],
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                self.histogram_buffers[frame].buffer,
                0,
                vk::WHOLE_SIZE,
            );

            writer.write_buffer(
                self.average_sets[frame],
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                self.histogram_buffers[frame].buffer,
                0,
                vk::WHOLE_SIZE,
            );
            writer.write_image(
                self.average_sets[frame],
                1,
                vk::DescriptorType::STORAGE_IMAGE,
                self.luminance_ring[frame].view,
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
            );
            writer.write_image(
                self.average_sets[frame],
                2,
                vk::DescriptorType::STORAGE_IMAGE,
                self.luminance_ring[previous].view,
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
            );
        }
        writer.update(&context.device);
    }

    /// Point the HDR bindings at the lighting pass targets. Called at init
    /// and after every resize (the HDR images are size-dependent).
    pub fn write_hdr_bindings(&mut self, context: &Context, lighting: &LightingPass) {
        let mut writer = DescriptorWriter::new();
        for frame in 0..context.frames_in_flight() {
            let hdr = lighting.hdr_target(frame);
            writer.write_image(
                self.tonemap_sets[frame],
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                hdr.view,
                self.sampler.sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
            writer.write_image(
                self.histogram_sets[frame],
                0,
                vk::DescriptorType::STORAGE_IMAGE,
                hdr.view,
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
            );
        }
        writer.update(&context.device);
    }

    /// Write this frame's exposure uniform.
    pub fn update_exposure(
        &mut self,
        frame: usize,
        settings: &ExposureSettings,
    ) -> RenderResult<()> {
        let uniform = ExposureUniform {
            compensation: settings.compensation,
            gamma: 2.2,
            _pad: [0.0; 2],
        };
        self.exposure_buffers[frame].write(&uniform, 0)
    }

    /// Record the tone-map draw into the swapchain image.
    ///
    /// The swapchain image must already be in `COLOR_ATTACHMENT_OPTIMAL`.
    pub fn record_tonemap(
        &mut self,
        context: &Context,
        cmd: vk::CommandBuffer,
        frame: usize,
        swapchain_view: vk::ImageView,
        extent: vk::Extent2D,
    ) {
        let device = &context.device;
        context
            .markers
            .begin_region(cmd, "tonemap pass", [0.6, 0.2, 0.6, 1.0]);

        // The previous slot's average was left in GENERAL by its compute
        // pass; sample it read-only here.
        let previous = previous_slot(frame, context.frames_in_flight());
        self.luminance_ring[previous].transition_layout(
            device,
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        let color = [color_attachment(
            swapchain_view,
            vk::AttachmentLoadOp::DONT_CARE,
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
                self.tonemap_pipeline.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.tonemap_pipeline.layout,
                0,
                &[self.tonemap_sets[frame]],
                &[],
            );
        }
        set_viewport_scissor(device, cmd, extent);
        unsafe {
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_rendering(cmd);
        }

        context.markers.end_region(cmd);
    }

    /// Record the histogram + average dispatches for this frame's slot.
    ///
    /// Reads the HDR image and the previous slot's average, writes this
    /// slot's average for the next frame's tone-map.
    pub fn record_compute(
        &mut self,
        context: &Context,
        cmd: vk::CommandBuffer,
        frame: usize,
        hdr: &mut Image,
        settings: &ExposureSettings,
        delta_seconds: f32,
    ) {
        let device = &context.device;
        context
            .markers
            .begin_region(cmd, "auto exposure", [0.1, 0.5, 0.8, 1.0]);

        let previous = previous_slot(frame, context.frames_in_flight());
        debug_assert_ne!(frame, previous);

        // HDR was sampled by the tone-map; the histogram reads it as a
        // storage image.
        hdr.transition_layout(device, cmd, vk::ImageLayout::GENERAL);

        // Write target to GENERAL, and the previous-frame read target back
        // to GENERAL as well: same layout, different access scope.
        self.luminance_ring[frame].transition_layout(device, cmd, vk::ImageLayout::GENERAL);
        self.luminance_ring[previous].transition_layout(device, cmd, vk::ImageLayout::GENERAL);

        let push = LuminancePush {
            min_log_luminance: settings.min_log_luminance,
            log_luminance_range: settings.log_luminance_range,
            delta_seconds: delta_seconds * settings.adaptation_speed,
            pixel_count: hdr.extent.width * hdr.extent.height,
        };

        // Zero the histogram bins, then make the clear visible to compute.
        unsafe {
            device.cmd_fill_buffer(cmd, self.histogram_buffers[frame].buffer, 0, vk::WHOLE_SIZE, 0);
        }
        let fill_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.histogram_buffers[frame].buffer)
            .size(vk::WHOLE_SIZE);
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[fill_barrier],
                &[],
            );
        }

        // Compute 1: scatter the log-luminance histogram.
        unsafe {
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.histogram_pipeline.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.histogram_pipeline.layout,
                0,
                &[self.histogram_sets[frame]],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                self.histogram_pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push),
            );
            device.cmd_dispatch(
                cmd,
                hdr.extent.width.div_ceil(HISTOGRAM_WORKGROUP_SIZE),
                hdr.extent.height.div_ceil(HISTOGRAM_WORKGROUP_SIZE),
                1,
            );
        }

        // Histogram results must be visible to the reduction.
        let histogram_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.histogram_buffers[frame].buffer)
            .size(vk::WHOLE_SIZE);
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[histogram_barrier],
                &[],
            );
        }

        // Compute 2: reduce into this slot's average with temporal blend.
        unsafe {
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.average_pipeline.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.average_pipeline.layout,
                0,
                &[self.average_sets[frame]],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                self.average_pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push),
            );
            device.cmd_dispatch(cmd, 1, 1, 1);
        }

        context.markers.end_region(cmd);
    }

    /// Destroy everything the pass owns.
    pub fn destroy(&mut self, context: &Context) {
        for mut image in self.luminance_ring.drain(..) {
            image.destroy(context);
        }
        for mut buffer in self
            .histogram_buffers
            .drain(..)
            .chain(self.exposure_buffers.drain(..))
        {
            buffer.destroy(context);
        }
        for set in self
            .tonemap_sets
            .drain(..)
            .chain(self.histogram_sets.drain(..))
            .chain(self.average_sets.drain(..))
        {
            context.descriptors.free(&context.device, set);
        }
        self.sampler.destroy(context);
        self.tonemap_pipeline.destroy(context);
        self.histogram_pipeline.destroy(context);
        self.average_pipeline.destroy(context);
        self.tonemap_layout.destroy(&context.device);
        self.histogram_layout.destroy(&context.device);
        self.average_layout.destroy(&context.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luminance_push_layout() {
        assert_eq!(std::mem::size_of::<LuminancePush>(), 16);
    }

    #[test]
    fn test_default_push_matches_histogram_bounds() {
        let settings = ExposureSettings::default();
        let push = LuminancePush {
            min_log_luminance: settings.min_log_luminance,
            log_luminance_range: settings.log_luminance_range,
            delta_seconds: 0.016,
            pixel_count: 1920 * 1080,
        };
        assert_eq!(push.min_log_luminance, -8.0);
        assert_eq!(push.log_luminance_range, 12.0);
    }

    #[test]
    fn test_ring_roles_never_alias() {
        for frames in 2..=4 {
            for slot in 0..frames {
                assert_ne!(previous_slot(slot, frames), slot);
            }
        }
    }
}
