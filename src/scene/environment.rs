//! Environment map baking.
//!
//! Loads an equirectangular HDRI and bakes it into a cubemap with a one-time
//! compute dispatch at load time. The lighting pass samples the result for
//! ambient/background contribution. Like all load-time work, the bake is
//! synchronous (`queue_wait_idle`) and never overlaps the frame loop.

use std::path::Path;

use ash::vk;

use crate::commands;
use crate::context::Context;
use crate::descriptors::{DescriptorSetLayoutBuilder, DescriptorWriter};
use crate::error::{RenderError, RenderResult};
use crate::pipelines::{load_shader_module, ComputePipelineBuilder};
use crate::resources::{Image, Sampler};

/// Workgroup size of the bake shader in x/y.
const BAKE_WORKGROUP_SIZE: u32 = 8;

/// A baked environment cubemap.
pub struct Environment {
    pub cubemap: Image,
    pub sampler: Sampler,
}

impl Environment {
    /// Destroy the cubemap and sampler.
    pub fn destroy(&mut self, context: &Context) {
        self.cubemap.destroy(context);
        self.sampler.destroy(context);
    }
}

/// Bake `hdr_path` (equirectangular, .hdr) into a `size`x`size` cubemap.
pub fn bake_environment(
    context: &Context,
    shader_dir: &str,
    hdr_path: &str,
    size: u32,
) -> RenderResult<Environment> {
    let decoded = image::open(hdr_path)
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "failed to decode HDRI {}: {}",
                hdr_path, e
            ))
        })?
        .to_rgba32f();
    let (width, height) = decoded.dimensions();

    log::info!("Baking environment {} ({}x{})", hdr_path, width, height);

    let mut equirect = Image::builder(
        vk::Extent2D { width, height },
        vk::Format::R32G32B32A32_SFLOAT,
    )
    .usage(vk::ImageUsageFlags::SAMPLED)
    .initial_data(bytemuck::cast_slice(decoded.as_raw()))
    .label(hdr_path.to_string())
    .build(context)?;

    let mut cubemap = Image::builder(
        vk::Extent2D {
            width: size,
            height: size,
        },
        vk::Format::R16G16B16A16_SFLOAT,
    )
    .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED)
    .cube()
    .label("environment cubemap")
    .build(context)?;

    // Storage writes go through a 2D-array view; the cube view is for
    // sampling only.
    let array_view_info = vk::ImageViewCreateInfo::default()
        .image(cubemap.image)
        .view_type(vk::ImageViewType::TYPE_2D_ARRAY)
        .format(cubemap.format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 6,
        });
    let array_view = unsafe { context.device.create_image_view(&array_view_info, None) }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to create cubemap array view: {:?}",
                e
            ))
        })?;

    let mut equirect_sampler = Sampler::builder()
        .address_mode(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .label("equirect sampler")
        .build(context)?;

    let mut set_layout = DescriptorSetLayoutBuilder::new()
        .binding(
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::COMPUTE,
        )
        .binding(
            1,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::ShaderStageFlags::COMPUTE,
        )
        .build(&context.device)?;

    let shader = load_shader_module(
        context,
        Path::new(shader_dir).join("equirect_to_cube.comp.spv"),
    )?;
    let mut pipeline = ComputePipelineBuilder::new(shader)
        .set_layouts(&[set_layout.layout])
        .label("equirect to cube")
        .build(context)?;

    let set = context.descriptors.allocate(&context.device, &set_layout)?;

    let mut writer = DescriptorWriter::new();
    writer
        .write_image(
            set,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            equirect.view,
            equirect_sampler.sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .write_image(
            set,
            1,
            vk::DescriptorType::STORAGE_IMAGE,
            array_view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
        );
    writer.update(&context.device);

    let groups = size.div_ceil(BAKE_WORKGROUP_SIZE);
    commands::submit_one_time(context, "environment bake", |cmd| {
        cubemap.transition_layout(&context.device, cmd, vk::ImageLayout::GENERAL);

        unsafe {
            context.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.pipeline,
            );
            context.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout,
                0,
                &[set],
                &[],
            );
            context.device.cmd_dispatch(cmd, groups, groups, 6);
        }

        cubemap.transition_layout(
            &context.device,
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        Ok(())
    })?;

    // Bake-only resources are gone once the synchronous submit returns.
    context.descriptors.free(&context.device, set);
    pipeline.destroy(context);
    unsafe {
        context.device.destroy_shader_module(shader, None);
        context.device.destroy_image_view(array_view, None);
    }
    set_layout.destroy(&context.device);
    equirect_sampler.destroy(context);
    equirect.destroy(context);

    let sampler = Sampler::builder()
        .address_mode(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .label("environment sampler")
        .build(context)?;

    Ok(Environment { cubemap, sampler })
}
