//! GPU image wrapper, builder, and the layout state machine.
//!
//! Every [`Image`] tracks its current layout. The tracked value must always
//! reflect the layout set by the most recent `transition_layout` recorded on
//! a command buffer that will execute before future submissions reference
//! the image. This is a cooperative contract (the hardware does not enforce
//! it), and it is what makes the per-pass barrier placement correct: each
//! transition uses the tracked layout as its `old_layout`, so a stale value
//! would produce a mismatched barrier.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use crate::commands;
use crate::context::Context;
use crate::error::{RenderError, RenderResult};
use crate::resources::Buffer;

/// Stage and access masks for one side of a layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// Compute the pipeline barrier masks for an `old → new` layout transition.
///
/// A transition with `old == new` is a pure execution+memory barrier between
/// identical-layout accesses; the auto-exposure computes rely on this for
/// their `GENERAL → GENERAL` ping-pong hazards.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> TransitionMasks {
    let (src_stage, src_access) = src_masks(old);
    let (dst_stage, dst_access) = dst_masks(new);
    TransitionMasks {
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    }
}

fn src_masks(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => {
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        vk::ImageLayout::GENERAL => (
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => (
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::MEMORY_WRITE,
        ),
    }
}

fn dst_masks(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => {
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        vk::ImageLayout::GENERAL => (
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => (
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ),
    }
}

/// Check if a Vulkan format has a stencil component.
fn format_has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Check if a Vulkan format is depth or depth-stencil.
fn format_is_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

/// An owning wrapper around a Vulkan image, its memory, and its views.
pub struct Image {
    /// Raw image handle.
    pub image: vk::Image,
    /// Memory allocation; `None` after destroy.
    allocation: Option<Allocation>,
    /// Full-resource view (cube or 2D-array view for layered images).
    pub view: vk::ImageView,
    /// Optional single-layer views, one per array layer, used as per-face
    /// render targets for cube shadow maps.
    pub layer_views: Vec<vk::ImageView>,
    /// Image format.
    pub format: vk::Format,
    /// Image extent.
    pub extent: vk::Extent2D,
    /// Number of mip levels.
    pub mip_levels: u32,
    /// Number of array layers (6 for cube maps).
    pub array_layers: u32,
    /// Aspect mask derived from the format.
    pub aspect: vk::ImageAspectFlags,
    /// The layout set by the most recent recorded transition.
    current_layout: vk::ImageLayout,
}

impl Image {
    /// Start building an image.
    pub fn builder<'a>(extent: vk::Extent2D, format: vk::Format) -> ImageBuilder<'a> {
        ImageBuilder::new(extent, format)
    }

    /// The layout set by the most recent recorded transition.
    pub fn current_layout(&self) -> vk::ImageLayout {
        self.current_layout
    }

    /// Record a layout transition over the whole image.
    ///
    /// The barrier's `old_layout` is always the tracked layout, so the
    /// declared old layout can never drift from the actual last-set one.
    /// Passing the current layout again records a same-layout memory
    /// barrier (used between compute dispatches touching `GENERAL` images).
    pub fn transition_layout(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        new_layout: vk::ImageLayout,
    ) {
        let old_layout = self.current_layout;
        let masks = transition_masks(old_layout, new_layout);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            })
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        self.current_layout = new_layout;
    }

    /// Reset the tracked layout to `UNDEFINED` without recording a barrier.
    ///
    /// Used when the image content is about to be fully overwritten and the
    /// next transition may discard it.
    pub fn forget_contents(&mut self) {
        self.current_layout = vk::ImageLayout::UNDEFINED;
    }

    /// Destroy views, image, and memory.
    pub fn destroy(&mut self, context: &Context) {
        unsafe {
            for view in self.layer_views.drain(..) {
                context.device.destroy_image_view(view, None);
            }
            if self.view != vk::ImageView::null() {
                context.device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = context.allocator.lock().free(allocation) {
                log::error!("Failed to free image allocation: {}", e);
            }
        }
        if self.image != vk::Image::null() {
            unsafe {
                context.device.destroy_image(self.image, None);
            }
            self.image = vk::Image::null();
        }
    }
}

/// Fluent builder for [`Image`].
///
/// Fields are public so callers (and tests) can inspect the planned create
/// parameters before committing them to the device.
pub struct ImageBuilder<'a> {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub flags: vk::ImageCreateFlags,
    pub samples: vk::SampleCountFlags,
    pub with_layer_views: bool,
    pub label: String,
    pub initial_data: Option<&'a [u8]>,
    pub generate_mips: bool,
}

impl<'a> ImageBuilder<'a> {
    /// Create a builder for a 2D color image.
    pub fn new(extent: vk::Extent2D, format: vk::Format) -> Self {
        let aspect = if format_is_depth(format) {
            if format_has_stencil(format) {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            } else {
                vk::ImageAspectFlags::DEPTH
            }
        } else {
            vk::ImageAspectFlags::COLOR
        };

        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::empty(),
            aspect,
            mip_levels: 1,
            array_layers: 1,
            flags: vk::ImageCreateFlags::empty(),
            samples: vk::SampleCountFlags::TYPE_1,
            with_layer_views: false,
            label: String::new(),
            initial_data: None,
            generate_mips: false,
        }
    }

    /// Set usage flags.
    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// Make this a cube-compatible image with 6 array layers.
    pub fn cube(mut self) -> Self {
        self.array_layers = 6;
        self.flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        self
    }

    /// Set the array layer count.
    pub fn array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    /// Compute a full mip chain for the extent and generate it from the
    /// uploaded data with successive linear blits.
    pub fn full_mip_chain(mut self) -> Self {
        self.mip_levels = mip_level_count(self.extent);
        self.generate_mips = self.mip_levels > 1;
        self
    }

    /// Also create one single-layer view per array layer (per-face render
    /// targets).
    pub fn layer_views(mut self) -> Self {
        self.with_layer_views = true;
        self
    }

    /// Attach a debug label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Upload `data` (tightly packed, layer-major) through a staging buffer
    /// during build, leaving the image in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn initial_data(mut self, data: &'a [u8]) -> Self {
        self.initial_data = Some(data);
        self
    }

    /// Create the image, its memory, and its views; upload initial data if
    /// provided.
    pub fn build(self, context: &Context) -> RenderResult<Image> {
        let needs_transfer = self.initial_data.is_some() || self.generate_mips;
        let mut usage = self.usage;
        if needs_transfer {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.generate_mips {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let image_info = vk::ImageCreateInfo::default()
            .flags(self.flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(self.mip_levels)
            .array_layers(self.array_layers)
            .samples(self.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { context.device.create_image(&image_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let mem_requirements = unsafe { context.device.get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = context.allocator.lock();
            allocator
                .allocate(&AllocationCreateDesc {
                    name: if self.label.is_empty() {
                        "image"
                    } else {
                        &self.label
                    },
                    requirements: mem_requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to allocate image memory: {}",
                        e
                    ))
                })?
        };

        unsafe {
            context
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to bind image memory: {:?}", e))
        })?;

        let view_type = if self.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) {
            vk::ImageViewType::CUBE
        } else if self.array_layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(self.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: self.mip_levels,
                base_array_layer: 0,
                layer_count: self.array_layers,
            });

        let view = unsafe { context.device.create_image_view(&view_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to create image view: {:?}", e))
        })?;

        let mut layer_views = Vec::new();
        if self.with_layer_views {
            for layer in 0..self.array_layers {
                let layer_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: self.aspect,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: layer,
                        layer_count: 1,
                    });
                let layer_view = unsafe {
                    context.device.create_image_view(&layer_info, None)
                }
                .map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to create layer view: {:?}",
                        e
                    ))
                })?;
                layer_views.push(layer_view);
            }
        }

        if !self.label.is_empty() {
            context.markers.set_object_name(image, &self.label);
            context
                .markers
                .set_object_name(view, &format!("{} view", self.label));
        }

        let mut result = Image {
            image,
            allocation: Some(allocation),
            view,
            layer_views,
            format: self.format,
            extent: self.extent,
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
            aspect: self.aspect,
            current_layout: vk::ImageLayout::UNDEFINED,
        };

        if let Some(data) = self.initial_data {
            upload_pixels(context, &mut result, data)?;
            if self.generate_mips {
                generate_mipmaps(context, &mut result)?;
            } else {
                commands::submit_one_time(context, "image layout finalize", |cmd| {
                    result.transition_layout(
                        &context.device,
                        cmd,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    );
                    Ok(())
                })?;
            }
        }

        Ok(result)
    }
}

/// Number of mip levels for a full chain over `extent`.
pub fn mip_level_count(extent: vk::Extent2D) -> u32 {
    (extent.width.max(extent.height) as f32).log2().floor() as u32 + 1
}

/// Upload tightly packed pixel data into mip 0 of every layer.
fn upload_pixels(context: &Context, image: &mut Image, data: &[u8]) -> RenderResult<()> {
    let mut staging = Buffer::builder(data.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)
        .host_visible()
        .label("image upload staging")
        .build(context)?;
    staging.write_bytes(data, 0)?;

    let layer_size = data.len() as vk::DeviceSize / image.array_layers as vk::DeviceSize;

    commands::submit_one_time(context, "image upload", |cmd| {
        image.transition_layout(&context.device, cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        let regions: Vec<vk::BufferImageCopy> = (0..image.array_layers)
            .map(|layer| vk::BufferImageCopy {
                buffer_offset: layer as vk::DeviceSize * layer_size,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect,
                    mip_level: 0,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: image.extent.width,
                    height: image.extent.height,
                    depth: 1,
                },
            })
            .collect();

        unsafe {
            context.device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }
        Ok(())
    })?;

    staging.destroy(context);
    Ok(())
}

/// Generate a full mip chain with successive linear blits.
///
/// Fatal if the format does not support linear filtering under optimal
/// tiling: silently degrading filter quality would be a worse failure mode
/// than stopping.
fn generate_mipmaps(context: &Context, image: &mut Image) -> RenderResult<()> {
    let format_props = unsafe {
        context
            .instance
            .get_physical_device_format_properties(context.physical_device, image.format)
    };
    if !format_props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        return Err(RenderError::FeatureNotSupported(format!(
            "format {:?} does not support linear blit for mip generation",
            image.format
        )));
    }

    let device = context.device.clone();
    let vk_image = image.image;
    let aspect = image.aspect;
    let layers = image.array_layers;
    let mip_levels = image.mip_levels;
    let extent = image.extent;

    commands::submit_one_time(context, "mipmap generation", |cmd| {
        // Mip 0 currently holds the uploaded data in TRANSFER_DST.
        let mut mip_width = extent.width as i32;
        let mut mip_height = extent.height as i32;

        for level in 1..mip_levels {
            // Previous level: TRANSFER_DST -> TRANSFER_SRC
            let to_src = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(vk_image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: level - 1,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: layers,
                })
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ);

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_src],
                );
            }

            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);

            let blit = vk::ImageBlit::default()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: layers,
                })
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: mip_width,
                        y: mip_height,
                        z: 1,
                    },
                ])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: layers,
                })
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: next_width,
                        y: next_height,
                        z: 1,
                    },
                ]);

            unsafe {
                device.cmd_blit_image(
                    cmd,
                    vk_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }

            mip_width = next_width;
            mip_height = next_height;
        }

        // All levels to SHADER_READ_ONLY: levels 0..n-1 are TRANSFER_SRC,
        // the last level is still TRANSFER_DST.
        let src_levels = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk_image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels - 1,
                base_array_layer: 0,
                layer_count: layers,
            })
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);

        let last_level = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk_image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: mip_levels - 1,
                level_count: 1,
                base_array_layer: 0,
                layer_count: layers,
            })
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[src_levels, last_level],
            );
        }

        Ok(())
    })?;

    image.current_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_undefined_source_has_no_access() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn test_shadow_map_to_sampled() {
        // After the shadow pass writes depth, the lighting pass samples it
        // the same frame: LATE_FRAGMENT_TESTS -> FRAGMENT_SHADER.
        let masks = transition_masks(
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::LATE_FRAGMENT_TESTS);
        assert_eq!(
            masks.src_access,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_general_to_general_is_compute_hazard_barrier() {
        // The auto-exposure ping-pong stays in GENERAL; the barrier still
        // orders compute read/write access.
        let masks = transition_masks(vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert!(masks.src_access.contains(vk::AccessFlags::SHADER_WRITE));
        assert!(masks.dst_access.contains(vk::AccessFlags::SHADER_READ));
    }

    #[rstest]
    #[case(vk::Format::D32_SFLOAT, false)]
    #[case(vk::Format::D24_UNORM_S8_UINT, true)]
    #[case(vk::Format::D32_SFLOAT_S8_UINT, true)]
    #[case(vk::Format::R8G8B8A8_UNORM, false)]
    fn test_format_has_stencil(#[case] format: vk::Format, #[case] expected: bool) {
        assert_eq!(format_has_stencil(format), expected);
    }

    #[test]
    fn test_depth_builder_selects_depth_aspect() {
        let builder = ImageBuilder::new(
            vk::Extent2D {
                width: 2048,
                height: 2048,
            },
            vk::Format::D32_SFLOAT,
        );
        assert_eq!(builder.aspect, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn test_cube_builder_params() {
        let builder = ImageBuilder::new(
            vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            vk::Format::D32_SFLOAT,
        )
        .cube();
        assert_eq!(builder.array_layers, 6);
        assert!(builder.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
    }

    #[rstest]
    #[case(1, 1, 1)]
    #[case(256, 256, 9)]
    #[case(1920, 1080, 11)]
    #[case(300, 200, 9)]
    fn test_mip_level_count(#[case] width: u32, #[case] height: u32, #[case] expected: u32) {
        assert_eq!(mip_level_count(vk::Extent2D { width, height }), expected);
    }
}
