//! Swapchain creation, acquisition, and presentation.
//!
//! Out-of-date and suboptimal results are expected, recoverable states,
//! not errors. They surface as [`AcquireResult::OutOfDate`] /
//! [`PresentResult::NeedsRecreate`] and the renderer responds with a
//! synchronous recreate plus a skipped frame.

use ash::vk;

use crate::context::Context;
use crate::error::{RenderError, RenderResult};

/// Result of acquiring a swapchain image.
pub enum AcquireResult {
    /// An image is ready for rendering.
    Ready {
        image_index: u32,
        /// The surface no longer matches the swapchain exactly; the frame
        /// is skipped and the swapchain recreated.
        suboptimal: bool,
    },
    /// The swapchain must be recreated before any image can be acquired.
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    /// The image was queued for presentation.
    Presented,
    /// Presentation reported out-of-date/suboptimal; recreate before the
    /// next frame.
    NeedsRecreate,
}

/// Swapchain and its per-image views.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the context's surface.
    ///
    /// Prefers `B8G8R8A8_UNORM`/sRGB-nonlinear, mailbox present when vsync
    /// is off, and `min_image_count + 1` images (triple buffering where the
    /// driver allows it).
    pub fn new(
        context: &Context,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> RenderResult<Self> {
        let capabilities = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, context.surface)
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to get surface capabilities: {:?}",
                e
            ))
        })?;

        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, context.surface)
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to get surface formats: {:?}", e))
        })?;

        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .cloned()
            .unwrap_or(formats[0]);

        let present_modes = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_present_modes(context.physical_device, context.surface)
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to get present modes: {:?}", e))
        })?;

        let preferred = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            vk::PresentModeKHR::MAILBOX
        };
        let present_mode = if present_modes.contains(&preferred) {
            preferred
        } else {
            vk::PresentModeKHR::FIFO // Always available
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let image_count =
            (capabilities.min_image_count + 1).min(if capabilities.max_image_count > 0 {
                capabilities.max_image_count
            } else {
                u32::MAX
            });

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = unsafe {
            context
                .swapchain_loader
                .create_swapchain(&create_info, None)
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to create swapchain: {:?}", e))
        })?;

        let images = unsafe { context.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to get swapchain images: {:?}",
                    e
                ))
            })?;

        let views: Vec<vk::ImageView> = images
            .iter()
            .enumerate()
            .map(|(i, &image)| {
                context
                    .markers
                    .set_object_name(image, &format!("swapchain[{}]", i));
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { context.device.create_image_view(&view_info, None) }.map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to create swapchain image view: {:?}",
                        e
                    ))
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        log::info!(
            "Created swapchain: {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            present_mode
        );

        Ok(Self {
            swapchain,
            images,
            views,
            format: surface_format.format,
            extent,
        })
    }

    /// Acquire the next swapchain image, signaling `image_available`.
    pub fn acquire(
        &self,
        context: &Context,
        image_available: vk::Semaphore,
    ) -> RenderResult<AcquireResult> {
        let result = unsafe {
            context.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireResult::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(e) => Err(RenderError::Internal(format!(
                "Failed to acquire swapchain image: {:?}",
                e
            ))),
        }
    }

    /// Present `image_index`, waiting on `render_finished`.
    pub fn present(
        &self,
        context: &Context,
        image_index: u32,
        render_finished: vk::Semaphore,
    ) -> RenderResult<PresentResult> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            context
                .swapchain_loader
                .queue_present(context.graphics_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) => {
                log::trace!("Swapchain suboptimal at present");
                Ok(PresentResult::NeedsRecreate)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date, needs recreation");
                Ok(PresentResult::NeedsRecreate)
            }
            Err(e) => Err(RenderError::Internal(format!(
                "Failed to present swapchain image: {:?}",
                e
            ))),
        }
    }

    /// Destroy views and the swapchain.
    pub fn destroy(&mut self, context: &Context) {
        unsafe {
            for view in self.views.drain(..) {
                context.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                context
                    .swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}
