//! egui overlay pass.
//!
//! Always the last pass in the frame: draws the immediate-mode UI over the
//! already-tone-mapped swapchain image with a load (not clear) render
//! pass whose final layout is `PRESENT_SRC`. UI widget logic stays in the
//! application; `insert_ui` queues closures that run against the egui
//! context every frame.

use std::sync::{Arc, Mutex};

use ash::vk;
use egui_ash_renderer::{Options, Renderer};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use winit::event::WindowEvent;
use winit::window::Window;

use crate::context::{Context, MAX_FRAMES_IN_FLIGHT};
use crate::error::{RenderError, RenderResult};

/// Closure run against the egui context every frame.
type UiCallback = Box<dyn FnMut(&egui::Context)>;

/// The UI overlay pass.
pub struct UiPass {
    ctx: egui::Context,
    winit_state: egui_winit::State,
    /// egui-ash renderer; owns its texture descriptor pool internally.
    /// Must be dropped before the allocator.
    renderer: Option<Renderer>,
    /// Dedicated allocator for UI resources (egui-ash-renderer requires a
    /// `std::sync::Mutex`-wrapped allocator, unlike the context-wide one).
    allocator: Option<Arc<Mutex<Allocator>>>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    callbacks: Vec<UiCallback>,
}

impl UiPass {
    /// Create the egui context, input state, renderer, and the load-op
    /// render pass over the swapchain format.
    pub fn new(
        context: &Context,
        window: &Window,
        swapchain_format: vk::Format,
    ) -> RenderResult<Self> {
        let ctx = egui::Context::default();

        let winit_state = egui_winit::State::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
        );

        let render_pass = create_ui_render_pass(context, swapchain_format)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: context.device.clone(),
            physical_device: context.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to create UI allocator: {}", e))
        })?;
        let allocator = Arc::new(Mutex::new(allocator));

        let renderer = Renderer::with_gpu_allocator(
            allocator.clone(),
            context.device.clone(),
            render_pass,
            Options {
                in_flight_frames: MAX_FRAMES_IN_FLIGHT,
                ..Default::default()
            },
        )
        .map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to create egui renderer: {:?}", e))
        })?;

        Ok(Self {
            ctx,
            winit_state,
            renderer: Some(renderer),
            allocator: Some(allocator),
            render_pass,
            framebuffers: Vec::new(),
            callbacks: Vec::new(),
        })
    }

    /// Queue a closure executed against the egui context every frame.
    pub fn insert_ui(&mut self, callback: impl FnMut(&egui::Context) + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Forward a winit event to egui. Returns true when egui consumed it.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    /// (Re)create one framebuffer per swapchain image. Called at init and
    /// after every swapchain recreation.
    pub fn create_framebuffers(
        &mut self,
        context: &Context,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RenderResult<()> {
        self.destroy_framebuffers(context);
        for &view in views {
            let attachments = [view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { context.device.create_framebuffer(&info, None) }
                .map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to create UI framebuffer: {:?}",
                        e
                    ))
                })?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Run the queued UI closures and record the overlay draw.
    ///
    /// The swapchain image must be in `COLOR_ATTACHMENT_OPTIMAL`; the
    /// render pass transitions it to `PRESENT_SRC`.
    pub fn record(
        &mut self,
        context: &Context,
        window: &Window,
        cmd: vk::CommandBuffer,
        image_index: u32,
        extent: vk::Extent2D,
    ) -> RenderResult<()> {
        context
            .markers
            .begin_region(cmd, "ui pass", [0.9, 0.9, 0.9, 1.0]);

        let raw_input = self.winit_state.take_egui_input(window);
        self.ctx.begin_frame(raw_input);

        for callback in &mut self.callbacks {
            callback(&self.ctx);
        }

        let full_output = self.ctx.end_frame();
        self.winit_state
            .handle_platform_output(window, full_output.platform_output);

        let paint_jobs = self
            .ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let textures_delta = full_output.textures_delta;

        let renderer = self
            .renderer
            .as_mut()
            .ok_or_else(|| RenderError::Internal("UI renderer already destroyed".to_string()))?;

        if !textures_delta.set.is_empty() {
            renderer
                .set_textures(
                    context.graphics_queue,
                    context.command_pool,
                    &textures_delta.set,
                )
                .map_err(|e| {
                    RenderError::Internal(format!("Failed to update UI textures: {:?}", e))
                })?;
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            });

        unsafe {
            context.device.cmd_begin_render_pass(
                cmd,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        renderer
            .cmd_draw(cmd, extent, self.ctx.pixels_per_point(), &paint_jobs)
            .map_err(|e| RenderError::Internal(format!("Failed to draw UI: {:?}", e)))?;

        unsafe {
            context.device.cmd_end_render_pass(cmd);
        }

        if !textures_delta.free.is_empty() {
            renderer.free_textures(&textures_delta.free).map_err(|e| {
                RenderError::Internal(format!("Failed to free UI textures: {:?}", e))
            })?;
        }

        context.markers.end_region(cmd);
        Ok(())
    }

    fn destroy_framebuffers(&mut self, context: &Context) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                context.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }

    /// Destroy GPU resources. The renderer must drop before its allocator,
    /// and both before the device.
    pub fn destroy(&mut self, context: &Context) {
        context.wait_idle();
        self.destroy_framebuffers(context);
        unsafe {
            context.device.destroy_render_pass(self.render_pass, None);
        }
        self.renderer = None;
        self.allocator = None;
    }
}

/// Load-op render pass: `COLOR_ATTACHMENT_OPTIMAL` in, `PRESENT_SRC` out.
fn create_ui_render_pass(
    context: &Context,
    format: vk::Format,
) -> RenderResult<vk::RenderPass> {
    let attachment = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::LOAD,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };

    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let color_refs = [color_ref];

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);

    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let attachments = [attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { context.device.create_render_pass(&info, None) }.map_err(|e| {
        RenderError::ResourceCreationFailed(format!("Failed to create UI render pass: {:?}", e))
    })
}
