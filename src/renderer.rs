//! The per-frame orchestrator.
//!
//! Owns the context, swapchain, sync manager and the ordered pass list, and
//! drives the frame state machine:
//!
//! 1. wait on the ring slot's in-flight fence
//! 2. acquire a swapchain image (out-of-date/suboptimal → recreate + skip)
//! 3. reset fence and command buffer
//! 4. record shadow → depth/G-buffer → lighting → tone-map → auto-exposure
//!    compute → UI
//! 5. submit (wait image-available at color-attachment-output, signal
//!    render-finished, fence in-flight)
//! 6. present (out-of-date → recreate)
//! 7. advance the frame ring index
//!
//! A skipped frame performs no submission, no present, and does not advance
//! the ring index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use glam::Mat4;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::commands;
use crate::config::RendererConfig;
use crate::context::Context;
use crate::deletion::DeletionQueue;
use crate::error::{RenderError, RenderResult};
use crate::passes::{BlitPass, GeometryPass, LightingPass, ShadowPass, UiPass};
use crate::resources::transition_masks;
use crate::scene::{
    bake_environment, Camera, Environment, LightItem, RenderItem, TextureRegistry,
};
use crate::swapchain::{AcquireResult, PresentResult, Swapchain};
use crate::sync::SyncManager;

/// Frame statistics surfaced to the UI overlay.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameStats {
    pub frame_number: u64,
    pub cpu_frame_ms: f32,
    pub render_items: usize,
    pub lights: usize,
}

/// The renderer.
pub struct Renderer {
    context: Context,
    swapchain: Swapchain,
    sync: SyncManager,
    command_buffers: Vec<vk::CommandBuffer>,
    shadow: ShadowPass,
    geometry: GeometryPass,
    lighting: LightingPass,
    blit: BlitPass,
    ui: UiPass,
    registry: TextureRegistry,
    environment: Option<Environment>,
    camera: Camera,
    render_items: Vec<RenderItem>,
    light_items: Vec<LightItem>,
    /// Teardowns for swapchain-scoped resources, flushed on recreate.
    swapchain_deletion: DeletionQueue,
    config: RendererConfig,
    window: Arc<Window>,
    last_frame: Instant,
    stats: Arc<Mutex<FrameStats>>,
}

impl Renderer {
    /// Initialize the full rendering stack against `window`.
    pub fn new(window: Arc<Window>, config: RendererConfig) -> RenderResult<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| RenderError::InitializationFailed(format!("no display handle: {}", e)))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| RenderError::InitializationFailed(format!("no window handle: {}", e)))?
            .as_raw();

        let context = Context::new(display_handle, window_handle, config.validation)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(&context, size.width, size.height, config.vsync, None)?;
        let extent = swapchain.extent;

        let sync = SyncManager::new(&context)?;
        let command_buffers = commands::allocate_frame_command_buffers(&context)?;

        let shadow = ShadowPass::new(&context, &config.shader_dir, config.shadow_map_size)?;
        let geometry = GeometryPass::new(&context, &config.shader_dir, extent)?;
        let mut lighting = LightingPass::new(&context, &config.shader_dir, extent)?;
        let mut blit = BlitPass::new(&context, &config.shader_dir, swapchain.format)?;
        let mut ui = UiPass::new(&context, &window, swapchain.format)?;

        lighting.write_gbuffer_sets(&context, &geometry);
        blit.write_hdr_bindings(&context, &lighting);
        ui.create_framebuffers(&context, &swapchain.views, extent)?;

        let registry = TextureRegistry::new(&context)?;

        let camera = Camera::new(
            glam::Vec3::new(0.0, 3.0, 8.0),
            glam::Vec3::ZERO,
            extent.width as f32 / extent.height as f32,
        );

        log::info!("Renderer initialized ({}x{})", extent.width, extent.height);

        Ok(Self {
            context,
            swapchain,
            sync,
            command_buffers,
            shadow,
            geometry,
            lighting,
            blit,
            ui,
            registry,
            environment: None,
            camera,
            render_items: Vec::new(),
            light_items: Vec::new(),
            swapchain_deletion: DeletionQueue::new(),
            config,
            window,
            last_frame: Instant::now(),
            stats: Arc::new(Mutex::new(FrameStats::default())),
        })
    }

    /// The device context (for application-side resource creation).
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Shared frame statistics handle for UI closures.
    pub fn stats(&self) -> Arc<Mutex<FrameStats>> {
        Arc::clone(&self.stats)
    }

    /// Queue a mesh instance for this frame.
    pub fn submit_render_item(&mut self, item: RenderItem) {
        self.render_items.push(item);
    }

    /// Queue a light for this frame.
    pub fn submit_light_item(&mut self, item: LightItem) {
        self.light_items.push(item);
    }

    /// Replace the active camera.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    /// Mutable access to the active camera.
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Queue a UI closure executed every frame.
    pub fn insert_ui(&mut self, callback: impl FnMut(&egui::Context) + 'static) {
        self.ui.insert_ui(callback);
    }

    /// Forward a window event to the UI layer.
    pub fn on_window_event(&mut self, event: &winit::event::WindowEvent) -> bool {
        let window = Arc::clone(&self.window);
        self.ui.on_window_event(&window, event)
    }

    /// Clear the per-frame item queues. Called once per frame by the owning
    /// application, after scene update and before the next submissions.
    pub fn clear_queue(&mut self) {
        self.render_items.clear();
        self.light_items.clear();
    }

    /// Decode, upload and register a texture; returns its stable bindless
    /// slot.
    pub fn load_texture(&mut self, path: &str) -> RenderResult<u32> {
        self.registry.load_from_file(&self.context, path)
    }

    /// Register a 1x1 solid-color texture; returns its stable bindless slot.
    pub fn register_solid_texture(&mut self, rgba: [u8; 4]) -> RenderResult<u32> {
        self.registry.register_solid(&self.context, rgba)
    }

    /// Bake an HDRI environment map and bind it for ambient lighting.
    pub fn load_environment(&mut self, hdr_path: &str, size: u32) -> RenderResult<()> {
        let environment =
            bake_environment(&self.context, &self.config.shader_dir, hdr_path, size)?;
        self.lighting.set_environment(
            &self.context,
            environment.cubemap.view,
            environment.sampler.sampler,
        );
        if let Some(mut old) = self.environment.replace(environment) {
            self.context.wait_idle();
            old.destroy(&self.context);
        }
        Ok(())
    }

    /// Render one frame.
    pub fn render(&mut self) -> RenderResult<()> {
        let frame = self.context.current_frame();

        // 1. Wait until the GPU has finished the previous use of this slot.
        self.sync.wait_for_frame(&self.context, frame)?;

        // 2. Acquire; an outdated surface aborts the frame before anything
        //    is recorded or submitted.
        let image_available = self.sync.frame(frame).image_available;
        let (image_index, suboptimal) =
            match self.swapchain.acquire(&self.context, image_available)? {
                AcquireResult::OutOfDate => {
                    self.recreate_swapchain()?;
                    return Ok(());
                }
                AcquireResult::Ready {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
            };
        if suboptimal {
            self.recreate_swapchain()?;
            return Ok(());
        }

        // 3. The slot is ours: mark it in flight again.
        self.sync.reset_fence(&self.context, frame)?;

        let now = Instant::now();
        let delta_seconds = (now - self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;

        let cmd = self.command_buffers[frame];
        unsafe {
            self.context
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| RenderError::Internal(format!("Failed to reset command buffer: {:?}", e)))?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.context.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| RenderError::Internal(format!("Failed to begin command buffer: {:?}", e)))?;

        // CPU-side per-frame updates for this ring slot. Safe to write: the
        // fence wait above guarantees the GPU is done with slot resources.
        let camera_data = self.camera.data();
        let scene_radius = scene_bounding_radius(&self.render_items);
        self.geometry.update_uniforms(frame, &camera_data)?;
        self.geometry
            .update_texture_descriptor(&self.context, &self.registry)?;
        self.lighting.update_frame(
            &self.context,
            frame,
            &camera_data,
            &self.light_items,
            scene_radius,
        )?;
        self.blit.update_exposure(frame, &camera_data.exposure)?;

        // 4. Record the pass sequence.
        self.shadow.record(
            &self.context,
            cmd,
            frame,
            &self.render_items,
            &self.light_items,
            scene_radius,
        );
        self.geometry
            .record_depth_prepass(&self.context, cmd, frame, &self.render_items);
        self.geometry
            .record(&self.context, cmd, frame, &self.render_items);
        self.lighting.record(&self.context, cmd, frame);

        self.transition_swapchain_image(cmd, image_index);
        self.blit.record_tonemap(
            &self.context,
            cmd,
            frame,
            self.swapchain.views[image_index as usize],
            self.swapchain.extent,
        );
        self.blit.record_compute(
            &self.context,
            cmd,
            frame,
            self.lighting.hdr_target_mut(frame),
            &camera_data.exposure,
            delta_seconds,
        );
        {
            let window = Arc::clone(&self.window);
            self.ui
                .record(&self.context, &window, cmd, image_index, self.swapchain.extent)?;
        }

        unsafe { self.context.device.end_command_buffer(cmd) }
            .map_err(|e| RenderError::Internal(format!("Failed to end command buffer: {:?}", e)))?;

        // 5. Submit.
        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.frame(frame).render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context.device.queue_submit(
                self.context.graphics_queue,
                &[submit_info],
                self.sync.frame(frame).in_flight,
            )
        }
        .map_err(|e| RenderError::Internal(format!("Failed to submit frame: {:?}", e)))?;

        // 6. Present.
        let present = self.swapchain.present(
            &self.context,
            image_index,
            self.sync.frame(frame).render_finished,
        )?;
        if present == PresentResult::NeedsRecreate {
            self.recreate_swapchain()?;
        }

        // Lights submitted for the first time get their shadow-map ring
        // now; they render shadowed from the next frame on.
        self.shadow
            .ensure_shadow_maps(&self.context, &self.light_items)?;

        {
            let mut stats = self.stats.lock();
            stats.frame_number += 1;
            stats.cpu_frame_ms = delta_seconds * 1000.0;
            stats.render_items = self.render_items.len();
            stats.lights = self.light_items.len();
        }

        // 7. Advance the ring.
        self.context.advance_frame();
        Ok(())
    }

    /// Record the swapchain image's `UNDEFINED → COLOR_ATTACHMENT` barrier.
    ///
    /// Swapchain images are not tracked like engine images: their content
    /// from the previous presentation is discarded every frame.
    fn transition_swapchain_image(&self, cmd: vk::CommandBuffer, image_index: u32) {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.swapchain.images[image_index as usize])
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        unsafe {
            self.context.device.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Rebuild the swapchain and every size-dependent resource.
    ///
    /// Frame-independent resources (pipelines, descriptor layouts, shadow
    /// maps, the luminance ring) are untouched.
    pub fn recreate_swapchain(&mut self) -> RenderResult<()> {
        // Busy-poll while the window is zero-sized (minimized).
        loop {
            let size = self.window.inner_size();
            if size.width > 0 && size.height > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        self.context.wait_idle();

        // Retire size-dependent images through the swapchain-scoped
        // deletion queue, then flush it (LIFO) now that the device is idle.
        for targets in self.geometry.take_targets() {
            self.swapchain_deletion.push(move |ctx| {
                let mut targets = targets;
                targets.destroy(ctx);
            });
        }
        for hdr in self.lighting.take_hdr_targets() {
            self.swapchain_deletion.push(move |ctx| {
                let mut hdr = hdr;
                hdr.destroy(ctx);
            });
        }
        self.swapchain_deletion.flush(&self.context);

        let size = self.window.inner_size();
        let new_swapchain = Swapchain::new(
            &self.context,
            size.width,
            size.height,
            self.config.vsync,
            Some(self.swapchain.swapchain),
        )?;
        let mut old = std::mem::replace(&mut self.swapchain, new_swapchain);
        old.destroy(&self.context);

        // A suboptimal acquire leaves its image-available semaphore
        // signaled with no submission consuming it; recreating the sync
        // objects resets all of them to a known state.
        self.sync.destroy(&self.context);
        self.sync = SyncManager::new(&self.context)?;

        let extent = self.swapchain.extent;
        self.geometry.resize(&self.context, extent)?;
        self.lighting.resize(&self.context, extent)?;
        self.lighting.write_gbuffer_sets(&self.context, &self.geometry);
        self.blit.write_hdr_bindings(&self.context, &self.lighting);
        self.ui
            .create_framebuffers(&self.context, &self.swapchain.views, extent)?;

        self.camera
            .set_aspect(extent.width as f32 / extent.height as f32);

        log::info!(
            "Swapchain recreated: {}x{}",
            extent.width,
            extent.height
        );
        Ok(())
    }

    /// Tear down every subsystem in dependency order and destroy the
    /// context.
    ///
    /// Models and lights created by the application must be destroyed by
    /// the application (against [`Renderer::context`]) before this call.
    pub fn destroy(mut self) {
        self.context.wait_idle();

        self.ui.destroy(&self.context);
        self.blit.destroy(&self.context);
        self.lighting.destroy(&self.context);
        self.geometry.destroy(&self.context);
        self.shadow.destroy(&self.context);

        self.registry.destroy(&self.context);
        if let Some(mut environment) = self.environment.take() {
            environment.destroy(&self.context);
        }

        self.swapchain_deletion.flush(&self.context);
        self.sync.destroy(&self.context);
        self.swapchain.destroy(&self.context);
        self.context.destroy();
    }
}

/// Conservative bounding radius of the submitted items, used to size the
/// directional shadow frustum.
pub fn scene_bounding_radius(items: &[RenderItem]) -> f32 {
    let max_distance = items
        .iter()
        .map(|item| translation(&item.transform).length())
        .fold(0.0f32, f32::max);
    (max_distance + 5.0).max(10.0)
}

fn translation(transform: &Mat4) -> glam::Vec3 {
    transform.w_axis.truncate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_scene_radius_floor() {
        assert_eq!(scene_bounding_radius(&[]), 10.0);
    }

    #[test]
    fn test_scene_radius_grows_with_translation() {
        // No GPU needed: the radius only looks at transforms.
        let transform = Mat4::from_translation(Vec3::new(30.0, 0.0, 40.0));
        assert_eq!(translation(&transform).length(), 50.0);
    }
}
