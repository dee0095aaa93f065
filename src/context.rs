//! Process-wide GPU device context.
//!
//! The [`Context`] bundles the Vulkan handles every subsystem needs: device,
//! queue, memory allocator, command pool, descriptor allocator, and the
//! deletion queue. It is created once at startup and destroyed at shutdown
//! after a full device-idle wait. All passes and resources receive it by
//! reference; none own it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::commands;
use crate::debug::DebugMarkers;
use crate::deletion::DeletionQueue;
use crate::descriptors::DescriptorAllocator;
use crate::device;
use crate::error::{RenderError, RenderResult};
use crate::instance;

/// Number of frames that may be in flight on the GPU simultaneously.
///
/// Every per-frame resource (command buffers, sync objects, G-buffer sets,
/// shadow maps, luminance targets) is a ring of this many instances, indexed
/// by [`Context::current_frame`].
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Process-wide GPU device handle bundle.
pub struct Context {
    /// Vulkan entry points. Must outlive the instance.
    #[allow(dead_code)]
    entry: ash::Entry,
    /// Vulkan instance.
    pub instance: ash::Instance,
    /// Debug utils extension instance (validation builds only).
    debug_utils_instance: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger for validation layer output.
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    /// GPU debug label helpers (no-ops when validation is disabled).
    pub markers: DebugMarkers,
    /// Selected physical device.
    pub physical_device: vk::PhysicalDevice,
    /// Physical device properties (limits, name).
    pub properties: vk::PhysicalDeviceProperties,
    /// Logical device.
    pub device: ash::Device,
    /// Graphics+present queue.
    pub graphics_queue: vk::Queue,
    /// Graphics queue family index.
    pub graphics_queue_family: u32,
    /// Memory allocator, shared with resource builders.
    pub allocator: Arc<Mutex<Allocator>>,
    /// Command pool for frame and one-time command buffers.
    pub command_pool: vk::CommandPool,
    /// Descriptor pool wrapper (update-after-bind capable).
    pub descriptors: DescriptorAllocator,
    /// Context-wide teardown queue, flushed at shutdown in LIFO order.
    pub deletion_queue: DeletionQueue,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader.
    pub swapchain_loader: ash::khr::swapchain::Device,
    /// Presentation surface for the application window.
    pub surface: vk::SurfaceKHR,
    /// Frame ring index, 0..MAX_FRAMES_IN_FLIGHT.
    current_frame: AtomicUsize,
}

impl Context {
    /// Initialize the Vulkan instance, surface, device and allocator.
    ///
    /// Any failure here is fatal: a missing layer, unsupported feature or
    /// bad driver will not change between attempts in the same process.
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        validation: bool,
    ) -> RenderResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let (instance, debug_messenger, debug_utils_instance) =
            instance::create_instance(&entry, display_handle, validation)?;

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to create surface: {:?}", e))
        })?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let (physical_device, graphics_queue_family) =
            device::select_physical_device(&instance, &surface_loader, surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        let device =
            device::create_logical_device(&instance, physical_device, graphics_queue_family)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let allocator = Arc::new(Mutex::new(
            Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: gpu_allocator::AllocationSizes::default(),
            })
            .map_err(|e| {
                RenderError::InitializationFailed(format!(
                    "Failed to create memory allocator: {}",
                    e
                ))
            })?,
        ));

        let command_pool = commands::create_command_pool(&device, graphics_queue_family)?;

        let descriptors = DescriptorAllocator::new(&device)?;

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let markers = DebugMarkers::new(
            debug_utils_instance
                .as_ref()
                .map(|_| ash::ext::debug_utils::Device::new(&instance, &device)),
        );

        log::info!(
            "Vulkan context initialized ({} frames in flight, validation: {})",
            MAX_FRAMES_IN_FLIGHT,
            debug_messenger.is_some()
        );

        Ok(Self {
            entry,
            instance,
            debug_utils_instance,
            debug_messenger,
            markers,
            physical_device,
            properties,
            device,
            graphics_queue,
            graphics_queue_family,
            allocator,
            command_pool,
            descriptors,
            deletion_queue: DeletionQueue::new(),
            surface_loader,
            swapchain_loader,
            surface,
            current_frame: AtomicUsize::new(0),
        })
    }

    /// Number of ring slots for per-frame resources.
    pub fn frames_in_flight(&self) -> usize {
        MAX_FRAMES_IN_FLIGHT
    }

    /// Current frame ring index.
    pub fn current_frame(&self) -> usize {
        self.current_frame.load(Ordering::Relaxed)
    }

    /// Advance the frame ring index after a presented frame.
    ///
    /// A frame skipped due to an out-of-date swapchain must NOT advance the
    /// index: the slot's fence was reset but nothing was submitted against
    /// it, so the slot is simply reused.
    pub fn advance_frame(&self) {
        let next = (self.current_frame() + 1) % MAX_FRAMES_IN_FLIGHT;
        self.current_frame.store(next, Ordering::Relaxed);
    }

    /// Block until the device is idle.
    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }

    /// Run all pending context-wide teardowns in LIFO order.
    pub fn flush_deletion_queue(&self) {
        self.deletion_queue.flush(self);
    }

    /// Tear down the context. Waits for device idle, flushes the deletion
    /// queue, then destroys owned Vulkan objects in dependency order.
    pub fn destroy(self) {
        self.wait_idle();
        self.flush_deletion_queue();

        self.descriptors.destroy(&self.device);

        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }

        // The allocator holds device memory; it must drop before the device.
        if Arc::strong_count(&self.allocator) > 1 {
            log::warn!(
                "Memory allocator still shared at context destruction; \
                 leaked resources will not be freed"
            );
        }
        drop(self.allocator);

        unsafe {
            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils_instance, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }

        log::info!("Vulkan context destroyed");
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("current_frame", &self.current_frame())
            .field("frames_in_flight", &MAX_FRAMES_IN_FLIGHT)
            .finish()
    }
}
