//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use crate::error::{RenderError, RenderResult};

/// Select the best physical device for rendering.
///
/// Prefers discrete GPUs over integrated GPUs and requires sampler
/// anisotropy plus presentation support on the graphics queue family.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        RenderError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(RenderError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    // Score and select best device
    let mut best: Option<(vk::PhysicalDevice, u32)> = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };

        // Check for required features
        if features.sampler_anisotropy == vk::FALSE {
            continue;
        }

        let Some(queue_family) =
            find_graphics_present_queue_family(instance, device, surface_loader, surface)
        else {
            continue;
        };

        // Score the device
        let mut score = 0;

        // Prefer discrete GPUs
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }

        // Add score based on max texture size
        score += properties.limits.max_image_dimension2_d / 1024;

        if score > best_score {
            best_score = score;
            best = Some((device, queue_family));
        }

        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );
    }

    best.ok_or_else(|| RenderError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Find a queue family that supports both graphics and presentation.
fn find_graphics_present_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    for (index, family) in queue_families.iter().enumerate() {
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }
        let present_supported = unsafe {
            surface_loader
                .get_physical_device_surface_support(physical_device, index as u32, surface)
                .unwrap_or(false)
        };
        if present_supported {
            return Some(index as u32);
        }
    }

    None
}

/// Create a logical device with required features and extensions.
///
/// Enables Vulkan 1.3 dynamic rendering and synchronization2, plus the 1.2
/// descriptor-indexing features the bindless texture table relies on
/// (partially-bound, variable-count, update-after-bind).
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> RenderResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities);

    let queue_create_infos = [queue_create_info];

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(true)
        .depth_clamp(true);

    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .separate_depth_stencil_layouts(true);

    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    let device =
        unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

    Ok(device)
}
