//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::debug;
use crate::error::{RenderError, RenderResult};

/// Required Vulkan API version.
///
/// The renderer relies on core 1.3 features (dynamic rendering,
/// synchronization2) and 1.2 descriptor indexing.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Create a Vulkan instance with optional validation layers.
///
/// Returns the instance, debug messenger (if validation enabled), and debug
/// utils extension.
pub fn create_instance(
    entry: &ash::Entry,
    display_handle: raw_window_handle::RawDisplayHandle,
    validation_enabled: bool,
) -> RenderResult<(
    ash::Instance,
    Option<vk::DebugUtilsMessengerEXT>,
    Option<ash::ext::debug_utils::Instance>,
)> {
    // Check if validation layers are available
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new("Emberlight").unwrap();
    let engine_name = CString::new("Emberlight Engine").unwrap();

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    // Surface extensions for the current windowing system
    let mut extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| {
            RenderError::InitializationFailed(format!(
                "Failed to enumerate surface extensions: {:?}",
                e
            ))
        })?
        .to_vec();

    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const i8> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        RenderError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    // Setup debug messenger if validation is enabled
    let (debug_messenger, debug_utils) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        let messenger = debug::create_debug_messenger(&debug_utils)?;
        (Some(messenger), Some(debug_utils))
    } else {
        (None, None)
    };

    Ok((instance, debug_messenger, debug_utils))
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    for layer in &available_layers {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        if name == VALIDATION_LAYER_NAME {
            return true;
        }
    }

    false
}
