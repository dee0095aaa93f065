//! Validation layer messenger and GPU debug labels.
//!
//! Named object labels and colored command-buffer regions are attached at
//! every major operation so external GPU debuggers (RenderDoc, Nsight) can
//! present a readable frame. They have no behavioral effect.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::error::{RenderError, RenderResult};

/// Create a debug messenger for validation layer output.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> RenderResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(|e| {
            RenderError::InitializationFailed(format!(
                "Failed to create debug messenger: {:?}",
                e
            ))
        })?;

    Ok(messenger)
}

/// Debug callback function for validation layer messages.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: This function is only called by the Vulkan driver with valid data
    let message = if callback_data.is_null() {
        String::from("(no message)")
    } else {
        // SAFETY: callback_data is guaranteed to be valid by the Vulkan driver
        let data = unsafe { *callback_data };
        if data.p_message.is_null() {
            String::from("(null message)")
        } else {
            // SAFETY: p_message is a valid null-terminated string from the Vulkan driver
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::debug!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            log::trace!("[Vulkan {}] {}", type_str, message);
        }
    }

    vk::FALSE
}

/// Device-level debug label helpers.
///
/// All methods are no-ops when the debug utils extension was not loaded
/// (validation disabled), so call sites never need to branch.
pub struct DebugMarkers {
    device_ext: Option<ash::ext::debug_utils::Device>,
}

impl DebugMarkers {
    /// Create label helpers. Pass `None` when validation is disabled.
    pub fn new(device_ext: Option<ash::ext::debug_utils::Device>) -> Self {
        Self { device_ext }
    }

    /// Attach a human-readable name to a Vulkan object handle.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(ext) = &self.device_ext else {
            return;
        };
        let Ok(name_c) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name_c);
        unsafe {
            let _ = ext.set_debug_utils_object_name(&info);
        }
    }

    /// Open a colored region in the command buffer (pair with [`end_region`]).
    ///
    /// [`end_region`]: DebugMarkers::end_region
    pub fn begin_region(&self, cmd: vk::CommandBuffer, label: &str, color: [f32; 4]) {
        let Some(ext) = &self.device_ext else {
            return;
        };
        let Ok(label_c) = CString::new(label) else {
            return;
        };
        let info = vk::DebugUtilsLabelEXT::default()
            .label_name(&label_c)
            .color(color);
        unsafe {
            ext.cmd_begin_debug_utils_label(cmd, &info);
        }
    }

    /// Close the innermost open region.
    pub fn end_region(&self, cmd: vk::CommandBuffer) {
        let Some(ext) = &self.device_ext else {
            return;
        };
        unsafe {
            ext.cmd_end_debug_utils_label(cmd);
        }
    }

    /// Insert a single label into the command stream.
    pub fn insert_label(&self, cmd: vk::CommandBuffer, label: &str, color: [f32; 4]) {
        let Some(ext) = &self.device_ext else {
            return;
        };
        let Ok(label_c) = CString::new(label) else {
            return;
        };
        let info = vk::DebugUtilsLabelEXT::default()
            .label_name(&label_c)
            .color(color);
        unsafe {
            ext.cmd_insert_debug_utils_label(cmd, &info);
        }
    }
}
