//! SPIR-V shader module loading.
//!
//! Shaders ship as compiled bytecode files loaded by path (the GLSL sources
//! live under `shaders/` next to them). A missing or malformed file is a
//! fatal setup failure.

use std::io::Cursor;
use std::path::Path;

use ash::vk;

use crate::context::Context;
use crate::error::{RenderError, RenderResult};

/// Load compiled SPIR-V bytecode from `path` and create a shader module.
pub fn load_shader_module(
    context: &Context,
    path: impl AsRef<Path>,
) -> RenderResult<vk::ShaderModule> {
    let path = path.as_ref();
    let path_str = path.display().to_string();

    let bytes = std::fs::read(path).map_err(|e| RenderError::ShaderLoadFailed {
        path: path_str.clone(),
        reason: e.to_string(),
    })?;

    let code = ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|e| {
        RenderError::ShaderLoadFailed {
            path: path_str.clone(),
            reason: format!("invalid SPIR-V: {}", e),
        }
    })?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

    let module = unsafe { context.device.create_shader_module(&create_info, None) }.map_err(
        |e| RenderError::ShaderLoadFailed {
            path: path_str.clone(),
            reason: format!("module creation failed: {:?}", e),
        },
    )?;

    context.markers.set_object_name(module, &path_str);
    log::debug!("Loaded shader module {}", path_str);

    Ok(module)
}
