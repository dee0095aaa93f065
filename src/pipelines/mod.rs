//! Shader modules and pipeline builders.
//!
//! All graphics pipelines use dynamic rendering: attachment formats are
//! declared at pipeline creation, no `VkRenderPass` objects are involved
//! outside the UI overlay.

mod compute;
mod graphics;
mod shader;

pub use compute::{ComputePipeline, ComputePipelineBuilder};
pub use graphics::{GraphicsPipeline, GraphicsPipelineBuilder};
pub use shader::load_shader_module;
