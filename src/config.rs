//! Startup configuration for the renderer.

/// Configuration for initializing the renderer.
///
/// Consumed once at startup; resolution changes afterwards are driven by
/// window events, not by mutating this struct.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title.
    pub title: String,
    /// Initial window width in pixels.
    pub width: u32,
    /// Initial window height in pixels.
    pub height: u32,
    /// Enable vsync (FIFO present mode).
    pub vsync: bool,
    /// Enable Vulkan validation layers when available.
    pub validation: bool,
    /// Maximum number of lights in the light buffer.
    pub max_lights: u32,
    /// Shadow map resolution (square, per light).
    pub shadow_map_size: u32,
    /// Directory containing compiled SPIR-V shader bytecode.
    pub shader_dir: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Emberlight".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            validation: cfg!(debug_assertions),
            max_lights: 256,
            shadow_map_size: 2048,
            shader_dir: "shaders".to_string(),
        }
    }
}
