//! Thin winit window shell.
//!
//! The windowing/input layer is an external collaborator; this module only
//! creates the window the renderer draws into.

use std::sync::Arc;

use winit::dpi::LogicalSize;
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};

/// Create the event loop and window described by `config`.
pub fn create_window(config: &RendererConfig) -> RenderResult<(EventLoop<()>, Arc<Window>)> {
    let event_loop = EventLoop::new().map_err(|e| {
        RenderError::InitializationFailed(format!("Failed to create event loop: {}", e))
    })?;

    let window = WindowBuilder::new()
        .with_title(&config.title)
        .with_inner_size(LogicalSize::new(config.width, config.height))
        .build(&event_loop)
        .map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to create window: {}", e))
        })?;

    Ok((event_loop, Arc::new(window)))
}
