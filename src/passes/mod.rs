//! The render passes that make up a frame.
//!
//! Recorded in fixed order into one command buffer per frame ring slot:
//! shadow → depth pre-pass + G-buffer → lighting → tone-map (graphics) →
//! auto-exposure (compute) → UI overlay. Each pass owns its pipelines,
//! descriptor sets and per-frame GPU resources, and issues the layout
//! transitions for every resource it hands to the next pass; barriers at
//! pass boundaries are the only cross-pass synchronization.

mod blit;
mod geometry;
mod lighting;
mod shadow;
mod ui;

pub use blit::{BlitPass, LuminancePush};
pub use geometry::{GBufferTargets, GeometryPass, MaterialPush};
pub use lighting::LightingPass;
pub use shadow::{ShadowPass, ShadowPush};
pub use ui::UiPass;

use ash::vk;

/// Set a full-extent viewport and scissor.
pub(crate) fn set_viewport_scissor(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    extent: vk::Extent2D,
) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    };
    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
    }
}

/// Color attachment info for dynamic rendering.
pub(crate) fn color_attachment(
    view: vk::ImageView,
    load_op: vk::AttachmentLoadOp,
    clear: [f32; 4],
) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: clear },
        })
}

/// Depth attachment info for dynamic rendering.
pub(crate) fn depth_attachment(
    view: vk::ImageView,
    load_op: vk::AttachmentLoadOp,
) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        })
}

/// Full-extent rendering area.
pub(crate) fn render_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}
