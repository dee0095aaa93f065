//! Command pool and command buffer management.

use ash::vk;

use crate::context::Context;
use crate::error::{RenderError, RenderResult};

/// Create a command pool for graphics operations.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> RenderResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        RenderError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })?;

    Ok(pool)
}

/// Allocate primary command buffers from the context's pool, one per frame
/// in flight.
pub fn allocate_frame_command_buffers(
    context: &Context,
) -> RenderResult<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(context.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(context.frames_in_flight() as u32);

    let buffers = unsafe { context.device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
        RenderError::ResourceCreationFailed(format!(
            "Failed to allocate frame command buffers: {:?}",
            e
        ))
    })?;

    for (i, cmd) in buffers.iter().enumerate() {
        context
            .markers
            .set_object_name(*cmd, &format!("frame_commands[{}]", i));
    }

    Ok(buffers)
}

/// Record and synchronously submit a one-time command buffer.
///
/// Blocks on `queue_wait_idle` after submission. Acceptable only during
/// load (buffer uploads, mip generation, cubemap baking), never in the
/// steady-state frame loop, which overlaps CPU and GPU work via the frame
/// ring instead.
pub fn submit_one_time<F>(context: &Context, label: &str, record: F) -> RenderResult<()>
where
    F: FnOnce(vk::CommandBuffer) -> RenderResult<()>,
{
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(context.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { context.device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
        RenderError::Internal(format!("Failed to allocate one-time command buffer: {:?}", e))
    })?;
    let cmd = buffers[0];

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe { context.device.begin_command_buffer(cmd, &begin_info) }.map_err(|e| {
        RenderError::Internal(format!("Failed to begin one-time command buffer: {:?}", e))
    })?;

    context
        .markers
        .begin_region(cmd, label, [0.8, 0.8, 0.2, 1.0]);

    let recorded = record(cmd);

    context.markers.end_region(cmd);

    // End and free the buffer even if recording failed partway.
    let end_result = unsafe { context.device.end_command_buffer(cmd) };

    if let Err(e) = recorded {
        unsafe { context.device.free_command_buffers(context.command_pool, &buffers) };
        return Err(e);
    }
    end_result.map_err(|e| {
        RenderError::Internal(format!("Failed to end one-time command buffer: {:?}", e))
    })?;

    let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);

    unsafe {
        context
            .device
            .queue_submit(context.graphics_queue, &[submit_info], vk::Fence::null())
    }
    .map_err(|e| RenderError::Internal(format!("Failed to submit one-time commands: {:?}", e)))?;

    unsafe { context.device.queue_wait_idle(context.graphics_queue) }
        .map_err(|e| RenderError::Internal(format!("Failed to wait for one-time commands: {:?}", e)))?;

    unsafe { context.device.free_command_buffers(context.command_pool, &buffers) };

    Ok(())
}
