//! GPU buffer wrapper and builder.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use crate::commands;
use crate::context::Context;
use crate::error::{RenderError, RenderResult};

/// An owning wrapper around a Vulkan buffer and its memory allocation.
pub struct Buffer {
    /// Raw buffer handle.
    pub buffer: vk::Buffer,
    /// Memory allocation; `None` after destroy.
    allocation: Option<Allocation>,
    /// Buffer size in bytes.
    pub size: vk::DeviceSize,
}

impl Buffer {
    /// Start building a buffer.
    pub fn builder(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> BufferBuilder {
        BufferBuilder {
            size,
            usage,
            location: MemoryLocation::GpuOnly,
            label: String::new(),
        }
    }

    /// Write bytes into a host-visible buffer at `offset`.
    ///
    /// The buffer must have been built with a CPU-visible memory location.
    /// This is the in-place update path: the light SSBO and per-frame
    /// uniform buffers are rewritten every frame without reallocation.
    pub fn write_bytes(&mut self, data: &[u8], offset: usize) -> RenderResult<()> {
        let allocation = self.allocation.as_mut().ok_or_else(|| {
            RenderError::Internal("write to destroyed buffer".to_string())
        })?;
        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            RenderError::InvalidParameter(
                "buffer memory is not host-visible; build with CpuToGpu".to_string(),
            )
        })?;
        if offset + data.len() > mapped.len() {
            return Err(RenderError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                mapped.len()
            )));
        }
        mapped[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Write a Pod value into a host-visible buffer at `offset`.
    pub fn write<T: bytemuck::Pod>(&mut self, value: &T, offset: usize) -> RenderResult<()> {
        self.write_bytes(bytemuck::bytes_of(value), offset)
    }

    /// Destroy the buffer and free its memory.
    pub fn destroy(&mut self, context: &Context) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = context.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer allocation: {}", e);
            }
        }
        if self.buffer != vk::Buffer::null() {
            unsafe {
                context.device.destroy_buffer(self.buffer, None);
            }
            self.buffer = vk::Buffer::null();
        }
    }
}

/// Fluent builder for [`Buffer`].
pub struct BufferBuilder {
    /// Buffer size in bytes.
    pub size: vk::DeviceSize,
    /// Usage flags.
    pub usage: vk::BufferUsageFlags,
    /// Memory location; defaults to `GpuOnly`.
    pub location: MemoryLocation,
    /// Debug label.
    pub label: String,
}

impl BufferBuilder {
    /// Use host-visible memory for direct CPU writes.
    pub fn host_visible(mut self) -> Self {
        self.location = MemoryLocation::CpuToGpu;
        self
    }

    /// Attach a debug label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Create the buffer and bind its memory.
    pub fn build(self, context: &Context) -> RenderResult<Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(self.size)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { context.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let mem_requirements = unsafe { context.device.get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = context.allocator.lock();
            allocator
                .allocate(&AllocationCreateDesc {
                    name: if self.label.is_empty() {
                        "buffer"
                    } else {
                        &self.label
                    },
                    requirements: mem_requirements,
                    location: self.location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to allocate buffer memory: {}",
                        e
                    ))
                })?
        };

        unsafe {
            context
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to bind buffer memory: {:?}", e))
        })?;

        if !self.label.is_empty() {
            context.markers.set_object_name(buffer, &self.label);
        }

        Ok(Buffer {
            buffer,
            allocation: Some(allocation),
            size: self.size,
        })
    }

    /// Create a device-local buffer initialized with `data`, uploaded through
    /// a staging buffer and a one-time command submission.
    pub fn build_with_data(mut self, context: &Context, data: &[u8]) -> RenderResult<Buffer> {
        self.usage |= vk::BufferUsageFlags::TRANSFER_DST;
        let label = self.label.clone();
        let size = self.size;
        let buffer = self.build(context)?;

        let mut staging = Buffer::builder(size, vk::BufferUsageFlags::TRANSFER_SRC)
            .host_visible()
            .label(format!("{} staging", label))
            .build(context)?;
        staging.write_bytes(data, 0)?;

        commands::submit_one_time(context, "buffer upload", |cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: data.len() as vk::DeviceSize,
            };
            unsafe {
                context
                    .device
                    .cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            }
            Ok(())
        })?;

        staging.destroy(context);

        Ok(buffer)
    }
}
