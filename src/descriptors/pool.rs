//! Descriptor pool management.

use ash::vk;

use crate::error::{RenderError, RenderResult};

use super::DescriptorSetLayout;

/// Wraps the context-wide descriptor pool.
///
/// Created with `FREE_DESCRIPTOR_SET` so variable-count sets can be freed
/// and reallocated when their bound count changes, and with
/// `UPDATE_AFTER_BIND` so the bindless texture table can be written after
/// binding.
pub struct DescriptorAllocator {
    pool: vk::DescriptorPool,
}

impl DescriptorAllocator {
    /// Create the pool with generous default sizes.
    pub fn new(device: &ash::Device) -> RenderResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1000,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 100,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 100,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 4000,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(
                vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
                    | vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            )
            .max_sets(1000)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to create descriptor pool: {:?}",
                e
            ))
        })?;

        Ok(Self { pool })
    }

    /// Allocate a descriptor set for a fixed layout.
    pub fn allocate(
        &self,
        device: &ash::Device,
        layout: &DescriptorSetLayout,
    ) -> RenderResult<vk::DescriptorSet> {
        let layouts = [layout.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to allocate descriptor set: {:?}",
                e
            ))
        })?;

        Ok(sets[0])
    }

    /// Allocate a descriptor set whose variable-count binding is bound to
    /// exactly `variable_count` descriptors.
    ///
    /// The count is fixed for the lifetime of the set; growing the bound
    /// array requires freeing the set and allocating a new one.
    pub fn allocate_variable(
        &self,
        device: &ash::Device,
        layout: &DescriptorSetLayout,
        variable_count: u32,
    ) -> RenderResult<vk::DescriptorSet> {
        debug_assert!(layout.has_variable_count);

        let counts = [variable_count];
        let mut count_info = vk::DescriptorSetVariableDescriptorCountAllocateInfo::default()
            .descriptor_counts(&counts);

        let layouts = [layout.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts)
            .push_next(&mut count_info);

        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to allocate variable-count descriptor set ({}): {:?}",
                variable_count, e
            ))
        })?;

        Ok(sets[0])
    }

    /// Free a descriptor set back to the pool.
    pub fn free(&self, device: &ash::Device, set: vk::DescriptorSet) {
        unsafe {
            let _ = device.free_descriptor_sets(self.pool, &[set]);
        }
    }

    /// Destroy the pool and every set allocated from it.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.pool, None);
        }
    }
}
