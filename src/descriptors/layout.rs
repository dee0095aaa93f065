//! Descriptor set layout builder.

use ash::vk;

use crate::error::{RenderError, RenderResult};

/// A descriptor set layout plus the metadata needed to allocate sets from it.
pub struct DescriptorSetLayout {
    /// Raw layout handle.
    pub layout: vk::DescriptorSetLayout,
    /// Whether the last binding is a variable-count array.
    pub has_variable_count: bool,
}

impl DescriptorSetLayout {
    /// Destroy the layout. The device must be idle or the layout unused.
    pub fn destroy(&mut self, device: &ash::Device) {
        if self.layout != vk::DescriptorSetLayout::null() {
            unsafe {
                device.destroy_descriptor_set_layout(self.layout, None);
            }
            self.layout = vk::DescriptorSetLayout::null();
        }
    }
}

/// Fluent builder for descriptor set layouts.
///
/// Plain bindings use `binding()`; the bindless texture table uses
/// `variable_binding()`, which must be the highest-numbered binding in the
/// set (Vulkan requires the variable-count binding to be last).
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<(u32, vk::DescriptorType, u32, vk::ShaderStageFlags)>,
    binding_flags: Vec<vk::DescriptorBindingFlags>,
    has_variable_count: bool,
}

impl DescriptorSetLayoutBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-descriptor binding.
    pub fn binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push((binding, ty, 1, stages));
        self.binding_flags.push(vk::DescriptorBindingFlags::empty());
        self
    }

    /// Add a fixed-size array binding.
    pub fn array_binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push((binding, ty, count, stages));
        self.binding_flags.push(vk::DescriptorBindingFlags::empty());
        self
    }

    /// Add a variable-count array binding with `max_count` capacity.
    ///
    /// The binding is created `PARTIALLY_BOUND | VARIABLE_DESCRIPTOR_COUNT |
    /// UPDATE_AFTER_BIND`, so descriptors can be appended as assets stream
    /// in without rebuilding pipelines. The actual bound count is chosen at
    /// set allocation time.
    pub fn variable_binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        max_count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push((binding, ty, max_count, stages));
        self.binding_flags.push(
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
        );
        self.has_variable_count = true;
        self
    }

    /// Whether any binding carries update-after-bind semantics.
    pub fn needs_update_after_bind_pool(&self) -> bool {
        self.binding_flags
            .iter()
            .any(|f| f.contains(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND))
    }

    /// Build the layout.
    pub fn build(self, device: &ash::Device) -> RenderResult<DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .bindings
            .iter()
            .map(|&(binding, ty, count, stages)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(ty)
                    .descriptor_count(count)
                    .stage_flags(stages)
            })
            .collect();

        // An update-after-bind binding requires the matching pool/layout flag.
        let flags = if self.needs_update_after_bind_pool() {
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };

        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&self.binding_flags);

        let create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .flags(flags)
            .push_next(&mut binding_flags_info);

        let layout = unsafe { device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to create descriptor set layout: {:?}",
                    e
                ))
            })?;

        Ok(DescriptorSetLayout {
            layout,
            has_variable_count: self.has_variable_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_binding_sets_flags() {
        let builder = DescriptorSetLayoutBuilder::new()
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)
            .variable_binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                256,
                vk::ShaderStageFlags::FRAGMENT,
            );

        assert!(builder.needs_update_after_bind_pool());
        assert!(builder.has_variable_count);
        assert_eq!(builder.bindings.len(), 2);
        assert_eq!(builder.bindings[1].2, 256);
        assert!(builder.binding_flags[1]
            .contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND));
        assert!(builder.binding_flags[1]
            .contains(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT));
    }

    #[test]
    fn test_plain_bindings_need_no_special_pool() {
        let builder = DescriptorSetLayoutBuilder::new()
            .binding(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE)
            .array_binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                4,
                vk::ShaderStageFlags::FRAGMENT,
            );

        assert!(!builder.needs_update_after_bind_pool());
        assert!(!builder.has_variable_count);
    }
}
