//! Batched descriptor set updates.

use ash::vk;

/// Collects descriptor writes and submits them in one `vkUpdateDescriptorSets`
/// call.
///
/// Info structs are stored by index until [`update`] so the write array can
/// be built with stable pointers at submission time.
///
/// [`update`]: DescriptorWriter::update
#[derive(Default)]
pub struct DescriptorWriter {
    buffer_infos: Vec<Vec<vk::DescriptorBufferInfo>>,
    image_infos: Vec<Vec<vk::DescriptorImageInfo>>,
    writes: Vec<PendingWrite>,
}

struct PendingWrite {
    set: vk::DescriptorSet,
    binding: u32,
    array_element: u32,
    ty: vk::DescriptorType,
    info: InfoSlot,
}

enum InfoSlot {
    Buffer(usize),
    Image(usize),
}

impl DescriptorWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buffer descriptor write.
    pub fn write_buffer(
        &mut self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> &mut Self {
        let index = self.buffer_infos.len();
        self.buffer_infos.push(vec![vk::DescriptorBufferInfo {
            buffer,
            offset,
            range,
        }]);
        self.writes.push(PendingWrite {
            set,
            binding,
            array_element: 0,
            ty,
            info: InfoSlot::Buffer(index),
        });
        self
    }

    /// Queue a single image descriptor write.
    pub fn write_image(
        &mut self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        let index = self.image_infos.len();
        self.image_infos.push(vec![vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: layout,
        }]);
        self.writes.push(PendingWrite {
            set,
            binding,
            array_element: 0,
            ty,
            info: InfoSlot::Image(index),
        });
        self
    }

    /// Queue a contiguous image-array write starting at `first_element`.
    ///
    /// Used for the variable-count shadow map and bindless texture arrays,
    /// where every element shares one sampler and layout.
    pub fn write_image_array(
        &mut self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        first_element: u32,
        views: &[vk::ImageView],
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        if views.is_empty() {
            return self;
        }
        let index = self.image_infos.len();
        self.image_infos.push(
            views
                .iter()
                .map(|&view| vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                })
                .collect(),
        );
        self.writes.push(PendingWrite {
            set,
            binding,
            array_element: first_element,
            ty,
            info: InfoSlot::Image(index),
        });
        self
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether no writes are queued.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Submit all queued writes in one call and clear the writer.
    pub fn update(&mut self, device: &ash::Device) {
        if self.writes.is_empty() {
            return;
        }

        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|w| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(w.set)
                    .dst_binding(w.binding)
                    .dst_array_element(w.array_element)
                    .descriptor_type(w.ty);
                match w.info {
                    InfoSlot::Buffer(i) => write.buffer_info(&self.buffer_infos[i]),
                    InfoSlot::Image(i) => write.image_info(&self.image_infos[i]),
                }
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }

        self.writes.clear();
        self.buffer_infos.clear();
        self.image_infos.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_array_write_is_skipped() {
        let mut writer = DescriptorWriter::new();
        writer.write_image_array(
            vk::DescriptorSet::null(),
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            0,
            &[],
            vk::Sampler::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(writer.is_empty());
    }

    #[test]
    fn test_writes_accumulate() {
        let mut writer = DescriptorWriter::new();
        writer.write_buffer(
            vk::DescriptorSet::null(),
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::Buffer::null(),
            0,
            64,
        );
        writer.write_image(
            vk::DescriptorSet::null(),
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ImageView::null(),
            vk::Sampler::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(writer.len(), 2);
    }
}
