//! Compute pipeline builder.

use std::ffi::CString;

use ash::vk;

use crate::context::Context;
use crate::error::{RenderError, RenderResult};

/// A compute pipeline and its layout.
pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl ComputePipeline {
    /// Destroy the pipeline and its layout. The device must be idle.
    pub fn destroy(&mut self, context: &Context) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                context.device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                context.device.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

/// Fluent builder for [`ComputePipeline`].
pub struct ComputePipelineBuilder {
    shader: vk::ShaderModule,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
    label: String,
}

impl ComputePipelineBuilder {
    /// Create a builder for a compute shader module.
    pub fn new(shader: vk::ShaderModule) -> Self {
        Self {
            shader,
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            label: String::new(),
        }
    }

    /// Set descriptor set layouts.
    pub fn set_layouts(mut self, layouts: &[vk::DescriptorSetLayout]) -> Self {
        self.set_layouts = layouts.to_vec();
        self
    }

    /// Add a push constant range visible to the compute stage.
    pub fn push_constants(mut self, size: u32) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size,
        });
        self
    }

    /// Attach a debug label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Create the pipeline layout and pipeline.
    pub fn build(self, context: &Context) -> RenderResult<ComputePipeline> {
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);

        let layout = unsafe { context.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to create compute pipeline layout: {:?}",
                    e
                ))
            })?;

        let entry = CString::new("main").unwrap();

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.shader)
            .name(&entry);

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let pipelines = unsafe {
            context.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|(_, e)| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to create compute pipeline: {:?}",
                e
            ))
        })?;

        if !self.label.is_empty() {
            context.markers.set_object_name(pipelines[0], &self.label);
        }

        Ok(ComputePipeline {
            pipeline: pipelines[0],
            layout,
        })
    }
}
