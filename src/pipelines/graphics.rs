//! Graphics pipeline builder for dynamic rendering.

use std::ffi::CString;

use ash::vk;

use crate::context::Context;
use crate::error::{RenderError, RenderResult};

/// A graphics pipeline and its layout.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
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

/// Fluent builder for [`GraphicsPipeline`].
///
/// Viewport and scissor are always dynamic state, so pipelines survive
/// swapchain recreation unchanged.
pub struct GraphicsPipelineBuilder {
    vertex_shader: vk::ShaderModule,
    fragment_shader: Option<vk::ShaderModule>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
    color_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
    depth_bias: Option<(f32, f32)>,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    blend_enable: bool,
    label: String,
}

impl GraphicsPipelineBuilder {
    /// Create a builder for a vertex+fragment pipeline.
    pub fn new(vertex_shader: vk::ShaderModule) -> Self {
        Self {
            vertex_shader,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            color_formats: Vec::new(),
            depth_format: None,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            depth_bias: None,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend_enable: false,
            label: String::new(),
        }
    }

    /// Set the fragment shader. Depth-only pipelines omit it.
    pub fn fragment_shader(mut self, module: vk::ShaderModule) -> Self {
        self.fragment_shader = Some(module);
        self
    }

    /// Set the vertex input description.
    pub fn vertex_input(
        mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self
    }

    /// Set descriptor set layouts (set index = position in slice).
    pub fn set_layouts(mut self, layouts: &[vk::DescriptorSetLayout]) -> Self {
        self.set_layouts = layouts.to_vec();
        self
    }

    /// Add a push constant range.
    pub fn push_constants(mut self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        });
        self
    }

    /// Set color attachment formats.
    pub fn color_formats(mut self, formats: &[vk::Format]) -> Self {
        self.color_formats = formats.to_vec();
        self
    }

    /// Enable depth test + write against a depth attachment.
    pub fn depth(mut self, format: vk::Format, write: bool) -> Self {
        self.depth_format = Some(format);
        self.depth_test = true;
        self.depth_write = write;
        self
    }

    /// Set the depth compare op.
    pub fn depth_compare(mut self, op: vk::CompareOp) -> Self {
        self.depth_compare = op;
        self
    }

    /// Enable constant + slope-scaled depth bias (shadow rendering).
    pub fn depth_bias(mut self, constant: f32, slope: f32) -> Self {
        self.depth_bias = Some((constant, slope));
        self
    }

    /// Set the cull mode.
    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.cull_mode = mode;
        self
    }

    /// Enable standard alpha blending on all color attachments.
    pub fn alpha_blend(mut self) -> Self {
        self.blend_enable = true;
        self
    }

    /// Attach a debug label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Create the pipeline layout and pipeline.
    pub fn build(self, context: &Context) -> RenderResult<GraphicsPipeline> {
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);

        let layout = unsafe { context.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to create pipeline layout: {:?}",
                    e
                ))
            })?;

        let entry = CString::new("main").unwrap();

        let mut shader_stages = vec![vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(self.vertex_shader)
            .name(&entry)];

        if let Some(fragment) = self.fragment_shader {
            shader_stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment)
                    .name(&entry),
            );
        }

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Dynamic viewport and scissor
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(self.depth_bias.is_some())
            .depth_bias_constant_factor(self.depth_bias.map_or(0.0, |(c, _)| c))
            .depth_bias_slope_factor(self.depth_bias.map_or(0.0, |(_, s)| s));

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = self
            .color_formats
            .iter()
            .map(|_| {
                if self.blend_enable {
                    vk::PipelineColorBlendAttachmentState::default()
                        .color_write_mask(vk::ColorComponentFlags::RGBA)
                        .blend_enable(true)
                        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                        .color_blend_op(vk::BlendOp::ADD)
                        .src_alpha_blend_factor(vk::BlendFactor::ONE)
                        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                        .alpha_blend_op(vk::BlendOp::ADD)
                } else {
                    vk::PipelineColorBlendAttachmentState::default()
                        .color_write_mask(vk::ColorComponentFlags::RGBA)
                        .blend_enable(false)
                }
            })
            .collect();

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let depth_attachment_format = self.depth_format.unwrap_or(vk::Format::UNDEFINED);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&self.color_formats)
            .depth_attachment_format(depth_attachment_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            context.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|(_, e)| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to create graphics pipeline: {:?}",
                e
            ))
        })?;

        if !self.label.is_empty() {
            context.markers.set_object_name(pipelines[0], &self.label);
        }

        Ok(GraphicsPipeline {
            pipeline: pipelines[0],
            layout,
        })
    }
}
