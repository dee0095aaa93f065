//! Shadow map rendering.
//!
//! Depth-only pipeline with front-face culling and constant+slope depth
//! bias. Each light owns a ring of shadow maps (one per frame in flight);
//! the pass renders one single-layer depth pass per shadow layer (one for
//! directional lights, six cube faces for point lights), then hands the map
//! to the lighting pass in `SHADER_READ_ONLY`.

use std::path::Path;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::context::Context;
use crate::error::RenderResult;
use crate::pipelines::{load_shader_module, GraphicsPipeline, GraphicsPipelineBuilder};
use crate::scene::{Light, LightItem, RenderItem, Vertex};

use super::{depth_attachment, render_area, set_viewport_scissor};

/// Depth format used for every shadow map.
pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Push constants for the shadow vertex stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowPush {
    pub light_space: Mat4,
    pub model: Mat4,
}

/// The shadow pass.
pub struct ShadowPass {
    pipeline: GraphicsPipeline,
    resolution: u32,
}

impl ShadowPass {
    /// Create the depth-only pipeline.
    pub fn new(context: &Context, shader_dir: &str, resolution: u32) -> RenderResult<Self> {
        let vertex_shader =
            load_shader_module(context, Path::new(shader_dir).join("shadow.vert.spv"))?;

        // Front-face culling trades peter-panning for reduced shadow acne;
        // the bias values cover the rest.
        let pipeline = GraphicsPipelineBuilder::new(vertex_shader)
            .vertex_input(Vertex::input_bindings(), Vertex::input_attributes())
            .depth(SHADOW_MAP_FORMAT, true)
            .depth_bias(1.25, 1.75)
            .cull_mode(vk::CullModeFlags::FRONT)
            .push_constants(
                vk::ShaderStageFlags::VERTEX,
                0,
                std::mem::size_of::<ShadowPush>() as u32,
            )
            .label("shadow pipeline")
            .build(context)?;

        unsafe {
            context.device.destroy_shader_module(vertex_shader, None);
        }

        Ok(Self {
            pipeline,
            resolution,
        })
    }

    /// Shadow map resolution (square).
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Create the per-frame shadow map ring for lights that do not have one
    /// yet.
    ///
    /// Called after the frame is recorded: a light submitted for the first
    /// time is skipped during `record` (it has no map) and shades
    /// unshadowed for exactly that one frame.
    pub fn ensure_shadow_maps(
        &self,
        context: &Context,
        lights: &[LightItem],
    ) -> RenderResult<()> {
        for (index, item) in lights.iter().enumerate() {
            let mut light = item.light.lock();
            if light.has_shadow_maps() {
                continue;
            }
            let kind = light.kind();
            let mut maps = Vec::with_capacity(context.frames_in_flight());
            for frame in 0..context.frames_in_flight() {
                let map = Light::shadow_map_builder(kind, self.resolution)
                    .label(format!("shadow map light{} frame{}", index, frame))
                    .build(context)?;
                maps.push(map);
            }
            light.shadow_maps = maps;
            log::debug!("Created shadow map ring for light {} ({:?})", index, kind);
        }
        Ok(())
    }

    /// Record shadow rendering for every light with a valid map this frame.
    pub fn record(
        &self,
        context: &Context,
        cmd: vk::CommandBuffer,
        frame: usize,
        items: &[RenderItem],
        lights: &[LightItem],
        scene_radius: f32,
    ) {
        let device = &context.device;
        context
            .markers
            .begin_region(cmd, "shadow pass", [0.3, 0.3, 0.3, 1.0]);

        for item in lights {
            let mut light = item.light.lock();
            if !light.has_shadow_maps() {
                // Newly spawned light: unshadowed for this frame.
                log::trace!("Skipping shadow render for light without maps");
                continue;
            }

            let layer_count = light.shadow_layer_count() as usize;
            let matrices = light.matrices(scene_radius).clone();

            let Some(map) = light.shadow_map_mut(frame) else {
                continue;
            };

            // Contents are fully rewritten; discard so the first barrier of
            // the frame is NONE -> EARLY_FRAGMENT_TESTS with no wait.
            map.forget_contents();
            map.transition_layout(device, cmd, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);

            let extent = vk::Extent2D {
                width: self.resolution,
                height: self.resolution,
            };

            for face in 0..layer_count {
                let depth = depth_attachment(
                    map.layer_views[face],
                    vk::AttachmentLoadOp::CLEAR,
                );
                let rendering_info = vk::RenderingInfo::default()
                    .render_area(render_area(extent))
                    .layer_count(1)
                    .depth_attachment(&depth);

                let light_space = matrices.light_space(face);

                unsafe {
                    device.cmd_begin_rendering(cmd, &rendering_info);
                    device.cmd_bind_pipeline(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.pipeline.pipeline,
                    );
                }
                set_viewport_scissor(device, cmd, extent);

                for item in items {
                    let mesh = &item.model.mesh;
                    unsafe {
                        device.cmd_bind_vertex_buffers(
                            cmd,
                            0,
                            &[mesh.vertex_buffer.buffer],
                            &[0],
                        );
                        device.cmd_bind_index_buffer(
                            cmd,
                            mesh.index_buffer.buffer,
                            0,
                            vk::IndexType::UINT32,
                        );
                    }

                    let push = ShadowPush {
                        light_space,
                        model: item.transform,
                    };

                    for submesh in &mesh.submeshes {
                        if submesh.alpha_tested {
                            continue;
                        }
                        unsafe {
                            device.cmd_push_constants(
                                cmd,
                                self.pipeline.layout,
                                vk::ShaderStageFlags::VERTEX,
                                0,
                                bytemuck::bytes_of(&push),
                            );
                            device.cmd_draw_indexed(
                                cmd,
                                submesh.index_count,
                                1,
                                submesh.index_offset,
                                0,
                                0,
                            );
                        }
                    }
                }

                unsafe {
                    device.cmd_end_rendering(cmd);
                }
            }

            // The lighting pass samples this map later in the same frame.
            map.transition_layout(device, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }

        context.markers.end_region(cmd);
    }

    /// Destroy the pipeline. Shadow maps are owned by their lights.
    pub fn destroy(&mut self, context: &Context) {
        self.pipeline.destroy(context);
    }
}
