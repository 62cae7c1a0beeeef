//! Binding signature and graphics pipeline construction.
//!
//! The pipeline bundles shader stages, vertex input layout, fixed-function
//! state, and the render-target format into one immutable object, and the
//! whole bundle is validated when it is built. A mismatch (missing stage,
//! missing format, or a target format that differs from the swapchain's)
//! fails the build call, never a later draw.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

/// Binding signature for the pipeline.
///
/// This renderer binds nothing beyond the vertex input stream, so the
/// layout declares no descriptor sets and no push constants, the minimal
/// signature the draw path needs.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates the empty (vertex-input-only) layout.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
        debug!("created pipeline layout (no descriptors, no push constants)");
        Ok(Self { device, layout })
    }

    /// Returns the layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("destroyed pipeline layout");
    }
}

/// Rejects a pipeline whose declared color format differs from the target
/// it will render into. Catching the mismatch at build time is part of the
/// pipeline contract.
pub fn ensure_target_compatible(
    pipeline_format: vk::Format,
    target_format: vk::Format,
) -> RhiResult<()> {
    if pipeline_format == target_format {
        Ok(())
    } else {
        Err(RhiError::Pipeline(format!(
            "pipeline color format {:?} does not match render target format {:?}",
            pipeline_format, target_format
        )))
    }
}

/// An immutable graphics pipeline and the color format it was built for.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    color_format: vk::Format,
}

impl Pipeline {
    /// Returns the pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Returns the color attachment format the pipeline renders to.
    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("destroyed graphics pipeline");
    }
}

/// Builder for the graphics pipeline.
///
/// Defaults suit this renderer: triangle-list topology, filled polygons,
/// no culling, blending disabled, dynamic viewport and scissor, no depth.
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    color_format: Option<vk::Format>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            color_format: None,
        }
    }

    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes.extend_from_slice(attributes);
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: vk::FrontFace) -> Self {
        self.front_face = face;
        self
    }

    /// Declares the render-target color format the pipeline must match.
    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_format = Some(format);
        self
    }

    /// Validates the bundle and creates the pipeline.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let vertex_shader = self
            .vertex_shader
            .ok_or_else(|| RhiError::Pipeline("vertex shader is required".to_string()))?;
        let fragment_shader = self
            .fragment_shader
            .ok_or_else(|| RhiError::Pipeline("fragment shader is required".to_string()))?;
        let color_format = self
            .color_format
            .ok_or_else(|| RhiError::Pipeline("color attachment format is required".to_string()))?;

        if color_format == vk::Format::UNDEFINED {
            return Err(RhiError::Pipeline(
                "color attachment format must not be UNDEFINED".to_string(),
            ));
        }

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only the counts are fixed here.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        };
        let blend_attachments = [blend_attachment];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| RhiError::Pipeline(format!("pipeline creation failed: {:?}", e)))?
        };

        info!("graphics pipeline created ({:?} target)", color_format);

        Ok(Pipeline {
            device,
            pipeline: pipelines[0],
            color_format,
        })
    }
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_target_format_is_accepted() {
        assert!(ensure_target_compatible(
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::B8G8R8A8_UNORM
        )
        .is_ok());
    }

    #[test]
    fn mismatched_target_format_fails_at_build_time() {
        // The mismatch must surface when the pipeline is constructed, not
        // when the first draw is recorded.
        let result =
            ensure_target_compatible(vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_UNORM);
        assert!(matches!(result, Err(RhiError::Pipeline(_))));
    }

    #[test]
    fn builder_defaults_suit_a_plain_triangle() {
        let builder = GraphicsPipelineBuilder::new();
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(builder.cull_mode, vk::CullModeFlags::NONE);
        assert!(builder.color_format.is_none());
    }
}
