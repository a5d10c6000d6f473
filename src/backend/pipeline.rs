// Graphics pipeline creation
//
// Render pass (color + depth, single subpass), vertex input layout, fixed
// function state and the pipeline layout over the reflected descriptor set.
// Everything here is rebuilt with each swapchain generation.

use ash::vk;
use std::sync::Arc;

use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::Device;

/// Interleaved vertex format bound at binding 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    /// `(location, format, offset)`
    pub attributes: Vec<(u32, vk::Format, u32)>,
}

impl VertexLayout {
    /// Tightly packed `f32` vectors, one attribute per entry of `components`.
    pub fn packed_f32(components: &[u32]) -> Self {
        let mut offset = 0;
        let attributes = components
            .iter()
            .enumerate()
            .map(|(location, &count)| {
                let format = match count {
                    1 => vk::Format::R32_SFLOAT,
                    2 => vk::Format::R32G32_SFLOAT,
                    3 => vk::Format::R32G32B32_SFLOAT,
                    _ => vk::Format::R32G32B32A32_SFLOAT,
                };
                let attribute = (location as u32, format, offset);
                offset += count.min(4) * 4;
                attribute
            })
            .collect();

        Self {
            stride: offset,
            attributes,
        }
    }

    fn descriptions(
        &self,
    ) -> (
        Vec<vk::VertexInputBindingDescription>,
        Vec<vk::VertexInputAttributeDescription>,
    ) {
        if self.stride == 0 {
            return (Vec::new(), Vec::new());
        }

        let binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        let attributes = self
            .attributes
            .iter()
            .map(|&(location, format, offset)| vk::VertexInputAttributeDescription {
                location,
                binding: 0,
                format,
                offset,
            })
            .collect();

        (vec![binding], attributes)
    }
}

/// Render pass with the swapchain image at attachment 0 and depth at 1
pub fn create_render_pass(
    device: &dyn Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let depth_attachment = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref);

    // Wait for the acquired image and the previous depth writes
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);

    let attachments = [color_attachment, depth_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];
    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    device
        .create_render_pass(&render_pass_info)
        .vk_context("Failed to create render pass")
}

/// One framebuffer per swapchain image view, all sharing the depth view
pub fn create_framebuffers(
    device: &dyn Device,
    image_views: &[vk::ImageView],
    depth_view: vk::ImageView,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());
    for &view in image_views {
        let attachments = [view, depth_view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match device.create_framebuffer(&framebuffer_info) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(result) => {
                for framebuffer in framebuffers {
                    device.destroy_framebuffer(framebuffer);
                }
                return Err(RenderError::Vulkan {
                    what: "Failed to create framebuffer",
                    result,
                });
            }
        }
    }
    Ok(framebuffers)
}

/// Pipeline and its layout, destroyed together
pub struct GraphicsPipeline {
    device: Arc<dyn Device>,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.pipeline);
        self.device.destroy_pipeline_layout(self.layout);
    }
}

pub struct PipelineBuilder<'a> {
    device: &'a Arc<dyn Device>,
    stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    set_layout: vk::DescriptorSetLayout,
    vertex_layout: VertexLayout,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(device: &'a Arc<dyn Device>) -> Self {
        Self {
            device,
            stages: Vec::new(),
            set_layout: vk::DescriptorSetLayout::null(),
            vertex_layout: VertexLayout::default(),
        }
    }

    pub fn stages(mut self, stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>) -> Self {
        self.stages = stages;
        self
    }

    pub fn set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.set_layout = layout;
        self
    }

    pub fn vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    pub fn build(self, render_pass: vk::RenderPass, extent: vk::Extent2D) -> Result<GraphicsPipeline> {
        let entry_point = c"main";
        let shader_stages: Vec<_> = self
            .stages
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage)
                    .module(module)
                    .name(entry_point)
            })
            .collect();

        let (bindings, attributes) = self.vertex_layout.descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport is baked in; the pipeline is rebuilt with each generation
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let set_layouts = [self.set_layout];
        let layout_info = if self.set_layout == vk::DescriptorSetLayout::null() {
            vk::PipelineLayoutCreateInfo::default()
        } else {
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts)
        };
        let layout = self
            .device
            .create_pipeline_layout(&layout_info)
            .vk_context("Failed to create pipeline layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipeline = match self.device.create_graphics_pipeline(&pipeline_info) {
            Ok(pipeline) => pipeline,
            Err(result) => {
                self.device.destroy_pipeline_layout(layout);
                return Err(RenderError::Vulkan {
                    what: "Failed to create graphics pipeline",
                    result,
                });
            }
        };

        Ok(GraphicsPipeline {
            device: self.device.clone(),
            pipeline,
            layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_layout_offsets() {
        let layout = VertexLayout::packed_f32(&[3, 3, 2]);
        assert_eq!(layout.stride, 32);
        assert_eq!(
            layout.attributes,
            vec![
                (0, vk::Format::R32G32B32_SFLOAT, 0),
                (1, vk::Format::R32G32B32_SFLOAT, 12),
                (2, vk::Format::R32G32_SFLOAT, 24),
            ]
        );
    }

    #[test]
    fn test_empty_layout_has_no_bindings() {
        let (bindings, attributes) = VertexLayout::default().descriptions();
        assert!(bindings.is_empty());
        assert!(attributes.is_empty());
    }
}
