// Swapchain - Window presentation
//
// A generation is everything whose lifetime is tied to one swapchain:
// images, views, render pass, pipeline, depth target, framebuffers,
// descriptor sets with their uniform buffers, and per-image command buffers.
// Generations are built whole and replaced whole. The manager's state says
// which generation (if any) is live and whether it still matches the surface.

use ash::vk;
use std::mem;
use std::sync::Arc;

use super::buffer::{GpuImage, ResourceAllocator};
use super::device::DeviceContext;
use super::pipeline::{self, GraphicsPipeline, PipelineBuilder, VertexLayout};
use super::shader::{DescriptorResources, ShaderReflector};
use super::surface::PresentationSurface;
use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::Device;
use crate::renderer::Mesh;
use crate::window::Window;

/// Prefer BGRA8 sRGB with the sRGB non-linear color space.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first().copied())
        .unwrap_or_default()
}

/// The preferred mode when available; FIFO otherwise, which every surface supports.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the framebuffer size clamped into the
/// supported range when the surface leaves it undefined.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer_size.0.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer_size.1.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means no cap).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Borrowed collaborators needed to build a generation.
pub struct SwapchainContext<'a> {
    pub device: &'a DeviceContext,
    pub surface: &'a PresentationSurface,
    pub allocator: &'a ResourceAllocator,
    pub reflector: &'a mut ShaderReflector,
    pub vertex_layout: &'a VertexLayout,
}

/// Every object tied to one swapchain. Null handles and `None` fields are
/// skipped on drop, so a half-built generation cleans up after itself.
pub struct SwapchainGeneration {
    device: Arc<dyn Device>,
    command_pool: vk::CommandPool,
    pub swapchain: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub render_pass: vk::RenderPass,
    pub pipeline: Option<GraphicsPipeline>,
    pub depth: Option<GpuImage>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub descriptors: Option<DescriptorResources>,
    pub command_buffers: Vec<vk::CommandBuffer>,
}

impl SwapchainGeneration {
    fn build(
        ctx: &mut SwapchainContext<'_>,
        preferred_present_mode: vk::PresentModeKHR,
        framebuffer_size: (u32, u32),
    ) -> Result<Self> {
        let device = ctx.device.device.clone();
        let support = ctx.surface.query_support(ctx.device.adapter)?;

        let format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(&support.capabilities, framebuffer_size);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            format.format,
            present_mode
        );

        let families = ctx.device.families;
        let family_indices = [families.graphics, families.present];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        let create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = device
            .create_swapchain(&create_info)
            .vk_context("Failed to create swapchain")?;

        let mut generation = SwapchainGeneration {
            device: device.clone(),
            command_pool: ctx.allocator.command_pool(),
            swapchain,
            extent,
            format,
            present_mode,
            images: Vec::new(),
            image_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            pipeline: None,
            depth: None,
            framebuffers: Vec::new(),
            descriptors: None,
            command_buffers: Vec::new(),
        };

        // Images and views
        generation.images = device
            .swapchain_images(swapchain)
            .vk_context("Failed to get swapchain images")?;
        for &image in &generation.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = device
                .create_image_view(&view_info)
                .vk_context("Failed to create swapchain image view")?;
            generation.image_views.push(view);
        }

        // Render pass and pipeline
        let depth_format = ctx.allocator.depth_format()?;
        generation.render_pass = pipeline::create_render_pass(device.as_ref(), format.format, depth_format)?;
        let set_layout = ctx.reflector.descriptor_set_layout()?;
        generation.pipeline = Some(
            PipelineBuilder::new(&device)
                .stages(ctx.reflector.stages())
                .set_layout(set_layout)
                .vertex_layout(ctx.vertex_layout.clone())
                .build(generation.render_pass, extent)?,
        );

        // Depth target and framebuffers
        let depth = ctx.allocator.create_depth_target(extent)?;
        let depth_view = depth.view();
        generation.depth = Some(depth);
        generation.framebuffers = pipeline::create_framebuffers(
            device.as_ref(),
            &generation.image_views,
            depth_view,
            generation.render_pass,
            extent,
        )?;

        // Descriptor sets and their uniform buffers
        let count = generation.images.len() as u32;
        generation.descriptors = Some(ctx.reflector.build_descriptor_sets(ctx.allocator, count)?);

        // Per-image command buffers
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(generation.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        generation.command_buffers = device
            .allocate_command_buffers(&alloc_info)
            .vk_context("Failed to allocate command buffers")?;

        log::info!("Created swapchain with {} images", count);
        Ok(generation)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn descriptor_set(&self, image: usize) -> Option<vk::DescriptorSet> {
        self.descriptors.as_ref().and_then(|d| d.sets.get(image).copied())
    }

    /// Re-record the command buffer of `image`: one render pass, one indexed draw.
    pub fn record(&self, image: usize, mesh: Option<&Mesh>, clear_color: [f32; 4]) -> Result<()> {
        let cmd = self.command_buffers[image];
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Err(RenderError::SwapchainUninitialized);
        };

        self.device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::empty())
            .vk_context("Failed to begin command buffer")?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            })
            .clear_values(&clear_values);

        self.device.cmd_begin_render_pass(cmd, &render_pass_info);
        self.device.cmd_bind_pipeline(cmd, pipeline.pipeline);
        if let Some(mesh) = mesh {
            self.device.cmd_bind_vertex_buffer(cmd, mesh.vertex_buffer.handle());
            self.device.cmd_bind_index_buffer(cmd, mesh.index_buffer.handle());
            if let Some(set) = self.descriptor_set(image) {
                self.device.cmd_bind_descriptor_set(cmd, pipeline.layout, set);
            }
            self.device.cmd_draw_indexed(cmd, mesh.index_count);
        }
        self.device.cmd_end_render_pass(cmd);

        self.device
            .end_command_buffer(cmd)
            .vk_context("Failed to record command buffer")
    }
}

impl Drop for SwapchainGeneration {
    fn drop(&mut self) {
        log::debug!("Destroying swapchain generation ({} images)", self.images.len());

        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
        drop(self.depth.take());
        if !self.command_buffers.is_empty() {
            self.device.free_command_buffers(self.command_pool, &self.command_buffers);
            self.command_buffers.clear();
        }
        drop(self.pipeline.take());
        if self.render_pass != vk::RenderPass::null() {
            self.device.destroy_render_pass(self.render_pass);
        }
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.device.destroy_swapchain(self.swapchain);
        drop(self.descriptors.take());
    }
}

/// Lifecycle of the swapchain. Every state that owns a generation carries it.
pub enum SwapchainState {
    Uninitialized,
    /// Built, not yet presented from
    Created(SwapchainGeneration),
    Presenting(SwapchainGeneration),
    /// No longer matches the surface; rebuilt before the next frame
    Stale(SwapchainGeneration),
    Destroyed,
}

impl SwapchainState {
    pub fn name(&self) -> &'static str {
        match self {
            SwapchainState::Uninitialized => "Uninitialized",
            SwapchainState::Created(_) => "Created",
            SwapchainState::Presenting(_) => "Presenting",
            SwapchainState::Stale(_) => "Stale",
            SwapchainState::Destroyed => "Destroyed",
        }
    }

    fn generation(&self) -> Option<&SwapchainGeneration> {
        match self {
            SwapchainState::Created(generation)
            | SwapchainState::Presenting(generation)
            | SwapchainState::Stale(generation) => Some(generation),
            SwapchainState::Uninitialized | SwapchainState::Destroyed => None,
        }
    }
}

pub struct SwapchainManager {
    state: SwapchainState,
    preferred_present_mode: vk::PresentModeKHR,
    generations_built: u64,
}

impl SwapchainManager {
    pub fn new(preferred_present_mode: vk::PresentModeKHR) -> Self {
        Self {
            state: SwapchainState::Uninitialized,
            preferred_present_mode,
            generations_built: 0,
        }
    }

    pub fn state(&self) -> &SwapchainState {
        &self.state
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.state, SwapchainState::Stale(_))
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(self.state, SwapchainState::Uninitialized)
    }

    /// Generations built so far, including the first.
    pub fn generations_built(&self) -> u64 {
        self.generations_built
    }

    pub fn generation(&self) -> Result<&SwapchainGeneration> {
        match &self.state {
            SwapchainState::Destroyed => Err(RenderError::SwapchainDestroyed),
            state => state.generation().ok_or(RenderError::SwapchainUninitialized),
        }
    }

    /// `Created` becomes `Presenting`; other states are left alone.
    pub fn mark_presenting(&mut self) {
        self.state = match mem::replace(&mut self.state, SwapchainState::Uninitialized) {
            SwapchainState::Created(generation) => SwapchainState::Presenting(generation),
            other => other,
        };
    }

    /// Any live generation becomes `Stale`.
    pub fn mark_stale(&mut self) {
        self.state = match mem::replace(&mut self.state, SwapchainState::Uninitialized) {
            SwapchainState::Created(generation) | SwapchainState::Presenting(generation) => {
                log::debug!("Swapchain marked stale");
                SwapchainState::Stale(generation)
            }
            other => other,
        };
    }

    /// Build the first generation, or replace the live one.
    pub fn create_swapchain(&mut self, ctx: &mut SwapchainContext<'_>, window: &dyn Window) -> Result<()> {
        if matches!(self.state, SwapchainState::Destroyed) {
            return Err(RenderError::SwapchainDestroyed);
        }
        self.replace_generation(ctx, window.framebuffer_size())
    }

    /// Wait out a minimized window, drain the GPU, tear down the live
    /// generation and build its successor. Returns `false` if the window
    /// asked to close while minimized; the swapchain then stays as it was.
    pub fn recreate_swapchain(&mut self, ctx: &mut SwapchainContext<'_>, window: &dyn Window) -> Result<bool> {
        if matches!(self.state, SwapchainState::Destroyed) {
            return Err(RenderError::SwapchainDestroyed);
        }

        let mut size = window.framebuffer_size();
        if size.0 == 0 || size.1 == 0 {
            log::info!("Window minimized, waiting before recreating swapchain");
        }
        while size.0 == 0 || size.1 == 0 {
            if window.should_close() {
                return Ok(false);
            }
            window.wait_events();
            size = window.framebuffer_size();
        }

        log::info!("Recreating swapchain for {}x{}", size.0, size.1);
        self.replace_generation(ctx, size)?;
        Ok(true)
    }

    fn replace_generation(&mut self, ctx: &mut SwapchainContext<'_>, framebuffer_size: (u32, u32)) -> Result<()> {
        if self.state.generation().is_some() {
            ctx.device.wait_idle()?;
        }
        // The old generation is fully destroyed before the new swapchain exists
        drop(mem::replace(&mut self.state, SwapchainState::Uninitialized));

        let generation = SwapchainGeneration::build(ctx, self.preferred_present_mode, framebuffer_size)?;
        self.generations_built += 1;
        self.state = SwapchainState::Created(generation);
        Ok(())
    }

    /// Drain the GPU and drop the live generation. Terminal.
    pub fn destroy(&mut self, device: &dyn Device) {
        if self.state.generation().is_some() {
            if let Err(e) = device.wait_idle() {
                log::error!("Failed to wait for device idle before swapchain teardown: {}", e);
            }
        }
        self.state = SwapchainState::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: vk::Extent2D, min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D {
                width: 2048,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_srgb_format() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[unorm, srgb]), srgb);
        assert_eq!(choose_surface_format(&[unorm]), unorm);
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let caps = capabilities(vk::Extent2D { width: 800, height: 600 }, 2, 3);
        assert_eq!(choose_extent(&caps, (1024, 768)), vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_extent_clamps_framebuffer_when_undefined() {
        let undefined = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let caps = capabilities(undefined, 2, 3);

        assert_eq!(choose_extent(&caps, (4000, 8)), vk::Extent2D { width: 2048, height: 16 });
        assert_eq!(choose_extent(&caps, (640, 480)), vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn test_image_count() {
        let extent = vk::Extent2D { width: 1, height: 1 };
        assert_eq!(choose_image_count(&capabilities(extent, 2, 3)), 3);
        assert_eq!(choose_image_count(&capabilities(extent, 2, 2)), 2);
        assert_eq!(choose_image_count(&capabilities(extent, 2, 0)), 3);
    }

    #[test]
    fn test_generation_access_by_state() {
        let mut manager = SwapchainManager::new(vk::PresentModeKHR::MAILBOX);
        assert!(matches!(manager.generation(), Err(RenderError::SwapchainUninitialized)));

        // Marking without a generation is a no-op
        manager.mark_stale();
        manager.mark_presenting();
        assert_eq!(manager.state().name(), "Uninitialized");

        let gpu = crate::gpu::mock::MockGpu::new(Default::default());
        let instance = gpu.instance();
        let device: Arc<dyn Device> = {
            use crate::gpu::Instance;
            let adapter = instance.enumerate_adapters().unwrap()[0];
            instance
                .create_device(adapter, &[0], &[], &vk::PhysicalDeviceFeatures::default())
                .unwrap()
        };
        manager.destroy(device.as_ref());
        assert!(matches!(manager.generation(), Err(RenderError::SwapchainDestroyed)));
    }
}
