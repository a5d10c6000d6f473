// Renderer - wires the backend together
//
// Creation order: surface, adapter selection, logical device, allocator,
// shader reflector, frame slots. The swapchain is built lazily on the first
// frame, after shaders, mesh and textures have been registered. Teardown
// runs in the reverse order through field declaration order.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use crate::backend::buffer::{GpuBuffer, ResourceAllocator, Texture};
use crate::backend::device::{self, DeviceContext};
use crate::backend::pipeline::VertexLayout;
use crate::backend::shader::{Reflect, ShaderReflector, SpirqReflect};
use crate::backend::surface::PresentationSurface;
use crate::backend::swapchain::{SwapchainContext, SwapchainManager};
use crate::backend::sync::{FrameDataSource, FrameInputs, FrameOutcome, FrameSyncEngine};
use crate::error::Result;
use crate::gpu::Instance;
use crate::window::Window;

/// Library-facing settings
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub max_frames_in_flight: usize,
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            present_mode: vk::PresentModeKHR::MAILBOX,
            clear_color: [0.1, 0.2, 0.8, 1.0],
        }
    }
}

/// Indexed geometry in device-local memory
pub struct Mesh {
    pub vertex_buffer: GpuBuffer,
    pub index_buffer: GpuBuffer,
    pub index_count: u32,
    pub layout: VertexLayout,
}

pub struct Renderer {
    sync: FrameSyncEngine,
    swapchain: SwapchainManager,
    reflector: ShaderReflector,
    mesh: Option<Mesh>,
    allocator: ResourceAllocator,
    surface: PresentationSurface,
    device: DeviceContext,
    config: RendererConfig,
}

impl Renderer {
    pub fn new(instance: Arc<dyn Instance>, window: &dyn Window, config: RendererConfig) -> Result<Self> {
        Self::with_reflect(instance, window, config, Box::new(SpirqReflect))
    }

    /// Like `new`, with a custom shader reflection source.
    pub fn with_reflect(
        instance: Arc<dyn Instance>,
        window: &dyn Window,
        config: RendererConfig,
        reflect: Box<dyn Reflect>,
    ) -> Result<Self> {
        log::info!("Initializing renderer...");

        let surface = PresentationSurface::new(instance.clone(), window)?;
        let selection = device::select_adapter(instance.as_ref(), &surface)?;
        let device = DeviceContext::new(instance, selection)?;
        let allocator = ResourceAllocator::new(&device)?;
        let reflector = ShaderReflector::with_reflect(device.device.clone(), reflect);
        let sync = FrameSyncEngine::new(
            device.device.clone(),
            device.graphics_queue,
            device.present_queue,
            config.max_frames_in_flight,
        )?;

        log::info!("Renderer initialized ({} frames in flight)", sync.frames_in_flight());

        Ok(Self {
            sync,
            swapchain: SwapchainManager::new(config.present_mode),
            reflector,
            mesh: None,
            allocator,
            surface,
            device,
            config,
        })
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn sync(&self) -> &FrameSyncEngine {
        &self.sync
    }

    pub fn reflector(&self) -> &ShaderReflector {
        &self.reflector
    }

    pub fn reflector_mut(&mut self) -> &mut ShaderReflector {
        &mut self.reflector
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    pub fn add_shader_stage(&mut self, path: impl AsRef<Path>, stage: vk::ShaderStageFlags) -> Result<()> {
        self.reflector.add_stage(path, stage)
    }

    /// Upload vertex bytes and `u32` indices through staging buffers.
    pub fn upload_mesh(&mut self, vertices: &[u8], indices: &[u32], layout: VertexLayout) -> Result<()> {
        let vertex_buffer = self
            .allocator
            .upload_via_staging(vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer = self
            .allocator
            .upload_via_staging(bytemuck::cast_slice(indices), vk::BufferUsageFlags::INDEX_BUFFER)?;

        log::info!("Uploaded mesh: {} vertex bytes, {} indices", vertices.len(), indices.len());

        self.mesh = Some(Mesh {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            layout,
        });
        Ok(())
    }

    /// Upload an RGBA8 texture and bind it to a sampler binding.
    pub fn set_texture(&mut self, binding: u32, width: u32, height: u32, rgba: &[u8]) -> Result<Arc<Texture>> {
        let texture = Arc::new(self.allocator.create_texture(width, height, rgba)?);
        self.reflector.set_texture(binding, texture.clone());
        Ok(texture)
    }

    /// Build the first swapchain generation. `draw_frame` calls this on
    /// demand; calling it up front surfaces setup errors earlier.
    pub fn create_swapchain(&mut self, window: &dyn Window) -> Result<()> {
        let empty = VertexLayout::default();
        let mut ctx = SwapchainContext {
            device: &self.device,
            surface: &self.surface,
            allocator: &self.allocator,
            reflector: &mut self.reflector,
            vertex_layout: self.mesh.as_ref().map_or(&empty, |m| &m.layout),
        };
        self.swapchain.create_swapchain(&mut ctx, window)?;
        self.sync
            .reset_image_tracking(self.swapchain.generation()?.image_count());
        Ok(())
    }

    /// Render and present one frame. Staleness shows up as `Skipped`, never
    /// as an error.
    pub fn draw_frame(&mut self, window: &dyn Window, data: &mut dyn FrameDataSource) -> Result<FrameOutcome> {
        if self.swapchain.is_uninitialized() {
            self.create_swapchain(window)?;
        }

        let empty = VertexLayout::default();
        let mut ctx = SwapchainContext {
            device: &self.device,
            surface: &self.surface,
            allocator: &self.allocator,
            reflector: &mut self.reflector,
            vertex_layout: self.mesh.as_ref().map_or(&empty, |m| &m.layout),
        };
        let inputs = FrameInputs {
            window,
            mesh: self.mesh.as_ref(),
            clear_color: self.config.clear_color,
            data,
        };
        self.sync.draw_frame(&mut self.swapchain, &mut ctx, inputs)
    }

    /// Pump events and draw until the window asks to close. Returns the
    /// number of presented frames.
    pub fn run(&mut self, window: &dyn Window, data: &mut dyn FrameDataSource) -> Result<u64> {
        let mut presented = 0;
        loop {
            window.poll_events();
            if window.should_close() {
                break;
            }
            if let FrameOutcome::Presented { .. } = self.draw_frame(window, data)? {
                presented += 1;
            }
        }

        self.device.wait_idle()?;
        log::info!("Render loop finished after {} frames", presented);
        Ok(presented)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Destroying renderer...");

        if let Err(e) = self.sync.wait_idle() {
            log::error!("Failed to wait for device idle: {}", e);
        }
        self.swapchain.destroy(self.device.device.as_ref());
    }
}
