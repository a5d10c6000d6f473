// =============================================================================
// VKFRAME DEMO - textured, spinning cube
// =============================================================================
//
// FRAME FLOW (see backend::sync for the details):
// 1. Recreate the swapchain if the previous frame found it stale
// 2. Wait for the frame slot's fence
// 3. Acquire a swapchain image
// 4. Wait for the image's previous owner, refresh uniforms, record
// 5. Submit, then present
//
// Shaders are compiled from shaders/*.{vert,frag} by build.rs when glslc is
// on the PATH.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3, Vec4};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::WindowAttributes,
};

use vkframe::backend::pipeline::VertexLayout;
use vkframe::backend::ShaderBinding;
use vkframe::config::Config;
use vkframe::gpu::vulkan::VulkanInstance;
use vkframe::{FrameDataSource, FrameOutcome, Renderer, Window, WinitWindow};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vkframe demo");
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.result
}

/// RUST_LOG wins over the configured level
fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.parse_filters(&config.debug.log_level);
    }
    builder.init();
}

// =============================================================================
// SCENE DATA
// =============================================================================

/// position, color, uv
#[rustfmt::skip]
const CUBE_VERTICES: [[f32; 8]; 8] = [
    [-0.5, -0.5,  0.5,  1.0, 0.3, 0.3,  0.0, 0.0],
    [ 0.5, -0.5,  0.5,  0.3, 1.0, 0.3,  1.0, 0.0],
    [ 0.5,  0.5,  0.5,  0.3, 0.3, 1.0,  1.0, 1.0],
    [-0.5,  0.5,  0.5,  1.0, 1.0, 0.3,  0.0, 1.0],
    [-0.5, -0.5, -0.5,  1.0, 0.3, 1.0,  1.0, 0.0],
    [ 0.5, -0.5, -0.5,  0.3, 1.0, 1.0,  0.0, 0.0],
    [ 0.5,  0.5, -0.5,  1.0, 1.0, 1.0,  0.0, 1.0],
    [-0.5,  0.5, -0.5,  0.5, 0.5, 0.5,  1.0, 1.0],
];

#[rustfmt::skip]
const CUBE_INDICES: [u32; 36] = [
    0, 1, 2, 2, 3, 0, // front
    5, 4, 7, 7, 6, 5, // back
    4, 0, 3, 3, 7, 4, // left
    1, 5, 6, 6, 2, 1, // right
    3, 2, 6, 6, 7, 3, // top
    4, 5, 1, 1, 0, 4, // bottom
];

const TEXTURE_SIZE: u32 = 64;

fn checkerboard(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            if ((x / 8) + (y / 8)) % 2 == 0 {
                [235, 235, 235, 255]
            } else {
                [40, 40, 48, 255]
            }
        })
        .collect()
}

/// MVP for binding 0, tint for binding 1
struct SpinningCube {
    start: Instant,
    aspect: f32,
}

impl FrameDataSource for SpinningCube {
    fn fill(&mut self, _frame_index: u64, binding: &ShaderBinding) -> Vec<u8> {
        let t = self.start.elapsed().as_secs_f32();
        match binding.binding {
            0 => {
                let model = Mat4::from_rotation_y(t) * Mat4::from_rotation_x(t * 0.5);
                let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.5), Vec3::ZERO, Vec3::Y);
                let mut projection = Mat4::perspective_rh(45f32.to_radians(), self.aspect, 0.1, 10.0);
                // Vulkan clip space has Y pointing down
                projection.y_axis.y *= -1.0;
                bytemuck::bytes_of(&(projection * view * model)).to_vec()
            }
            1 => {
                let pulse = 0.85 + 0.15 * (t * 2.0).sin();
                bytemuck::bytes_of(&Vec4::new(pulse, pulse, pulse, 1.0)).to_vec()
            }
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer goes before the window it
/// presents to.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<WinitWindow>,
    scene: SpinningCube,
    result: Result<()>,

    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        let aspect = config.window.width as f32 / config.window.height.max(1) as f32;
        Self {
            config,
            renderer: None,
            window: None,
            scene: SpinningCube { start: now, aspect },
            result: Ok(()),
            frame_count: 0,
            last_fps_update: now,
        }
    }

    /// Instance, renderer, shaders, mesh and texture, in that order.
    fn init_renderer(&mut self, window: &WinitWindow) -> Result<Renderer> {
        let (display, _) = window.raw_handles()?;
        let instance = VulkanInstance::new(&self.config.window.title, self.config.debug.validation_layers, display)?;

        let mut renderer = Renderer::new(instance, window, self.config.renderer_config())?;

        renderer
            .add_shader_stage(&self.config.assets.vertex_shader, vk::ShaderStageFlags::VERTEX)
            .context("Failed to load vertex shader (is glslc installed?)")?;
        renderer
            .add_shader_stage(&self.config.assets.fragment_shader, vk::ShaderStageFlags::FRAGMENT)
            .context("Failed to load fragment shader (is glslc installed?)")?;

        renderer.upload_mesh(
            bytemuck::cast_slice(&CUBE_VERTICES),
            &CUBE_INDICES,
            VertexLayout::packed_f32(&[3, 3, 2]),
        )?;
        renderer.set_texture(2, TEXTURE_SIZE, TEXTURE_SIZE, &checkerboard(TEXTURE_SIZE))?;
        renderer.create_swapchain(window)?;

        Ok(renderer)
    }

    fn render_frame(&mut self) -> Result<()> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };
        // Nothing to present to while minimized
        if window.is_minimized() {
            return Ok(());
        }

        let (width, height) = window.framebuffer_size();
        self.scene.aspect = width as f32 / height as f32;

        if let FrameOutcome::Presented { .. } = renderer.draw_frame(window, &mut self.scene)? {
            self.update_fps();
        }
        Ok(())
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(window) = self.window.as_ref() {
                window
                    .inner()
                    .set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.result = Err(error);
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(attributes) {
            Ok(w) => WinitWindow::new(Arc::new(w)),
            Err(e) => return self.fail(event_loop, anyhow::anyhow!("Failed to create window: {}", e)),
        };

        match self.init_renderer(&window) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize renderer")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(window) = self.window.as_ref() {
                    window.request_close();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(window) = self.window.as_ref() {
                    window.mark_resized();
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e.context("Render error"));
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.inner().request_redraw();
        }
    }
}
