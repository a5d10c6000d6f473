// vkframe - GPU resource lifecycle and frame synchronization over Vulkan
//
//   gpu/       the mockable API seam, its ash implementation and the mock
//   backend/   device, surface, allocation, shaders, pipeline, swapchain, sync
//   renderer   wires the backend together and runs the frame loop

pub mod backend;
pub mod config;
pub mod error;
pub mod gpu;
pub mod renderer;
pub mod window;

pub use backend::sync::{FrameDataSource, FrameOutcome};
pub use error::{RenderError, Result};
pub use renderer::{Mesh, Renderer, RendererConfig};
pub use window::{Window, WinitWindow};
