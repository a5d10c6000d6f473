// Backend module - rendering core on top of the GPU seam
//
// Leaves first: device and surface, then allocation and shader reflection,
// then pipeline, swapchain generations and the frame loop.

pub mod buffer;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::{GpuBuffer, GpuImage, ResourceAllocator, Texture};
pub use device::{AdapterSelection, DeviceContext, QueueFamilyIndices};
pub use shader::{BindingKind, ShaderBinding, ShaderReflector};
pub use surface::{PresentationSurface, SurfaceSupport};
pub use swapchain::{SwapchainGeneration, SwapchainManager, SwapchainState};
pub use sync::{FrameSlot, FrameSyncEngine};
