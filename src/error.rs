// Error taxonomy for the rendering core
//
// Fatal setup errors, resource errors and device failures all surface here.
// Swapchain staleness never does: it is absorbed by the swapchain/sync modules.

use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no suitable GPU found (needs swapchain support, anisotropic filtering, graphics + present queues)")]
    NoSuitableDevice,

    #[error("{what}: {result}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },

    #[error("no memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoSuitableMemory {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("none of the candidate depth formats supports optimal-tiling depth attachments")]
    NoSupportedDepthFormat,

    #[error("failed to load shader {path:?}: {reason}")]
    ShaderLoad { path: PathBuf, reason: String },

    #[error("failed to reflect shader {path:?}: {reason}")]
    Reflection { path: PathBuf, reason: String },

    #[error("descriptor set layout already built, no more shader stages can be added")]
    LayoutFrozen,

    #[error("sampler binding {binding} has no texture assigned")]
    MissingTexture { binding: u32 },

    #[error("swapchain has been destroyed")]
    SwapchainDestroyed,

    #[error("swapchain has not been created yet")]
    SwapchainUninitialized,

    #[error("texture of {width}x{height} needs {expected} RGBA8 bytes, got {actual}")]
    TextureSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("buffers must be at least one byte")]
    EmptyBuffer,

    #[error("window error: {0}")]
    Window(String),
}

impl RenderError {
    /// True for the conditions the frame loop treats as "recreate and retry".
    pub fn is_stale(result: vk::Result) -> bool {
        result == vk::Result::ERROR_OUT_OF_DATE_KHR || result == vk::Result::SUBOPTIMAL_KHR
    }
}

/// Attach a description to a raw Vulkan result, like `anyhow::Context`
pub trait VkResultExt<T> {
    fn vk_context(self, what: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn vk_context(self, what: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { what, result })
    }
}
