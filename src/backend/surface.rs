// Presentation surface
//
// Owns the OS surface for the window and answers capability queries
// against it. Destroyed after every swapchain built on it.

use ash::vk;
use std::sync::Arc;

use crate::error::{Result, VkResultExt};
use crate::gpu::Instance;
use crate::window::Window;

/// Capability snapshot taken once per swapchain (re)creation.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct PresentationSurface {
    instance: Arc<dyn Instance>,
    surface: vk::SurfaceKHR,
}

impl PresentationSurface {
    pub fn new(instance: Arc<dyn Instance>, window: &dyn Window) -> Result<Self> {
        let (display, window) = window.raw_handles()?;
        let surface = instance
            .create_surface(display, window)
            .vk_context("Failed to create window surface")?;

        Ok(Self { instance, surface })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn supports_present(&self, adapter: vk::PhysicalDevice, queue_family: u32) -> Result<bool> {
        self.instance
            .surface_support(adapter, queue_family, self.surface)
            .vk_context("Failed to query surface support")
    }

    pub fn query_support(&self, adapter: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        Ok(SurfaceSupport {
            capabilities: self
                .instance
                .surface_capabilities(adapter, self.surface)
                .vk_context("Failed to query surface capabilities")?,
            formats: self
                .instance
                .surface_formats(adapter, self.surface)
                .vk_context("Failed to query surface formats")?,
            present_modes: self
                .instance
                .surface_present_modes(adapter, self.surface)
                .vk_context("Failed to query surface present modes")?,
        })
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        self.instance.destroy_surface(self.surface);
    }
}
