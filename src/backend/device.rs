// Device context - adapter selection and logical device
//
// Walks the adapters the instance reports and keeps the first one that can
// render and present to our surface. Creates exactly one logical device with
// one queue per distinct family.

use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::sync::Arc;

use super::surface::PresentationSurface;
use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::{Device, Instance};

const REQUIRED_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Distinct families, ascending. A shared graphics/present family
    /// appears once.
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// The adapter chosen by `select_adapter`, consumed by `DeviceContext::new`.
#[derive(Debug, Clone)]
pub struct AdapterSelection {
    pub adapter: vk::PhysicalDevice,
    pub families: QueueFamilyIndices,
    pub name: String,
}

/// Pick the first adapter that passes every check.
pub fn select_adapter(instance: &dyn Instance, surface: &PresentationSurface) -> Result<AdapterSelection> {
    let adapters = instance
        .enumerate_adapters()
        .vk_context("Failed to enumerate physical devices")?;

    if adapters.is_empty() {
        log::error!("No Vulkan-capable GPU found");
        return Err(RenderError::NoSuitableDevice);
    }

    for adapter in adapters {
        let name = adapter_name(&instance.adapter_properties(adapter));
        match check_adapter(instance, surface, adapter) {
            Ok(Some(families)) => {
                log::info!("Selected GPU: {}", name);
                return Ok(AdapterSelection {
                    adapter,
                    families,
                    name,
                });
            }
            Ok(None) => log::debug!("Skipping GPU {}: missing required capabilities", name),
            Err(e) => log::debug!("Skipping GPU {}: {}", name, e),
        }
    }

    Err(RenderError::NoSuitableDevice)
}

fn check_adapter(
    instance: &dyn Instance,
    surface: &PresentationSurface,
    adapter: vk::PhysicalDevice,
) -> Result<Option<QueueFamilyIndices>> {
    // Device extensions
    let extensions = instance
        .adapter_extensions(adapter)
        .vk_context("Failed to enumerate device extensions")?;
    let has_extensions = REQUIRED_EXTENSIONS
        .iter()
        .all(|required| extensions.iter().any(|e| e.as_bytes() == required.to_bytes()));
    if !has_extensions {
        return Ok(None);
    }

    // Features
    if instance.adapter_features(adapter).sampler_anisotropy != vk::TRUE {
        return Ok(None);
    }

    // Queue families
    let Some(families) = find_queue_families(instance, surface, adapter)? else {
        return Ok(None);
    };

    // Surface support
    let support = surface.query_support(adapter)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Ok(None);
    }

    Ok(Some(families))
}

fn find_queue_families(
    instance: &dyn Instance,
    surface: &PresentationSurface,
    adapter: vk::PhysicalDevice,
) -> Result<Option<QueueFamilyIndices>> {
    let mut graphics = None;
    let mut present = None;

    for (index, family) in instance.queue_families(adapter).iter().enumerate() {
        let index = index as u32;
        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if present.is_none() && surface.supports_present(adapter, index)? {
            present = Some(index);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }

    Ok(graphics.zip(present).map(|(graphics, present)| QueueFamilyIndices { graphics, present }))
}

fn adapter_name(properties: &vk::PhysicalDeviceProperties) -> String {
    properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_string())
}

/// Logical device plus everything cached from the physical adapter.
pub struct DeviceContext {
    pub device: Arc<dyn Device>,
    pub instance: Arc<dyn Instance>,
    pub adapter: vk::PhysicalDevice,
    pub families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    /// Consumes the selection, so the logical device exists once per adapter choice.
    pub fn new(instance: Arc<dyn Instance>, selection: AdapterSelection) -> Result<Self> {
        let properties = instance.adapter_properties(selection.adapter);
        let memory_properties = instance.memory_properties(selection.adapter);

        log::info!(
            "GPU: {} (API {}.{}.{})",
            selection.name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version),
        );

        let device = Self::create_logical_device(instance.as_ref(), &selection)?;
        let graphics_queue = device.queue(selection.families.graphics);
        let present_queue = device.queue(selection.families.present);

        Ok(Self {
            device,
            instance,
            adapter: selection.adapter,
            families: selection.families,
            graphics_queue,
            present_queue,
            properties,
            memory_properties,
        })
    }

    fn create_logical_device(instance: &dyn Instance, selection: &AdapterSelection) -> Result<Arc<dyn Device>> {
        let queue_families = selection.families.unique();
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };

        log::debug!("Creating logical device with queue families {:?}", queue_families);

        instance
            .create_device(selection.adapter, &queue_families, &REQUIRED_EXTENSIONS, &features)
            .vk_context("Failed to create logical device")
    }

    /// First candidate whose optimal-tiling features include `features`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        candidates.iter().copied().find(|&format| {
            self.instance
                .format_properties(self.adapter, format)
                .optimal_tiling_features
                .contains(features)
        })
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle().vk_context("Failed to wait for device idle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::{MockAdapter, MockConfig, MockGpu, MockWindow};

    fn surface_for(gpu: &MockGpu) -> (Arc<dyn Instance>, PresentationSurface) {
        let instance: Arc<dyn Instance> = gpu.instance();
        let surface = PresentationSurface::new(instance.clone(), &MockWindow::new(640, 480)).unwrap();
        (instance, surface)
    }

    #[test]
    fn test_unique_families_shared() {
        let families = QueueFamilyIndices { graphics: 0, present: 0 };
        assert_eq!(families.unique(), vec![0]);
        assert!(families.is_shared());
    }

    #[test]
    fn test_unique_families_split() {
        let families = QueueFamilyIndices { graphics: 2, present: 1 };
        assert_eq!(families.unique(), vec![1, 2]);
        assert!(!families.is_shared());
    }

    #[test]
    fn test_first_qualifying_adapter_wins() {
        let mut no_swapchain = MockAdapter::capable("no swapchain");
        no_swapchain.extensions.clear();
        let mut no_anisotropy = MockAdapter::capable("no anisotropy");
        no_anisotropy.sampler_anisotropy = false;

        let gpu = MockGpu::new(MockConfig {
            adapters: vec![
                no_swapchain,
                no_anisotropy,
                MockAdapter::capable("first good"),
                MockAdapter::capable("second good"),
            ],
            ..Default::default()
        });
        let (instance, surface) = surface_for(&gpu);

        let selection = select_adapter(instance.as_ref(), &surface).unwrap();
        assert_eq!(selection.name, "first good");
    }

    #[test]
    fn test_failed_adapter_query_skips_adapter() {
        let mut lost = MockAdapter::capable("lost");
        lost.lost = true;

        let gpu = MockGpu::new(MockConfig {
            adapters: vec![lost, MockAdapter::capable("healthy")],
            ..Default::default()
        });
        let (instance, surface) = surface_for(&gpu);

        let selection = select_adapter(instance.as_ref(), &surface).unwrap();
        assert_eq!(selection.name, "healthy");
    }

    #[test]
    fn test_rejects_adapter_without_present_or_formats() {
        let mut no_present = MockAdapter::capable("no present");
        no_present.queue_families = vec![(vk::QueueFlags::GRAPHICS, false)];
        let mut no_formats = MockAdapter::capable("no formats");
        no_formats.formats.clear();
        let mut no_modes = MockAdapter::capable("no present modes");
        no_modes.present_modes.clear();

        let gpu = MockGpu::new(MockConfig {
            adapters: vec![no_present, no_formats, no_modes],
            ..Default::default()
        });
        let (instance, surface) = surface_for(&gpu);

        let result = select_adapter(instance.as_ref(), &surface);
        assert!(matches!(result, Err(RenderError::NoSuitableDevice)));
    }

    #[test]
    fn test_split_families_create_two_queues() {
        let mut split = MockAdapter::capable("split");
        split.queue_families = vec![(vk::QueueFlags::GRAPHICS, false), (vk::QueueFlags::TRANSFER, true)];
        let gpu = MockGpu::new(MockConfig {
            adapters: vec![split],
            ..Default::default()
        });
        let (instance, surface) = surface_for(&gpu);

        let selection = select_adapter(instance.as_ref(), &surface).unwrap();
        assert_eq!(selection.families, QueueFamilyIndices { graphics: 0, present: 1 });

        let context = DeviceContext::new(instance, selection).unwrap();
        assert_eq!(gpu.device_queue_families(), vec![0, 1]);
        assert_ne!(context.graphics_queue, context.present_queue);
    }

    #[test]
    fn test_shared_family_creates_one_queue() {
        let gpu = MockGpu::new(MockConfig::default());
        let (instance, surface) = surface_for(&gpu);

        let selection = select_adapter(instance.as_ref(), &surface).unwrap();
        let context = DeviceContext::new(instance, selection).unwrap();

        assert_eq!(gpu.device_queue_families(), vec![0]);
        assert_eq!(context.graphics_queue, context.present_queue);
    }

    #[test]
    fn test_depth_format_search() {
        let gpu = MockGpu::new(MockConfig {
            depth_formats: vec![vk::Format::D24_UNORM_S8_UINT],
            ..Default::default()
        });
        let (instance, surface) = surface_for(&gpu);
        let selection = select_adapter(instance.as_ref(), &surface).unwrap();
        let context = DeviceContext::new(instance, selection).unwrap();

        let format = context.find_supported_format(
            &[vk::Format::D32_SFLOAT, vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT],
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        assert_eq!(format, Some(vk::Format::D24_UNORM_S8_UINT));
    }
}
