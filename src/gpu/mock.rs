// Mock backend - an in-process GPU for tests and headless runs
//
// Every handle lives in one table so tests can assert that teardown leaves
// nothing behind. Submitted work is not executed until the CPU waits for it
// (fence wait, queue idle, device idle), which keeps frames genuinely "in
// flight" between submit and wait. Misuse that real drivers only catch with
// validation layers (double destroy, destroying or re-recording objects the
// GPU still references, waiting on a fence nothing will signal, semaphore
// misuse) is recorded in `violations()`.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};
use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::CStr;
use std::sync::Arc;

use super::{Device, Instance, Submission};
use crate::error::Result;
use crate::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Surface,
    Swapchain,
    Image,
    ImageView,
    Sampler,
    Buffer,
    Memory,
    RenderPass,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    Framebuffer,
    DescriptorSetLayout,
    DescriptorPool,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Created(HandleKind),
    Destroyed(HandleKind),
    DeviceWaitIdle,
    Acquire(std::result::Result<u32, vk::Result>),
    Submit,
    Present(std::result::Result<bool, vk::Result>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    /// Regions as `(src_offset, dst_offset, size)`
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<(vk::DeviceSize, vk::DeviceSize, vk::DeviceSize)>,
    },
    CopyBufferToImage { src: vk::Buffer, dst: vk::Image },
    ImageBarrier { image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout },
    BeginRenderPass { framebuffer: vk::Framebuffer },
    BindPipeline(vk::Pipeline),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    BindDescriptorSet(vk::DescriptorSet),
    DrawIndexed(u32),
    EndRenderPass,
}

impl MockCommand {
    fn references(&self, raw: u64) -> bool {
        match self {
            MockCommand::CopyBuffer { src, dst, .. } => src.as_raw() == raw || dst.as_raw() == raw,
            MockCommand::CopyBufferToImage { src, dst } => src.as_raw() == raw || dst.as_raw() == raw,
            MockCommand::ImageBarrier { image, .. } => image.as_raw() == raw,
            MockCommand::BeginRenderPass { framebuffer } => framebuffer.as_raw() == raw,
            MockCommand::BindPipeline(pipeline) => pipeline.as_raw() == raw,
            MockCommand::BindVertexBuffer(buffer) | MockCommand::BindIndexBuffer(buffer) => buffer.as_raw() == raw,
            MockCommand::BindDescriptorSet(set) => set.as_raw() == raw,
            MockCommand::DrawIndexed(_) | MockCommand::EndRenderPass => false,
        }
    }
}

/// One physical adapter as the mock reports it
#[derive(Debug, Clone)]
pub struct MockAdapter {
    pub name: String,
    pub extensions: Vec<String>,
    pub sampler_anisotropy: bool,
    /// `(queue flags, can present to the surface)` per family
    pub queue_families: Vec<(vk::QueueFlags, bool)>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Extension queries fail with `ERROR_DEVICE_LOST`
    pub lost: bool,
}

impl MockAdapter {
    /// An adapter that passes every selection check with one shared
    /// graphics + present family.
    pub fn capable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            extensions: vec!["VK_KHR_swapchain".to_string()],
            sampler_anisotropy: true,
            queue_families: vec![(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, true)],
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            lost: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub adapters: Vec<MockAdapter>,
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    /// `None` reports the "undefined" current extent (`u32::MAX`).
    pub current_extent: Option<vk::Extent2D>,
    pub min_image_count: u32,
    pub max_image_count: u32,
    pub depth_formats: Vec<vk::Format>,
    pub reject_shader_modules: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            adapters: vec![MockAdapter::capable("Mock GPU")],
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::DEVICE_LOCAL
                    | vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            current_extent: Some(vk::Extent2D { width: 800, height: 600 }),
            min_image_count: 2,
            max_image_count: 3,
            depth_formats: vec![vk::Format::D32_SFLOAT],
            reject_shader_modules: false,
        }
    }
}

struct MockBufferState {
    size: vk::DeviceSize,
    memory: Option<u64>,
}

struct MockMemory {
    bytes: Vec<u8>,
    type_index: u32,
}

struct PendingSubmit {
    fence: Option<u64>,
    command_buffers: Vec<u64>,
}

#[derive(Default)]
struct MockState {
    config: MockConfig,
    next_handle: u64,
    live: HashMap<u64, HandleKind>,
    events: Vec<MockEvent>,
    violations: Vec<String>,
    device_alive: bool,
    device_queue_families: Vec<u32>,

    memories: HashMap<u64, MockMemory>,
    buffers: HashMap<u64, MockBufferState>,
    image_sizes: HashMap<u64, vk::DeviceSize>,
    image_views: HashMap<u64, u64>,
    swapchains: HashMap<u64, Vec<u64>>,
    swapchain_cursor: HashMap<u64, u32>,
    framebuffers: HashMap<u64, u64>,
    descriptor_sets: HashMap<u64, u64>,
    descriptor_writes: Vec<(vk::DescriptorSet, u32, vk::DescriptorType)>,
    command_buffers: HashMap<u64, (u64, Vec<MockCommand>, bool)>,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    pending: VecDeque<PendingSubmit>,

    max_in_flight: usize,
    acquire_calls: u32,
    present_calls: u32,
    submit_calls: u32,
    acquire_failures: HashMap<u32, vk::Result>,
    present_failures: HashMap<u32, vk::Result>,
    suboptimal_presents: HashSet<u32>,
}

impl MockState {
    fn create(&mut self, kind: HandleKind) -> u64 {
        self.next_handle += 1;
        let raw = self.next_handle;
        self.live.insert(raw, kind);
        self.events.push(MockEvent::Created(kind));
        raw
    }

    fn destroy(&mut self, raw: u64, kind: HandleKind) {
        if raw == 0 {
            return;
        }
        match self.live.get(&raw) {
            Some(&live_kind) if live_kind == kind => {}
            _ => {
                self.violations
                    .push(format!("{:?} {:#x} destroyed twice or never created", kind, raw));
                return;
            }
        }
        if self.in_use_by_gpu(raw) {
            self.violations
                .push(format!("{:?} {:#x} destroyed while GPU work still references it", kind, raw));
        }
        self.live.remove(&raw);
        self.events.push(MockEvent::Destroyed(kind));
    }

    fn in_use_by_gpu(&self, raw: u64) -> bool {
        self.pending.iter().any(|submit| {
            submit.fence == Some(raw)
                || submit.command_buffers.iter().any(|&cb| {
                    cb == raw
                        || self
                            .command_buffers
                            .get(&cb)
                            .is_some_and(|(_, commands, _)| commands.iter().any(|c| c.references(raw)))
                })
        })
    }

    fn host_visible(&self, memory: u64) -> bool {
        self.memories.get(&memory).is_some_and(|m| {
            self.config
                .memory_types
                .get(m.type_index as usize)
                .is_some_and(|flags| flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE))
        })
    }

    fn execute(&mut self, submit: PendingSubmit) {
        for cb in &submit.command_buffers {
            let commands = match self.command_buffers.get(cb) {
                Some((_, commands, _)) => commands.clone(),
                None => continue,
            };
            for command in commands {
                if let MockCommand::CopyBuffer { src, dst, regions } = command {
                    self.copy_buffer(src.as_raw(), dst.as_raw(), &regions);
                }
            }
        }
        if let Some(fence) = submit.fence {
            self.fences.insert(fence, true);
        }
    }

    fn copy_buffer(&mut self, src: u64, dst: u64, regions: &[(vk::DeviceSize, vk::DeviceSize, vk::DeviceSize)]) {
        let src_memory = self.buffers.get(&src).and_then(|b| b.memory);
        let dst_memory = self.buffers.get(&dst).and_then(|b| b.memory);
        let (Some(src_memory), Some(dst_memory)) = (src_memory, dst_memory) else {
            self.violations.push("copy between buffers without bound memory".to_string());
            return;
        };
        for &(src_offset, dst_offset, size) in regions {
            let bytes = match self.memories.get(&src_memory) {
                Some(memory) => {
                    let start = src_offset as usize;
                    let end = start + size as usize;
                    memory.bytes.get(start..end).map(|b| b.to_vec())
                }
                None => None,
            };
            let Some(bytes) = bytes else {
                self.violations.push("copy reads past the end of the source buffer".to_string());
                continue;
            };
            match self.memories.get_mut(&dst_memory) {
                Some(memory) if memory.bytes.len() >= dst_offset as usize + bytes.len() => {
                    let start = dst_offset as usize;
                    memory.bytes[start..start + bytes.len()].copy_from_slice(&bytes);
                }
                _ => self.violations.push("copy writes past the end of the destination buffer".to_string()),
            }
        }
    }

    /// Retire submissions in order up to and including the one signaling `fence`.
    fn complete_through(&mut self, fence: u64) -> bool {
        let Some(position) = self.pending.iter().position(|s| s.fence == Some(fence)) else {
            return false;
        };
        for _ in 0..=position {
            if let Some(submit) = self.pending.pop_front() {
                self.execute(submit);
            }
        }
        true
    }

    fn complete_all(&mut self) {
        while let Some(submit) = self.pending.pop_front() {
            self.execute(submit);
        }
    }

    fn wait_semaphore(&mut self, semaphore: u64, by: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => *signaled = false,
            Some(_) => self
                .violations
                .push(format!("{} waits on semaphore {:#x} that has no pending signal", by, semaphore)),
            None => self.violations.push(format!("{} waits on unknown semaphore {:#x}", by, semaphore)),
        }
    }

    fn signal_semaphore(&mut self, semaphore: u64, by: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if !*signaled => *signaled = true,
            Some(_) => self
                .violations
                .push(format!("{} signals semaphore {:#x} that is already signaled", by, semaphore)),
            None => self.violations.push(format!("{} signals unknown semaphore {:#x}", by, semaphore)),
        }
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: MockCommand) {
        match self.command_buffers.get_mut(&cmd.as_raw()) {
            Some((_, commands, true)) => commands.push(command),
            _ => self
                .violations
                .push(format!("command recorded into {:#x} outside begin/end", cmd.as_raw())),
        }
    }
}

/// Shared handle on the mock GPU: build the instance from it, then inspect
/// what the code under test did.
#[derive(Clone)]
pub struct MockGpu {
    state: Arc<Mutex<MockState>>,
}

impl MockGpu {
    pub fn new(config: MockConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                config,
                ..Default::default()
            })),
        }
    }

    pub fn instance(&self) -> Arc<MockInstance> {
        Arc::new(MockInstance {
            state: self.state.clone(),
        })
    }

    /// Acquire call number `n` (1-based) reports `ERROR_OUT_OF_DATE_KHR`.
    pub fn out_of_date_on_acquire(&self, n: u32) {
        self.fail_on_acquire(n, vk::Result::ERROR_OUT_OF_DATE_KHR);
    }

    /// Acquire call number `n` (1-based) fails with `result`.
    pub fn fail_on_acquire(&self, n: u32, result: vk::Result) {
        self.state.lock().acquire_failures.insert(n, result);
    }

    /// Present call number `n` (1-based) reports `ERROR_OUT_OF_DATE_KHR`.
    pub fn out_of_date_on_present(&self, n: u32) {
        self.fail_on_present(n, vk::Result::ERROR_OUT_OF_DATE_KHR);
    }

    /// Present call number `n` (1-based) fails with `result`.
    pub fn fail_on_present(&self, n: u32, result: vk::Result) {
        self.state.lock().present_failures.insert(n, result);
    }

    /// Present call number `n` (1-based) reports `SUBOPTIMAL_KHR`.
    pub fn suboptimal_on_present(&self, n: u32) {
        self.state.lock().suboptimal_presents.insert(n);
    }

    pub fn set_current_extent(&self, extent: Option<vk::Extent2D>) {
        self.state.lock().config.current_extent = extent;
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn live_count(&self, kind: HandleKind) -> usize {
        self.state.lock().live.values().filter(|&&k| k == kind).count()
    }

    pub fn live_handles(&self) -> Vec<HandleKind> {
        let mut kinds: Vec<_> = self.state.lock().live.values().copied().collect();
        kinds.sort_by_key(|k| format!("{:?}", k));
        kinds
    }

    pub fn device_alive(&self) -> bool {
        self.state.lock().device_alive
    }

    pub fn device_queue_families(&self) -> Vec<u32> {
        self.state.lock().device_queue_families.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn acquire_calls(&self) -> u32 {
        self.state.lock().acquire_calls
    }

    pub fn present_calls(&self) -> u32 {
        self.state.lock().present_calls
    }

    pub fn submit_calls(&self) -> u32 {
        self.state.lock().submit_calls
    }

    pub fn descriptor_writes(&self) -> Vec<(vk::DescriptorSet, u32, vk::DescriptorType)> {
        self.state.lock().descriptor_writes.clone()
    }

    pub fn recorded_commands(&self, cmd: vk::CommandBuffer) -> Vec<MockCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&cmd.as_raw())
            .map(|(_, commands, _)| commands.clone())
            .unwrap_or_default()
    }

    /// Bytes currently held by the memory bound to `buffer`.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let buffer = state.buffers.get(&buffer.as_raw())?;
        let memory = state.memories.get(&buffer.memory?)?;
        memory.bytes.get(..buffer.size as usize).map(|b| b.to_vec())
    }
}

pub struct MockInstance {
    state: Arc<Mutex<MockState>>,
}

impl MockInstance {
    fn adapter(&self, adapter: vk::PhysicalDevice) -> Option<MockAdapter> {
        let index = adapter.as_raw().checked_sub(1)? as usize;
        self.state.lock().config.adapters.get(index).cloned()
    }
}

impl Instance for MockInstance {
    fn enumerate_adapters(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        let count = self.state.lock().config.adapters.len() as u64;
        Ok((1..=count).map(vk::PhysicalDevice::from_raw).collect())
    }

    fn adapter_properties(&self, adapter: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let mut properties = vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_1,
            device_type: vk::PhysicalDeviceType::VIRTUAL_GPU,
            ..Default::default()
        };
        properties.limits.max_sampler_anisotropy = 16.0;
        if let Some(mock) = self.adapter(adapter) {
            for (dst, src) in properties.device_name.iter_mut().zip(mock.name.bytes().take(255)) {
                *dst = src as std::ffi::c_char;
            }
        }
        properties
    }

    fn adapter_features(&self, adapter: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        let anisotropy = self.adapter(adapter).is_some_and(|a| a.sampler_anisotropy);
        vk::PhysicalDeviceFeatures {
            sampler_anisotropy: anisotropy as vk::Bool32,
            ..Default::default()
        }
    }

    fn adapter_extensions(&self, adapter: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        match self.adapter(adapter) {
            Some(mock) if mock.lost => Err(vk::Result::ERROR_DEVICE_LOST),
            mock => Ok(mock.map(|a| a.extensions).unwrap_or_default()),
        }
    }

    fn queue_families(&self, adapter: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.adapter(adapter)
            .map(|a| {
                a.queue_families
                    .iter()
                    .map(|&(flags, _)| vk::QueueFamilyProperties {
                        queue_flags: flags,
                        queue_count: 1,
                        ..Default::default()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn memory_properties(&self, _adapter: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        let state = self.state.lock();
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        for (i, &flags) in state.config.memory_types.iter().take(vk::MAX_MEMORY_TYPES).enumerate() {
            properties.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        properties.memory_type_count = state.config.memory_types.len().min(vk::MAX_MEMORY_TYPES) as u32;
        properties.memory_heap_count = 1;
        properties
    }

    fn format_properties(&self, _adapter: vk::PhysicalDevice, format: vk::Format) -> vk::FormatProperties {
        let supported = self.state.lock().config.depth_formats.contains(&format);
        vk::FormatProperties {
            optimal_tiling_features: if supported {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    fn create_surface(&self, _display: RawDisplayHandle, _window: RawWindowHandle) -> VkResult<vk::SurfaceKHR> {
        let raw = self.state.lock().create(HandleKind::Surface);
        Ok(vk::SurfaceKHR::from_raw(raw))
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        let mut state = self.state.lock();
        if state.live.values().any(|&k| k == HandleKind::Swapchain) {
            state
                .violations
                .push("surface destroyed while a swapchain still uses it".to_string());
        }
        state.destroy(surface.as_raw(), HandleKind::Surface);
    }

    fn surface_support(
        &self,
        adapter: vk::PhysicalDevice,
        queue_family: u32,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        Ok(self
            .adapter(adapter)
            .and_then(|a| a.queue_families.get(queue_family as usize).map(|&(_, present)| present))
            .unwrap_or(false))
    }

    fn surface_capabilities(
        &self,
        _adapter: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let state = self.state.lock();
        let undefined = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: state.config.min_image_count,
            max_image_count: state.config.max_image_count,
            current_extent: state.config.current_extent.unwrap_or(undefined),
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        })
    }

    fn surface_formats(
        &self,
        adapter: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.adapter(adapter).map(|a| a.formats).unwrap_or_default())
    }

    fn surface_present_modes(
        &self,
        adapter: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.adapter(adapter).map(|a| a.present_modes).unwrap_or_default())
    }

    fn create_device(
        &self,
        _adapter: vk::PhysicalDevice,
        queue_families: &[u32],
        _extensions: &[&CStr],
        _features: &vk::PhysicalDeviceFeatures,
    ) -> VkResult<Arc<dyn Device>> {
        let mut state = self.state.lock();
        if state.device_alive {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        state.device_alive = true;
        state.device_queue_families = queue_families.to_vec();
        Ok(Arc::new(MockDevice {
            state: self.state.clone(),
        }))
    }
}

pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let leaked: Vec<_> = state
            .live
            .values()
            .filter(|&&k| k != HandleKind::Surface)
            .copied()
            .collect();
        if !leaked.is_empty() {
            state
                .violations
                .push(format!("device destroyed with live children: {:?}", leaked));
        }
        state.device_alive = false;
    }
}

impl MockDevice {
    fn create<H: Handle>(&self, kind: HandleKind) -> H {
        H::from_raw(self.state.lock().create(kind))
    }

    fn destroy<H: Handle>(&self, handle: H, kind: HandleKind) {
        self.state.lock().destroy(handle.as_raw(), kind);
    }
}

impl Device for MockDevice {
    fn queue(&self, family: u32) -> vk::Queue {
        vk::Queue::from_raw(0x1000 + family as u64)
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        state.complete_all();
        state.events.push(MockEvent::DeviceWaitIdle);
        Ok(())
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        if state.live.values().any(|&k| k == HandleKind::Swapchain) {
            state
                .violations
                .push("second swapchain created while the previous one is alive".to_string());
        }
        let raw = state.create(HandleKind::Swapchain);
        let images = (0..info.min_image_count)
            .map(|_| {
                state.next_handle += 1;
                state.next_handle
            })
            .collect();
        state.swapchains.insert(raw, images);
        state.swapchain_cursor.insert(raw, 0);
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let state = self.state.lock();
        state
            .swapchains
            .get(&swapchain.as_raw())
            .map(|images| images.iter().map(|&raw| vk::Image::from_raw(raw)).collect())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        state.acquire_calls += 1;
        let call = state.acquire_calls;
        if let Some(&result) = state.acquire_failures.get(&call) {
            state.events.push(MockEvent::Acquire(Err(result)));
            return Err(result);
        }
        let count = state.swapchains.get(&swapchain.as_raw()).map_or(0, |i| i.len() as u32);
        if count == 0 {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        }
        let cursor = state.swapchain_cursor.entry(swapchain.as_raw()).or_insert(0);
        let index = *cursor % count;
        *cursor += 1;
        state.signal_semaphore(semaphore.as_raw(), "acquire");
        state.events.push(MockEvent::Acquire(Ok(index)));
        Ok((index, false))
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        _swapchain: vk::SwapchainKHR,
        _image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.present_calls += 1;
        let call = state.present_calls;
        for semaphore in wait_semaphores {
            state.wait_semaphore(semaphore.as_raw(), "present");
        }
        let result = if let Some(&failure) = state.present_failures.get(&call) {
            Err(failure)
        } else {
            Ok(state.suboptimal_presents.contains(&call))
        };
        state.events.push(MockEvent::Present(result));
        result
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        let images = state.swapchains.remove(&swapchain.as_raw()).unwrap_or_default();
        let dangling = state.image_views.values().filter(|image| images.contains(image)).count();
        if dangling > 0 {
            state
                .violations
                .push(format!("swapchain destroyed while {} image views still reference it", dangling));
        }
        state.destroy(swapchain.as_raw(), HandleKind::Swapchain);
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::Image);
        let size = info.extent.width as u64 * info.extent.height as u64 * info.extent.depth.max(1) as u64 * 4;
        state.image_sizes.insert(raw, size);
        Ok(vk::Image::from_raw(raw))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state.lock();
        let count = state.config.memory_types.len() as u32;
        vk::MemoryRequirements {
            size: state.image_sizes.get(&image.as_raw()).copied().unwrap_or(0),
            alignment: 256,
            memory_type_bits: if count >= 32 { u32::MAX } else { (1 << count) - 1 },
        }
    }

    fn bind_image_memory(&self, _image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        let state = self.state.lock();
        if state.memories.contains_key(&memory.as_raw()) {
            Ok(())
        } else {
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        }
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.lock();
        state.image_sizes.remove(&image.as_raw());
        state.destroy(image.as_raw(), HandleKind::Image);
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::ImageView);
        state.image_views.insert(raw, info.image.as_raw());
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        state.image_views.remove(&view.as_raw());
        state.destroy(view.as_raw(), HandleKind::ImageView);
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        Ok(self.create(HandleKind::Sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy(sampler, HandleKind::Sampler);
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        let mut state = self.state.lock();
        if info.size == 0 {
            state.violations.push("buffer created with size 0".to_string());
        }
        let raw = state.create(HandleKind::Buffer);
        state.buffers.insert(
            raw,
            MockBufferState {
                size: info.size,
                memory: None,
            },
        );
        Ok(vk::Buffer::from_raw(raw))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state.lock();
        let count = state.config.memory_types.len() as u32;
        let size = state.buffers.get(&buffer.as_raw()).map_or(0, |b| b.size);
        vk::MemoryRequirements {
            size: size.div_ceil(256) * 256,
            alignment: 256,
            memory_type_bits: if count >= 32 { u32::MAX } else { (1 << count) - 1 },
        }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()> {
        let mut state = self.state.lock();
        if !state.memories.contains_key(&memory.as_raw()) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        match state.buffers.get_mut(&buffer.as_raw()) {
            Some(b) => {
                b.memory = Some(memory.as_raw());
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        state.destroy(buffer.as_raw(), HandleKind::Buffer);
        state.buffers.remove(&buffer.as_raw());
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state.lock();
        if info.memory_type_index as usize >= state.config.memory_types.len() {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let raw = state.create(HandleKind::Memory);
        state.memories.insert(
            raw,
            MockMemory {
                bytes: vec![0; info.allocation_size as usize],
                type_index: info.memory_type_index,
            },
        );
        Ok(vk::DeviceMemory::from_raw(raw))
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VkResult<()> {
        let mut state = self.state.lock();
        if !state.host_visible(memory.as_raw()) {
            state
                .violations
                .push(format!("mapped memory {:#x} that is not host visible", memory.as_raw()));
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        let Some(target) = state.memories.get_mut(&memory.as_raw()) else {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > target.bytes.len() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        target.bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        state.destroy(memory.as_raw(), HandleKind::Memory);
        state.memories.remove(&memory.as_raw());
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        Ok(self.create(HandleKind::RenderPass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state.lock();
        if state.framebuffers.values().any(|&rp| rp == render_pass.as_raw()) {
            state
                .violations
                .push("render pass destroyed before the framebuffers built on it".to_string());
        }
        state.destroy(render_pass.as_raw(), HandleKind::RenderPass);
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        if code.is_empty() || self.state.lock().config.reject_shader_modules {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        Ok(self.create(HandleKind::ShaderModule))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(module, HandleKind::ShaderModule);
    }

    fn create_pipeline_layout(&self, _info: &vk::PipelineLayoutCreateInfo<'_>) -> VkResult<vk::PipelineLayout> {
        Ok(self.create(HandleKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(layout, HandleKind::PipelineLayout);
    }

    fn create_graphics_pipeline(&self, _info: &vk::GraphicsPipelineCreateInfo<'_>) -> VkResult<vk::Pipeline> {
        Ok(self.create(HandleKind::Pipeline))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(pipeline, HandleKind::Pipeline);
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> VkResult<vk::Framebuffer> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::Framebuffer);
        state.framebuffers.insert(raw, info.render_pass.as_raw());
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.lock();
        state.framebuffers.remove(&framebuffer.as_raw());
        state.destroy(framebuffer.as_raw(), HandleKind::Framebuffer);
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        Ok(self.create(HandleKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy(layout, HandleKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(&self, _info: &vk::DescriptorPoolCreateInfo<'_>) -> VkResult<vk::DescriptorPool> {
        Ok(self.create(HandleKind::DescriptorPool))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock();
        state.destroy(pool.as_raw(), HandleKind::DescriptorPool);
        state.descriptor_sets.retain(|_, p| *p != pool.as_raw());
    }

    fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        if state.live.get(&info.descriptor_pool.as_raw()) != Some(&HandleKind::DescriptorPool) {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        let sets = (0..info.descriptor_set_count)
            .map(|_| {
                state.next_handle += 1;
                let raw = state.next_handle;
                state.descriptor_sets.insert(raw, info.descriptor_pool.as_raw());
                vk::DescriptorSet::from_raw(raw)
            })
            .collect();
        Ok(sets)
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        let mut state = self.state.lock();
        for write in writes {
            if !state.descriptor_sets.contains_key(&write.dst_set.as_raw()) {
                state
                    .violations
                    .push(format!("descriptor write into unknown set {:#x}", write.dst_set.as_raw()));
            }
            state
                .descriptor_writes
                .push((write.dst_set, write.dst_binding, write.descriptor_type));
        }
    }

    fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool> {
        Ok(self.create(HandleKind::CommandPool))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        let owned: Vec<u64> = state
            .command_buffers
            .iter()
            .filter(|(_, (p, _, _))| *p == pool.as_raw())
            .map(|(&cb, _)| cb)
            .collect();
        for cb in owned {
            state.destroy(cb, HandleKind::CommandBuffer);
            state.command_buffers.remove(&cb);
        }
        state.destroy(pool.as_raw(), HandleKind::CommandPool);
    }

    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        if state.live.get(&info.command_pool.as_raw()) != Some(&HandleKind::CommandPool) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let buffers = (0..info.command_buffer_count)
            .map(|_| {
                let raw = state.create(HandleKind::CommandBuffer);
                state
                    .command_buffers
                    .insert(raw, (info.command_pool.as_raw(), Vec::new(), false));
                vk::CommandBuffer::from_raw(raw)
            })
            .collect();
        Ok(buffers)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for cb in buffers {
            state.destroy(cb.as_raw(), HandleKind::CommandBuffer);
            state.command_buffers.remove(&cb.as_raw());
        }
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, _flags: vk::CommandBufferUsageFlags) -> VkResult<()> {
        let mut state = self.state.lock();
        if state.in_use_by_gpu(buffer.as_raw()) {
            state.violations.push(format!(
                "command buffer {:#x} re-recorded while the GPU still executes it",
                buffer.as_raw()
            ));
        }
        match state.command_buffers.get_mut(&buffer.as_raw()) {
            Some((_, commands, recording)) => {
                commands.clear();
                *recording = true;
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&buffer.as_raw()) {
            Some((_, _, recording)) if *recording => {
                *recording = false;
                Ok(())
            }
            _ => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.state.lock().record(
            cmd,
            MockCommand::CopyBuffer {
                src,
                dst,
                regions: regions.iter().map(|r| (r.src_offset, r.dst_offset, r.size)).collect(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.state
            .lock()
            .record(cmd, MockCommand::CopyBufferToImage { src, dst });
    }

    fn cmd_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        self.state.lock().record(
            cmd,
            MockCommand::ImageBarrier {
                image: barrier.image,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
            },
        );
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>) {
        self.state.lock().record(
            cmd,
            MockCommand::BeginRenderPass {
                framebuffer: info.framebuffer,
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state.lock().record(cmd, MockCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.state.lock().record(cmd, MockCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.state.lock().record(cmd, MockCommand::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.state.lock().record(cmd, MockCommand::BindIndexBuffer(buffer));
    }

    fn cmd_bind_descriptor_set(&self, cmd: vk::CommandBuffer, _layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        self.state.lock().record(cmd, MockCommand::BindDescriptorSet(set));
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32) {
        self.state.lock().record(cmd, MockCommand::DrawIndexed(index_count));
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::Semaphore);
        state.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.destroy(semaphore.as_raw(), HandleKind::Semaphore);
        state.semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.create(HandleKind::Fence);
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.destroy(fence.as_raw(), HandleKind::Fence);
        state.fences.remove(&fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        if state.fences.get(&fence.as_raw()) == Some(&true) {
            return Ok(());
        }
        if state.complete_through(fence.as_raw()) {
            return Ok(());
        }
        state
            .violations
            .push(format!("waited on fence {:#x} that nothing will signal", fence.as_raw()));
        Err(vk::Result::TIMEOUT)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        if state.pending.iter().any(|s| s.fence == Some(fence.as_raw())) {
            state
                .violations
                .push(format!("fence {:#x} reset while its submission is pending", fence.as_raw()));
        }
        match state.fences.get_mut(&fence.as_raw()) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn queue_submit(&self, _queue: vk::Queue, submission: &Submission<'_>, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        state.submit_calls += 1;

        let fence = (fence != vk::Fence::null()).then(|| fence.as_raw());
        if let Some(raw) = fence {
            if state.fences.get(&raw) != Some(&false) {
                state
                    .violations
                    .push(format!("submitted with fence {:#x} that is not unsignaled", raw));
            }
        }
        for cb in submission.command_buffers {
            match state.command_buffers.get(&cb.as_raw()) {
                Some((_, _, false)) => {}
                _ => state.violations.push(format!(
                    "submitted command buffer {:#x} that is not in the executable state",
                    cb.as_raw()
                )),
            }
        }
        for semaphore in submission.wait_semaphores {
            state.wait_semaphore(semaphore.as_raw(), "submit");
        }
        for semaphore in submission.signal_semaphores {
            state.signal_semaphore(semaphore.as_raw(), "submit");
        }

        state.pending.push_back(PendingSubmit {
            fence,
            command_buffers: submission.command_buffers.iter().map(|cb| cb.as_raw()).collect(),
        });
        let in_flight = state.pending.iter().filter(|s| s.fence.is_some()).count();
        state.max_in_flight = state.max_in_flight.max(in_flight);
        state.events.push(MockEvent::Submit);
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        self.state.lock().complete_all();
        Ok(())
    }
}

/// Headless window: size, close and resize are driven by the test.
pub struct MockWindow {
    size: Cell<(u32, u32)>,
    resized: Cell<bool>,
    close_after: Cell<Option<u32>>,
    restore_to: Cell<Option<(u32, u32)>>,
    waits: Cell<u32>,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Cell::new((width, height)),
            resized: Cell::new(false),
            close_after: Cell::new(None),
            restore_to: Cell::new(None),
            waits: Cell::new(0),
        }
    }

    /// Simulate the window system's resize callback.
    pub fn resize(&self, width: u32, height: u32) {
        self.size.set((width, height));
        self.resized.set(true);
    }

    /// Minimize now; the next `wait_events` restores `restore_to`.
    pub fn minimize(&self, restore_to: (u32, u32)) {
        self.size.set((0, 0));
        self.resized.set(true);
        self.restore_to.set(Some(restore_to));
    }

    /// Report `should_close` after `polls` more event polls.
    pub fn close_after(&self, polls: u32) {
        self.close_after.set(Some(polls));
    }

    pub fn wait_count(&self) -> u32 {
        self.waits.get()
    }
}

impl Window for MockWindow {
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        Ok((
            RawDisplayHandle::Web(WebDisplayHandle::new()),
            RawWindowHandle::Web(WebWindowHandle::new(1)),
        ))
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.size.get()
    }

    fn poll_events(&self) {
        if let Some(remaining) = self.close_after.get() {
            self.close_after.set(Some(remaining.saturating_sub(1)));
        }
    }

    fn wait_events(&self) {
        self.waits.set(self.waits.get() + 1);
        if let Some(size) = self.restore_to.take() {
            self.size.set(size);
        }
    }

    fn should_close(&self) -> bool {
        self.close_after.get() == Some(0)
    }

    fn take_resized(&self) -> bool {
        self.resized.replace(false)
    }
}
