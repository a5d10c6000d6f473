// Frame synchronization - frames in flight
//
// Each frame slot owns an image-available semaphore, a render-finished
// semaphore and an in-flight fence (created signaled). Slots rotate every
// presented frame. Swapchain images remember which slot last submitted work
// for them, so an image is never re-recorded while that work is pending.

use ash::vk;
use std::sync::Arc;

use super::shader::{BindingKind, ShaderBinding};
use super::swapchain::{SwapchainContext, SwapchainManager};
use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::{Device, Submission};
use crate::renderer::Mesh;
use crate::window::Window;

/// Supplies uniform contents once per uniform binding per frame.
pub trait FrameDataSource {
    /// Bytes for `binding` this frame. Truncated to the declared size; an
    /// empty result leaves the buffer as it was.
    fn fill(&mut self, frame_index: u64, binding: &ShaderBinding) -> Vec<u8>;
}

/// Leaves every uniform buffer untouched.
impl FrameDataSource for () {
    fn fill(&mut self, _frame_index: u64, _binding: &ShaderBinding) -> Vec<u8> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// Nothing was submitted; the swapchain will be rebuilt first thing next frame.
    Skipped,
}

pub struct FrameSlot {
    device: Arc<dyn Device>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    pub fn new(device: Arc<dyn Device>) -> Result<Self> {
        let mut slot = Self {
            device,
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        slot.image_available = slot
            .device
            .create_semaphore()
            .vk_context("Failed to create image-available semaphore")?;
        slot.render_finished = slot
            .device
            .create_semaphore()
            .vk_context("Failed to create render-finished semaphore")?;
        // Signaled, so the first wait on each slot returns immediately
        slot.in_flight = slot
            .device
            .create_fence(true)
            .vk_context("Failed to create in-flight fence")?;
        Ok(slot)
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        if self.image_available != vk::Semaphore::null() {
            self.device.destroy_semaphore(self.image_available);
        }
        if self.render_finished != vk::Semaphore::null() {
            self.device.destroy_semaphore(self.render_finished);
        }
        if self.in_flight != vk::Fence::null() {
            self.device.destroy_fence(self.in_flight);
        }
    }
}

/// Everything a frame reads besides the swapchain itself.
pub struct FrameInputs<'a> {
    pub window: &'a dyn Window,
    pub mesh: Option<&'a Mesh>,
    pub clear_color: [f32; 4],
    pub data: &'a mut dyn FrameDataSource,
}

pub struct FrameSyncEngine {
    device: Arc<dyn Device>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    slots: Vec<FrameSlot>,
    /// Slot whose fence guards each swapchain image, if any
    images_in_flight: Vec<Option<usize>>,
    current: usize,
    frame_index: u64,
}

impl FrameSyncEngine {
    pub fn new(
        device: Arc<dyn Device>,
        graphics_queue: vk::Queue,
        present_queue: vk::Queue,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let slots = (0..frames_in_flight.max(1))
            .map(|_| FrameSlot::new(device.clone()))
            .collect::<Result<Vec<_>>>()?;

        log::debug!("Created {} frame slots", slots.len());

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            slots,
            images_in_flight: Vec::new(),
            current: 0,
            frame_index: 0,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Frames presented so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Forget image ownership after the swapchain was rebuilt.
    pub fn reset_image_tracking(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }

    /// Run one frame of the acquire, wait, record, submit, present protocol.
    pub fn draw_frame(
        &mut self,
        swapchain: &mut SwapchainManager,
        ctx: &mut SwapchainContext<'_>,
        inputs: FrameInputs<'_>,
    ) -> Result<FrameOutcome> {
        if swapchain.is_stale() {
            // The rebuild below picks up the new size
            inputs.window.take_resized();
            if !swapchain.recreate_swapchain(ctx, inputs.window)? {
                return Ok(FrameOutcome::Skipped);
            }
            self.reset_image_tracking(swapchain.generation()?.image_count());
        }

        let slot = &self.slots[self.current];

        // 1. Wait until this slot's previous submission has finished
        self.device
            .wait_for_fence(slot.in_flight, u64::MAX)
            .vk_context("Failed to wait for in-flight fence")?;

        // 2. Acquire
        let generation = swapchain.generation()?;
        let image_index =
            match self
                .device
                .acquire_next_image(generation.swapchain, u64::MAX, slot.image_available)
            {
                Ok((index, _suboptimal)) => index,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    log::debug!("Acquire reported out-of-date, skipping frame");
                    swapchain.mark_stale();
                    return Ok(FrameOutcome::Skipped);
                }
                Err(result) => {
                    return Err(RenderError::Vulkan {
                        what: "Failed to acquire swapchain image",
                        result,
                    })
                }
            };
        let image = image_index as usize;
        if self.images_in_flight.len() != generation.image_count() {
            self.reset_image_tracking(generation.image_count());
        }

        // 3. Wait for whichever slot last rendered to this image
        if let Some(owner) = self.images_in_flight[image] {
            self.device
                .wait_for_fence(self.slots[owner].in_flight, u64::MAX)
                .vk_context("Failed to wait for image fence")?;
        }
        self.images_in_flight[image] = Some(self.current);

        swapchain.mark_presenting();
        let generation = swapchain.generation()?;

        // 4. Uniforms and command buffer for this image
        if let Some(descriptors) = generation.descriptors.as_ref() {
            for binding in ctx.reflector.bindings() {
                if binding.kind != BindingKind::UniformBuffer {
                    continue;
                }
                let bytes = inputs.data.fill(self.frame_index, binding);
                if bytes.is_empty() {
                    continue;
                }
                if let Some(buffer) = descriptors.uniform_buffer(image, binding.binding) {
                    buffer.write(&bytes)?;
                }
            }
        }
        generation.record(image, inputs.mesh, inputs.clear_color)?;

        // 5. Submit
        let slot = &self.slots[self.current];
        self.device
            .reset_fence(slot.in_flight)
            .vk_context("Failed to reset in-flight fence")?;

        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [generation.command_buffers[image]];
        let signal_semaphores = [slot.render_finished];
        let submission = Submission {
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            command_buffers: &command_buffers,
            signal_semaphores: &signal_semaphores,
        };
        self.device
            .queue_submit(self.graphics_queue, &submission, slot.in_flight)
            .vk_context("Failed to submit draw command buffer")?;

        // 6. Present
        let stale = match self.device.queue_present(
            self.present_queue,
            generation.swapchain,
            image_index,
            &signal_semaphores,
        ) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(result) => {
                return Err(RenderError::Vulkan {
                    what: "Failed to present swapchain image",
                    result,
                })
            }
        };
        let resized = inputs.window.take_resized();
        if stale || resized {
            log::debug!("Present reported stale swapchain (resized: {})", resized);
            swapchain.mark_stale();
        }

        // 7. Next slot
        self.current = (self.current + 1) % self.slots.len();
        self.frame_index += 1;

        Ok(FrameOutcome::Presented { image_index })
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle().vk_context("Failed to wait for device idle")
    }
}
