// Resource allocator - buffers, images, textures
//
// Every buffer and image gets its own dedicated allocation from the lowest
// memory type that satisfies both the resource's type filter and the
// requested property flags. Device-local data is uploaded through a
// host-visible staging buffer and a one-shot command buffer.

use ash::vk;
use std::sync::Arc;

use super::device::DeviceContext;
use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::{Device, Submission};

const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Lowest memory type index allowed by `type_filter` whose flags contain `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let has_type = (type_filter & (1 << i)) != 0;
            let has_properties = memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties);
            has_type && has_properties
        })
        .ok_or(RenderError::NoSuitableMemory {
            type_filter,
            properties,
        })
}

/// Buffer with its own memory allocation
pub struct GpuBuffer {
    device: Arc<dyn Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copy `data` into a host-visible buffer. Bytes past `size` are dropped.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let len = data.len().min(self.size as usize);
        self.device
            .write_memory(self.memory, 0, &data[..len])
            .vk_context("Failed to map buffer memory")
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.buffer);
        self.device.free_memory(self.memory);
    }
}

/// 2D image with memory and a single view
pub struct GpuImage {
    device: Arc<dyn Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl GpuImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.view);
        self.device.destroy_image(self.image);
        self.device.free_memory(self.memory);
    }
}

/// Sampled RGBA8 image
pub struct Texture {
    device: Arc<dyn Device>,
    sampler: vk::Sampler,
    image: GpuImage,
}

impl Texture {
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.device.destroy_sampler(self.sampler);
    }
}

pub struct ResourceAllocator {
    device: Arc<dyn Device>,
    queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    max_anisotropy: f32,
    depth_format: Option<vk::Format>,
    command_pool: vk::CommandPool,
}

impl ResourceAllocator {
    pub fn new(context: &DeviceContext) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.families.graphics);
        let command_pool = context
            .device
            .create_command_pool(&pool_info)
            .vk_context("Failed to create command pool")?;

        let depth_format =
            context.find_supported_format(&DEPTH_FORMAT_CANDIDATES, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);
        log::debug!("Depth format: {:?}", depth_format);

        Ok(Self {
            device: context.device.clone(),
            queue: context.graphics_queue,
            memory_properties: context.memory_properties,
            max_anisotropy: context.properties.limits.max_sampler_anisotropy,
            depth_format,
            command_pool,
        })
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Pool shared by the one-shot commands and the per-image command buffers.
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn depth_format(&self) -> Result<vk::Format> {
        self.depth_format.ok_or(RenderError::NoSupportedDepthFormat)
    }

    fn allocate(&self, requirements: vk::MemoryRequirements, properties: vk::MemoryPropertyFlags) -> Result<vk::DeviceMemory> {
        let memory_type_index = find_memory_type(&self.memory_properties, requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        self.device
            .allocate_memory(&alloc_info)
            .vk_context("Failed to allocate memory")
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        if size == 0 {
            return Err(RenderError::EmptyBuffer);
        }
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = self
            .device
            .create_buffer(&buffer_info)
            .vk_context("Failed to create buffer")?;

        let requirements = self.device.buffer_memory_requirements(buffer);
        let memory = match self.allocate(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                self.device.destroy_buffer(buffer);
                return Err(e);
            }
        };

        // From here on the buffer owns the allocation
        let gpu_buffer = GpuBuffer {
            device: self.device.clone(),
            buffer,
            memory,
            size,
        };
        self.device
            .bind_buffer_memory(buffer, memory)
            .vk_context("Failed to bind buffer memory")?;

        Ok(gpu_buffer)
    }

    /// Host-visible, coherent buffer for per-frame data.
    pub fn create_host_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<GpuBuffer> {
        self.create_buffer(
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Copy `data` into a new device-local buffer through a staging buffer.
    /// Blocks until the copy has finished.
    pub fn upload_via_staging(&self, data: &[u8], usage: vk::BufferUsageFlags) -> Result<GpuBuffer> {
        let size = data.len() as vk::DeviceSize;

        let staging = self.create_host_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(data)?;

        let destination = self.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let cmd = self.begin_single_time_commands()?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.device
            .cmd_copy_buffer(cmd, staging.handle(), destination.handle(), &[region]);
        self.end_single_time_commands(cmd)?;

        Ok(destination)
    }

    pub fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = self
            .device
            .allocate_command_buffers(&alloc_info)
            .vk_context("Failed to allocate one-shot command buffer")?[0];

        if let Err(e) = self
            .device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        {
            self.device.free_command_buffers(self.command_pool, &[cmd]);
            return Err(RenderError::Vulkan {
                what: "Failed to begin one-shot command buffer",
                result: e,
            });
        }

        Ok(cmd)
    }

    /// Submit, wait for the queue to drain, free the command buffer.
    pub fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let result = self
            .device
            .end_command_buffer(cmd)
            .vk_context("Failed to end one-shot command buffer")
            .and_then(|()| {
                let command_buffers = [cmd];
                let submission = Submission {
                    command_buffers: &command_buffers,
                    ..Default::default()
                };
                self.device
                    .queue_submit(self.queue, &submission, vk::Fence::null())
                    .vk_context("Failed to submit one-shot command buffer")
            })
            .and_then(|()| {
                self.device
                    .queue_wait_idle(self.queue)
                    .vk_context("Failed to wait for transfer queue")
            });

        self.device.free_command_buffers(self.command_pool, &[cmd]);
        result
    }

    pub fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<GpuImage> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = self
            .device
            .create_image(&image_info)
            .vk_context("Failed to create image")?;

        let requirements = self.device.image_memory_requirements(image);
        let memory = match self.allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                self.device.destroy_image(image);
                return Err(e);
            }
        };

        let mut gpu_image = GpuImage {
            device: self.device.clone(),
            image,
            memory,
            view: vk::ImageView::null(),
            format,
            extent,
        };
        self.device
            .bind_image_memory(image, memory)
            .vk_context("Failed to bind image memory")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(aspect));
        gpu_image.view = self
            .device
            .create_image_view(&view_info)
            .vk_context("Failed to create image view")?;

        Ok(gpu_image)
    }

    pub fn create_depth_target(&self, extent: vk::Extent2D) -> Result<GpuImage> {
        self.create_image(
            extent,
            self.depth_format()?,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )
    }

    /// Upload tightly packed RGBA8 pixels into a sampled, device-local image.
    pub fn create_texture(&self, width: u32, height: u32, rgba: &[u8]) -> Result<Texture> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected || expected == 0 {
            return Err(RenderError::TextureSize {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }

        let staging = self.create_host_buffer(rgba.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(rgba)?;

        let extent = vk::Extent2D { width, height };
        let image = self.create_image(
            extent,
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;

        let cmd = self.begin_single_time_commands()?;
        self.transition_layout(
            cmd,
            image.handle(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });
        self.device.cmd_copy_buffer_to_image(
            cmd,
            staging.handle(),
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
        self.transition_layout(
            cmd,
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        self.end_single_time_commands(cmd)?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(self.max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
        let sampler = self
            .device
            .create_sampler(&sampler_info)
            .vk_context("Failed to create texture sampler")?;

        log::debug!("Created {}x{} texture", width, height);

        Ok(Texture {
            device: self.device.clone(),
            sampler,
            image,
        })
    }

    fn transition_layout(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            _ => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
        };

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR))
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        self.device.cmd_image_barrier(cmd, src_stage, dst_stage, &barrier);
    }
}

impl Drop for ResourceAllocator {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.command_pool);
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            properties.memory_types[i].property_flags = flags;
        }
        properties
    }

    #[test]
    fn test_lowest_matching_index() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_type_filter_excludes_indices() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        let index = find_memory_type(&properties, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(index, 2);
    }

    #[test]
    fn test_no_match_reports_filter_and_flags() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let err = find_memory_type(&properties, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        match err {
            RenderError::NoSuitableMemory {
                type_filter,
                properties,
            } => {
                assert_eq!(type_filter, 0b1);
                assert_eq!(properties, vk::MemoryPropertyFlags::HOST_VISIBLE);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_filter_beyond_type_count_is_ignored() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let result = find_memory_type(&properties, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(result.is_err());
    }
}
