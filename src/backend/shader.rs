// Shader reflection and descriptor binding
//
// SPIR-V stages are loaded and reflected as they are added. Each stage's
// uniform buffers, then its samplers, take the next binding index in
// declaration order, so binding numbers follow stage-addition order across
// the whole program. The first call to `descriptor_set_layout` freezes the
// binding table.

use ash::vk;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::buffer::{GpuBuffer, ResourceAllocator, Texture};
use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::Device;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    CombinedSampler,
}

impl BindingKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::CombinedSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One entry of the descriptor set layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinding {
    pub binding: u32,
    pub kind: BindingKind,
    /// Declared block size in bytes; zero for samplers.
    pub size: vk::DeviceSize,
    pub stage: vk::ShaderStageFlags,
    pub name: String,
}

/// A resource as declared in one SPIR-V module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedResource {
    pub set: u32,
    pub binding: u32,
    pub kind: BindingKind,
    pub size: vk::DeviceSize,
    pub name: String,
}

/// Source of resource declarations for a SPIR-V module.
pub trait Reflect {
    /// Resources in declaration order.
    fn reflect(&self, words: &[u32]) -> std::result::Result<Vec<ReflectedResource>, String>;
}

/// spirq-backed reflection
pub struct SpirqReflect;

impl Reflect for SpirqReflect {
    fn reflect(&self, words: &[u32]) -> std::result::Result<Vec<ReflectedResource>, String> {
        let entry_points = spirq::ReflectConfig::new()
            .spv(words)
            .ref_all_rscs(true)
            .reflect()
            .map_err(|e| format!("SPIR-V reflection failed: {:?}", e))?;

        let mut resources: Vec<ReflectedResource> = Vec::new();
        for entry_point in &entry_points {
            for var in entry_point.vars.iter() {
                let spirq::var::Variable::Descriptor {
                    name, desc_bind, desc_ty, ty, ..
                } = var
                else {
                    continue;
                };

                use spirq::ty::DescriptorType;
                let kind = match desc_ty {
                    DescriptorType::UniformBuffer() => BindingKind::UniformBuffer,
                    DescriptorType::CombinedImageSampler() | DescriptorType::SampledImage() => {
                        BindingKind::CombinedSampler
                    }
                    other => {
                        log::warn!("Ignoring unsupported descriptor type {:?}", other);
                        continue;
                    }
                };

                // Entry points of one module may reference the same resource
                let (set, binding) = (desc_bind.set(), desc_bind.bind());
                if resources.iter().any(|r| r.set == set && r.binding == binding) {
                    continue;
                }

                resources.push(ReflectedResource {
                    set,
                    binding,
                    kind,
                    size: ty.nbyte().unwrap_or(0) as vk::DeviceSize,
                    name: name.clone().unwrap_or_default(),
                });
            }
        }

        Ok(resources)
    }
}

/// Reinterpret a SPIR-V file's bytes as words after basic validation.
pub fn spirv_words(path: &Path, bytes: &[u8]) -> Result<Vec<u32>> {
    let fail = |reason: String| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(fail(format!("size {} is not a non-zero multiple of 4", bytes.len())));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(fail(format!("bad magic number {:#010x}", words[0])));
    }

    Ok(words)
}

struct ShaderStage {
    stage: vk::ShaderStageFlags,
    module: vk::ShaderModule,
}

pub struct ShaderReflector {
    device: Arc<dyn Device>,
    reflect: Box<dyn Reflect>,
    stages: Vec<ShaderStage>,
    bindings: Vec<ShaderBinding>,
    layout: Option<vk::DescriptorSetLayout>,
    textures: HashMap<u32, Arc<Texture>>,
}

impl ShaderReflector {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self::with_reflect(device, Box::new(SpirqReflect))
    }

    pub fn with_reflect(device: Arc<dyn Device>, reflect: Box<dyn Reflect>) -> Self {
        Self {
            device,
            reflect,
            stages: Vec::new(),
            bindings: Vec::new(),
            layout: None,
            textures: HashMap::new(),
        }
    }

    /// Load, reflect and register a compiled shader stage.
    pub fn add_stage(&mut self, path: impl AsRef<Path>, stage: vk::ShaderStageFlags) -> Result<()> {
        let path = path.as_ref();
        if self.layout.is_some() {
            return Err(RenderError::LayoutFrozen);
        }

        let bytes = std::fs::read(path).map_err(|e| RenderError::ShaderLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let words = spirv_words(path, &bytes)?;

        self.add_stage_words(&words, stage, &path.display().to_string())
    }

    /// Register an in-memory SPIR-V binary. `label` names it in errors and logs.
    pub fn add_stage_words(&mut self, words: &[u32], stage: vk::ShaderStageFlags, label: &str) -> Result<()> {
        if self.layout.is_some() {
            return Err(RenderError::LayoutFrozen);
        }
        if words.first() != Some(&SPIRV_MAGIC) {
            return Err(RenderError::ShaderLoad {
                path: label.into(),
                reason: "missing SPIR-V magic number".to_string(),
            });
        }

        let resources = self.reflect.reflect(words).map_err(|reason| RenderError::Reflection {
            path: label.into(),
            reason,
        })?;

        let module = self
            .device
            .create_shader_module(words)
            .map_err(|result| RenderError::ShaderLoad {
                path: label.into(),
                reason: format!("device rejected the module: {}", result),
            })?;
        self.stages.push(ShaderStage { stage, module });

        let ordered = resources
            .iter()
            .filter(|r| r.kind == BindingKind::UniformBuffer)
            .chain(resources.iter().filter(|r| r.kind == BindingKind::CombinedSampler));
        for resource in ordered {
            let binding = self.bindings.len() as u32;
            if resource.binding != binding {
                log::warn!(
                    "{}: '{}' declares binding {} but is assigned binding {}",
                    label,
                    resource.name,
                    resource.binding,
                    binding
                );
            }
            self.bindings.push(ShaderBinding {
                binding,
                kind: resource.kind,
                size: resource.size,
                stage,
                name: resource.name.clone(),
            });
        }

        log::info!("Added {:?} stage {} ({} bindings total)", stage, label, self.bindings.len());
        Ok(())
    }

    pub fn bindings(&self) -> &[ShaderBinding] {
        &self.bindings
    }

    /// `(stage, module)` pairs in addition order, for pipeline creation.
    pub fn stages(&self) -> Vec<(vk::ShaderStageFlags, vk::ShaderModule)> {
        self.stages.iter().map(|s| (s.stage, s.module)).collect()
    }

    /// Descriptors of each kind needed for `image_count` sets.
    pub fn pool_sizes(&self, image_count: u32) -> Vec<vk::DescriptorPoolSize> {
        [BindingKind::UniformBuffer, BindingKind::CombinedSampler]
            .into_iter()
            .filter_map(|kind| {
                let occurrences = self.bindings.iter().filter(|b| b.kind == kind).count() as u32;
                (occurrences > 0).then(|| vk::DescriptorPoolSize {
                    ty: kind.descriptor_type(),
                    descriptor_count: occurrences * image_count,
                })
            })
            .collect()
    }

    /// Build the layout on first call; later `add_stage` calls fail.
    pub fn descriptor_set_layout(&mut self) -> Result<vk::DescriptorSetLayout> {
        if let Some(layout) = self.layout {
            return Ok(layout);
        }

        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(b.stage)
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);

        let layout = self
            .device
            .create_descriptor_set_layout(&layout_info)
            .vk_context("Failed to create descriptor set layout")?;
        self.layout = Some(layout);
        Ok(layout)
    }

    pub fn set_texture(&mut self, binding: u32, texture: Arc<Texture>) {
        self.textures.insert(binding, texture);
    }

    /// One pool, one set per swapchain image, one uniform buffer and one
    /// descriptor write per (resource, image) pair.
    pub fn build_descriptor_sets(
        &mut self,
        allocator: &ResourceAllocator,
        image_count: u32,
    ) -> Result<DescriptorResources> {
        if let Some(missing) = self
            .bindings
            .iter()
            .find(|b| b.kind == BindingKind::CombinedSampler && !self.textures.contains_key(&b.binding))
        {
            return Err(RenderError::MissingTexture {
                binding: missing.binding,
            });
        }

        let layout = self.descriptor_set_layout()?;

        let pool_sizes = self.pool_sizes(image_count);
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(image_count);
        let pool = self
            .device
            .create_descriptor_pool(&pool_info)
            .vk_context("Failed to create descriptor pool")?;

        let mut resources = DescriptorResources {
            device: self.device.clone(),
            pool,
            sets: Vec::new(),
            uniform_buffers: Vec::new(),
        };

        let layouts = vec![layout; image_count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        resources.sets = self
            .device
            .allocate_descriptor_sets(&alloc_info)
            .vk_context("Failed to allocate descriptor sets")?;

        for _ in 0..image_count {
            let mut per_image = Vec::new();
            for binding in self.bindings.iter().filter(|b| b.kind == BindingKind::UniformBuffer) {
                let buffer = allocator.create_host_buffer(binding.size.max(4), vk::BufferUsageFlags::UNIFORM_BUFFER)?;
                per_image.push((binding.binding, buffer));
            }
            resources.uniform_buffers.push(per_image);
        }

        // Infos live until update_descriptor_sets returns
        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut targets = Vec::new();
        for (image, &set) in resources.sets.iter().enumerate() {
            for binding in &self.bindings {
                match binding.kind {
                    BindingKind::UniformBuffer => {
                        let Some(buffer) = resources.uniform_buffer(image, binding.binding) else {
                            continue;
                        };
                        buffer_infos.push([vk::DescriptorBufferInfo {
                            buffer: buffer.handle(),
                            offset: 0,
                            range: buffer.size(),
                        }]);
                        targets.push((set, binding, buffer_infos.len() - 1));
                    }
                    BindingKind::CombinedSampler => {
                        let texture = &self.textures[&binding.binding];
                        image_infos.push([vk::DescriptorImageInfo {
                            sampler: texture.sampler(),
                            image_view: texture.view(),
                            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        }]);
                        targets.push((set, binding, image_infos.len() - 1));
                    }
                }
            }
        }

        let writes: Vec<vk::WriteDescriptorSet> = targets
            .iter()
            .map(|&(set, binding, index)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding.binding)
                    .descriptor_type(binding.kind.descriptor_type());
                match binding.kind {
                    BindingKind::UniformBuffer => write.buffer_info(&buffer_infos[index]),
                    BindingKind::CombinedSampler => write.image_info(&image_infos[index]),
                }
            })
            .collect();
        self.device.update_descriptor_sets(&writes);

        log::debug!("Wrote {} descriptors into {} sets", writes.len(), image_count);
        Ok(resources)
    }
}

impl Drop for ShaderReflector {
    fn drop(&mut self) {
        if let Some(layout) = self.layout.take() {
            self.device.destroy_descriptor_set_layout(layout);
        }
        for stage in self.stages.drain(..) {
            self.device.destroy_shader_module(stage.module);
        }
    }
}

/// Descriptor pool, per-image sets and per-image uniform buffers
pub struct DescriptorResources {
    device: Arc<dyn Device>,
    pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    /// `(binding, buffer)` per image
    uniform_buffers: Vec<Vec<(u32, GpuBuffer)>>,
}

impl DescriptorResources {
    pub fn uniform_buffer(&self, image: usize, binding: u32) -> Option<&GpuBuffer> {
        self.uniform_buffers
            .get(image)
            .and_then(|buffers| buffers.iter().find(|(b, _)| *b == binding))
            .map(|(_, buffer)| buffer)
    }
}

impl Drop for DescriptorResources {
    fn drop(&mut self) {
        self.uniform_buffers.clear();
        self.device.destroy_descriptor_pool(self.pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::{MockConfig, MockGpu};
    use crate::gpu::Instance;

    /// Returns canned resources keyed on the module's second word.
    struct TableReflect(HashMap<u32, Vec<ReflectedResource>>);

    impl Reflect for TableReflect {
        fn reflect(&self, words: &[u32]) -> std::result::Result<Vec<ReflectedResource>, String> {
            self.0
                .get(&words[1])
                .cloned()
                .ok_or_else(|| "unknown module".to_string())
        }
    }

    fn uniform(binding: u32, size: u64, name: &str) -> ReflectedResource {
        ReflectedResource {
            set: 0,
            binding,
            kind: BindingKind::UniformBuffer,
            size,
            name: name.to_string(),
        }
    }

    fn sampler(binding: u32, name: &str) -> ReflectedResource {
        ReflectedResource {
            set: 0,
            binding,
            kind: BindingKind::CombinedSampler,
            size: 0,
            name: name.to_string(),
        }
    }

    fn device() -> (MockGpu, Arc<dyn Device>) {
        let gpu = MockGpu::new(MockConfig::default());
        let instance = gpu.instance();
        let adapter = instance.enumerate_adapters().unwrap()[0];
        let device = instance
            .create_device(adapter, &[0], &[], &vk::PhysicalDeviceFeatures::default())
            .unwrap();
        (gpu, device)
    }

    fn reflector(device: Arc<dyn Device>) -> ShaderReflector {
        let mut table = HashMap::new();
        table.insert(1, vec![uniform(0, 64, "mvp")]);
        // Sampler declared before the uniform block in the fragment stage
        table.insert(2, vec![sampler(2, "albedo"), uniform(1, 16, "material")]);
        ShaderReflector::with_reflect(device, Box::new(TableReflect(table)))
    }

    #[test]
    fn test_binding_order_across_stages() {
        let (_gpu, device) = device();
        let mut reflector = reflector(device);

        reflector
            .add_stage_words(&[SPIRV_MAGIC, 1], vk::ShaderStageFlags::VERTEX, "vert")
            .unwrap();
        reflector
            .add_stage_words(&[SPIRV_MAGIC, 2], vk::ShaderStageFlags::FRAGMENT, "frag")
            .unwrap();

        let summary: Vec<_> = reflector
            .bindings()
            .iter()
            .map(|b| (b.binding, b.kind, b.stage, b.size))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, BindingKind::UniformBuffer, vk::ShaderStageFlags::VERTEX, 64),
                (1, BindingKind::UniformBuffer, vk::ShaderStageFlags::FRAGMENT, 16),
                (2, BindingKind::CombinedSampler, vk::ShaderStageFlags::FRAGMENT, 0),
            ]
        );
    }

    #[test]
    fn test_pool_sizes_scale_with_image_count() {
        let (_gpu, device) = device();
        let mut reflector = reflector(device);
        reflector
            .add_stage_words(&[SPIRV_MAGIC, 1], vk::ShaderStageFlags::VERTEX, "vert")
            .unwrap();
        reflector
            .add_stage_words(&[SPIRV_MAGIC, 2], vk::ShaderStageFlags::FRAGMENT, "frag")
            .unwrap();

        let sizes: Vec<_> = reflector
            .pool_sizes(3)
            .iter()
            .map(|s| (s.ty, s.descriptor_count))
            .collect();
        assert_eq!(
            sizes,
            vec![
                (vk::DescriptorType::UNIFORM_BUFFER, 6),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3),
            ]
        );
    }

    #[test]
    fn test_layout_freezes_stages() {
        let (_gpu, device) = device();
        let mut reflector = reflector(device);
        reflector
            .add_stage_words(&[SPIRV_MAGIC, 1], vk::ShaderStageFlags::VERTEX, "vert")
            .unwrap();

        let first = reflector.descriptor_set_layout().unwrap();
        let second = reflector.descriptor_set_layout().unwrap();
        assert_eq!(first, second);

        let result = reflector.add_stage_words(&[SPIRV_MAGIC, 2], vk::ShaderStageFlags::FRAGMENT, "frag");
        assert!(matches!(result, Err(RenderError::LayoutFrozen)));
    }

    #[test]
    fn test_reflection_failure_creates_no_module() {
        let (gpu, device) = device();
        let mut reflector = reflector(device);

        let result = reflector.add_stage_words(&[SPIRV_MAGIC, 99], vk::ShaderStageFlags::VERTEX, "bogus");
        assert!(matches!(result, Err(RenderError::Reflection { .. })));
        assert_eq!(gpu.live_count(crate::gpu::mock::HandleKind::ShaderModule), 0);
    }

    #[test]
    fn test_spirv_words_rejects_bad_input() {
        let path = Path::new("shader.spv");

        let empty = spirv_words(path, &[]);
        assert!(matches!(empty, Err(RenderError::ShaderLoad { .. })));

        let unaligned = spirv_words(path, &[0x03, 0x02, 0x23, 0x07, 0x00]);
        assert!(matches!(unaligned, Err(RenderError::ShaderLoad { .. })));

        let bad_magic = spirv_words(path, &[0, 0, 0, 0]);
        assert!(matches!(bad_magic, Err(RenderError::ShaderLoad { .. })));

        let words = spirv_words(path, &[0x03, 0x02, 0x23, 0x07, 0x01, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 1]);
    }

    #[test]
    fn test_missing_file_is_shader_load_error() {
        let (_gpu, device) = device();
        let mut reflector = reflector(device);

        let result = reflector.add_stage("does/not/exist.spv", vk::ShaderStageFlags::VERTEX);
        match result {
            Err(RenderError::ShaderLoad { path, .. }) => assert_eq!(path, Path::new("does/not/exist.spv")),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }
}
