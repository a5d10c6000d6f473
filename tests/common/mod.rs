// Shared fixtures: a renderer over the mock GPU with a two-stage shader set,
// a quad mesh and one texture.

#![allow(dead_code)]

use ash::vk;

use vkframe::backend::pipeline::VertexLayout;
use vkframe::backend::shader::{BindingKind, Reflect, ReflectedResource, ShaderBinding, SPIRV_MAGIC};
use vkframe::gpu::mock::{MockConfig, MockGpu, MockWindow};
use vkframe::{FrameDataSource, Renderer, RendererConfig};

pub const VERTEX_MODULE: [u32; 2] = [SPIRV_MAGIC, 1];
pub const FRAGMENT_MODULE: [u32; 2] = [SPIRV_MAGIC, 2];

#[rustfmt::skip]
pub const QUAD_VERTICES: [f32; 8] = [
    -0.5, -0.5,
     0.5, -0.5,
     0.5,  0.5,
    -0.5,  0.5,
];
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// mvp (64 bytes) in the vertex stage; material (16 bytes) and albedo in
/// the fragment stage, sampler declared first.
pub struct CubeReflect;

impl Reflect for CubeReflect {
    fn reflect(&self, words: &[u32]) -> Result<Vec<ReflectedResource>, String> {
        match words.get(1) {
            Some(1) => Ok(vec![resource(0, BindingKind::UniformBuffer, 64, "mvp")]),
            Some(2) => Ok(vec![
                resource(2, BindingKind::CombinedSampler, 0, "albedo"),
                resource(1, BindingKind::UniformBuffer, 16, "material"),
            ]),
            _ => Err("unknown module".to_string()),
        }
    }
}

fn resource(binding: u32, kind: BindingKind, size: u64, name: &str) -> ReflectedResource {
    ReflectedResource {
        set: 0,
        binding,
        kind,
        size,
        name: name.to_string(),
    }
}

/// Writes the frame index into every uniform binding.
#[derive(Default)]
pub struct FrameCounter {
    pub fills: Vec<(u64, u32)>,
}

impl FrameDataSource for FrameCounter {
    fn fill(&mut self, frame_index: u64, binding: &ShaderBinding) -> Vec<u8> {
        self.fills.push((frame_index, binding.binding));
        frame_index.to_le_bytes().to_vec()
    }
}

pub fn gpu() -> MockGpu {
    MockGpu::new(MockConfig::default())
}

/// Renderer with shaders registered but no mesh or texture.
pub fn bare_renderer(gpu: &MockGpu, window: &MockWindow, frames_in_flight: usize) -> Renderer {
    let config = RendererConfig {
        max_frames_in_flight: frames_in_flight,
        ..Default::default()
    };
    let mut renderer = match Renderer::with_reflect(gpu.instance(), window, config, Box::new(CubeReflect)) {
        Ok(renderer) => renderer,
        Err(e) => panic!("renderer creation failed: {}", e),
    };
    renderer
        .reflector_mut()
        .add_stage_words(&VERTEX_MODULE, vk::ShaderStageFlags::VERTEX, "vert")
        .unwrap();
    renderer
        .reflector_mut()
        .add_stage_words(&FRAGMENT_MODULE, vk::ShaderStageFlags::FRAGMENT, "frag")
        .unwrap();
    renderer
}

/// Renderer ready to draw: shaders, quad mesh and a 2x2 texture at binding 2.
pub fn renderer(gpu: &MockGpu, window: &MockWindow, frames_in_flight: usize) -> Renderer {
    let mut renderer = bare_renderer(gpu, window, frames_in_flight);
    renderer
        .upload_mesh(
            bytemuck::cast_slice(&QUAD_VERTICES),
            &QUAD_INDICES,
            VertexLayout::packed_f32(&[2]),
        )
        .unwrap();
    renderer.set_texture(2, 2, 2, &[255; 16]).unwrap();
    renderer
}
