// Resource lifecycle over the mock GPU: setup failures, uploads, descriptor
// bookkeeping and complete teardown.

mod common;

use ash::vk;
use std::collections::HashSet;

use vkframe::backend::pipeline::VertexLayout;
use vkframe::gpu::mock::{HandleKind, MockAdapter, MockConfig, MockGpu, MockWindow};
use vkframe::{RenderError, Renderer, RendererConfig};

#[test]
fn test_teardown_leaves_nothing_alive() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    for _ in 0..3 {
        renderer.draw_frame(&window, &mut ()).unwrap();
    }
    window.resize(1024, 768);
    for _ in 0..3 {
        renderer.draw_frame(&window, &mut ()).unwrap();
    }
    assert_eq!(renderer.swapchain().generations_built(), 2);

    drop(renderer);

    assert!(gpu.live_handles().is_empty(), "{:?}", gpu.live_handles());
    assert!(!gpu.device_alive());
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_teardown_before_first_frame() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let renderer = common::renderer(&gpu, &window, 3);

    drop(renderer);

    assert!(gpu.live_handles().is_empty(), "{:?}", gpu.live_handles());
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_staging_upload_lands_in_device_memory() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let renderer = common::renderer(&gpu, &window, 2);

    let mesh = renderer.mesh().unwrap();
    assert_eq!(mesh.index_count, 6);
    assert_eq!(
        gpu.buffer_contents(mesh.vertex_buffer.handle()).unwrap(),
        bytemuck::cast_slice::<f32, u8>(&common::QUAD_VERTICES)
    );
    assert_eq!(
        gpu.buffer_contents(mesh.index_buffer.handle()).unwrap(),
        bytemuck::cast_slice::<u32, u8>(&common::QUAD_INDICES)
    );

    // Staging buffers and one-shot command buffers are released
    assert_eq!(gpu.live_count(HandleKind::Buffer), 2);
    assert_eq!(gpu.live_count(HandleKind::CommandBuffer), 0);
    assert_eq!(gpu.pending_submissions(), 0);
}

#[test]
fn test_empty_upload_is_rejected() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    let buffers = gpu.live_count(HandleKind::Buffer);

    let result = renderer
        .allocator()
        .upload_via_staging(&[], vk::BufferUsageFlags::VERTEX_BUFFER);
    assert!(matches!(result, Err(RenderError::EmptyBuffer)));

    let err = renderer
        .upload_mesh(&[], &[], VertexLayout::packed_f32(&[2]))
        .unwrap_err();
    assert!(matches!(err, RenderError::EmptyBuffer));

    // The previous mesh survives and nothing zero-sized reached the device
    assert_eq!(renderer.mesh().unwrap().index_count, 6);
    assert_eq!(gpu.live_count(HandleKind::Buffer), buffers);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_descriptor_writes_are_unique_per_set_and_binding() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    renderer.create_swapchain(&window).unwrap();

    let writes = gpu.descriptor_writes();
    // 3 images x (2 uniform buffers + 1 sampler)
    assert_eq!(writes.len(), 9);
    let targets: HashSet<_> = writes.iter().map(|&(set, binding, _)| (set, binding)).collect();
    assert_eq!(targets.len(), 9);

    let samplers: Vec<_> = writes
        .iter()
        .filter(|(_, _, ty)| *ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .map(|&(_, binding, _)| binding)
        .collect();
    assert_eq!(samplers, vec![2, 2, 2]);

    // Each uniform binding of each image has its own buffer
    let generation = renderer.swapchain().generation().unwrap();
    let descriptors = generation.descriptors.as_ref().unwrap();
    let buffers: HashSet<_> = (0..3)
        .flat_map(|image| [0, 1].map(|binding| descriptors.uniform_buffer(image, binding).unwrap().handle()))
        .collect();
    assert_eq!(buffers.len(), 6);
    assert_eq!(descriptors.uniform_buffer(0, 0).unwrap().size(), 64);
    assert_eq!(descriptors.uniform_buffer(0, 1).unwrap().size(), 16);
}

#[test]
fn test_missing_texture_fails_swapchain_creation() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::bare_renderer(&gpu, &window, 2);

    let err = renderer.create_swapchain(&window).unwrap_err();

    assert!(matches!(err, RenderError::MissingTexture { binding: 2 }), "{}", err);
    assert!(renderer.swapchain().is_uninitialized());
    // The half-built generation cleaned up after itself
    assert_eq!(gpu.live_count(HandleKind::Swapchain), 0);
    assert_eq!(gpu.live_count(HandleKind::ImageView), 0);
    assert_eq!(gpu.live_count(HandleKind::Framebuffer), 0);

    drop(renderer);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_texture_byte_count_is_checked() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::bare_renderer(&gpu, &window, 2);

    let Err(err) = renderer.set_texture(2, 4, 4, &[0; 10]) else {
        panic!("short pixel buffer was accepted");
    };

    assert!(
        matches!(
            err,
            RenderError::TextureSize {
                expected: 64,
                actual: 10,
                ..
            }
        ),
        "{}",
        err
    );
}

#[test]
fn test_shaders_frozen_once_swapchain_exists() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    renderer.create_swapchain(&window).unwrap();

    let err = renderer
        .reflector_mut()
        .add_stage_words(&common::VERTEX_MODULE, vk::ShaderStageFlags::VERTEX, "late")
        .unwrap_err();

    assert!(matches!(err, RenderError::LayoutFrozen));
    assert_eq!(renderer.reflector().bindings().len(), 3);
}

#[test]
fn test_no_suitable_adapter() {
    let mut adapter = MockAdapter::capable("No swapchain");
    adapter.extensions.clear();
    let gpu = MockGpu::new(MockConfig {
        adapters: vec![adapter],
        ..Default::default()
    });
    let window = MockWindow::new(800, 600);

    let result = Renderer::with_reflect(
        gpu.instance(),
        &window,
        RendererConfig::default(),
        Box::new(common::CubeReflect),
    );

    let Err(err) = result else {
        panic!("adapter without swapchain support was accepted");
    };
    assert!(matches!(err, RenderError::NoSuitableDevice));
    // The surface created before selection is released
    assert!(gpu.live_handles().is_empty());
    assert!(!gpu.device_alive());
}

#[test]
fn test_unsupported_depth_formats() {
    let gpu = MockGpu::new(MockConfig {
        depth_formats: Vec::new(),
        ..Default::default()
    });
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    let err = renderer.create_swapchain(&window).unwrap_err();

    assert!(matches!(err, RenderError::NoSupportedDepthFormat));
    assert_eq!(gpu.live_count(HandleKind::Swapchain), 0);
}

#[test]
fn test_preferred_present_mode_is_used_when_available() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    renderer.create_swapchain(&window).unwrap();

    assert_eq!(
        renderer.swapchain().generation().unwrap().present_mode,
        vk::PresentModeKHR::MAILBOX
    );
}
