// Frame protocol over the mock GPU: frames in flight, staleness handling,
// minimized windows and the run loop.

mod common;

use ash::vk;

use common::FrameCounter;
use vkframe::backend::SwapchainState;
use vkframe::gpu::mock::{HandleKind, MockCommand, MockEvent, MockWindow};
use vkframe::{FrameOutcome, RenderError};

fn position(events: &[MockEvent], wanted: &MockEvent) -> usize {
    events
        .iter()
        .position(|e| e == wanted)
        .unwrap_or_else(|| panic!("{:?} not in {:?}", wanted, events))
}

#[test]
fn test_frames_in_flight_are_bounded() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    let mut data = FrameCounter::default();

    for _ in 0..10 {
        let outcome = renderer.draw_frame(&window, &mut data).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    }

    assert_eq!(gpu.max_in_flight(), 2);
    assert_eq!(renderer.sync().frame_index(), 10);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_single_frame_in_flight() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 1);

    for _ in 0..5 {
        renderer.draw_frame(&window, &mut ()).unwrap();
    }

    assert_eq!(gpu.max_in_flight(), 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_images_rotate_across_frames() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    let indices: Vec<u32> = (0..6)
        .map(|_| match renderer.draw_frame(&window, &mut ()).unwrap() {
            FrameOutcome::Presented { image_index } => image_index,
            FrameOutcome::Skipped => panic!("unexpected skip"),
        })
        .collect();

    assert_eq!(renderer.swapchain().generation().unwrap().image_count(), 3);
    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_out_of_date_acquire_rebuilds_before_next_frame() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    gpu.out_of_date_on_acquire(5);

    for _ in 0..4 {
        renderer.draw_frame(&window, &mut ()).unwrap();
    }
    let submits = gpu.submit_calls();
    gpu.clear_events();

    // Nothing is submitted for the failed acquire
    assert_eq!(renderer.draw_frame(&window, &mut ()).unwrap(), FrameOutcome::Skipped);
    assert_eq!(gpu.submit_calls(), submits);
    assert!(renderer.swapchain().is_stale());

    let outcome = renderer.draw_frame(&window, &mut ()).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
    assert_eq!(gpu.submit_calls(), submits + 1);
    assert_eq!(renderer.swapchain().generations_built(), 2);

    // Old generation is gone before the new swapchain exists
    let events = gpu.events();
    let failed = position(&events, &MockEvent::Acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)));
    let idle = position(&events, &MockEvent::DeviceWaitIdle);
    let destroyed = position(&events, &MockEvent::Destroyed(HandleKind::Swapchain));
    let created = position(&events, &MockEvent::Created(HandleKind::Swapchain));
    let acquired = position(&events, &MockEvent::Acquire(Ok(0)));
    assert!(failed < idle);
    assert!(idle < destroyed);
    assert!(destroyed < created);
    assert!(created < acquired);

    // Teardown runs in reverse creation order
    let teardown: Vec<HandleKind> = events[idle..created]
        .iter()
        .filter_map(|e| match e {
            MockEvent::Destroyed(kind) => Some(*kind),
            _ => None,
        })
        .collect();
    let mut expected = vec![HandleKind::Framebuffer; 3];
    expected.extend([HandleKind::ImageView, HandleKind::Image, HandleKind::Memory]);
    expected.extend([HandleKind::CommandBuffer; 3]);
    expected.extend([HandleKind::Pipeline, HandleKind::PipelineLayout, HandleKind::RenderPass]);
    expected.extend([HandleKind::ImageView; 3]);
    expected.push(HandleKind::Swapchain);
    for _ in 0..6 {
        expected.extend([HandleKind::Buffer, HandleKind::Memory]);
    }
    expected.push(HandleKind::DescriptorPool);
    assert_eq!(teardown, expected);

    assert_eq!(gpu.live_count(HandleKind::Swapchain), 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_resize_with_out_of_date_acquire_rebuilds_once() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    renderer.draw_frame(&window, &mut ()).unwrap();

    window.resize(1024, 768);
    gpu.set_current_extent(Some(vk::Extent2D { width: 1024, height: 768 }));
    gpu.out_of_date_on_acquire(2);

    assert_eq!(renderer.draw_frame(&window, &mut ()).unwrap(), FrameOutcome::Skipped);
    assert_eq!(
        renderer.draw_frame(&window, &mut ()).unwrap(),
        FrameOutcome::Presented { image_index: 0 }
    );
    assert!(!renderer.swapchain().is_stale());
    renderer.draw_frame(&window, &mut ()).unwrap();

    assert_eq!(renderer.swapchain().generations_built(), 2);
    assert_eq!(
        renderer.swapchain().generation().unwrap().extent,
        vk::Extent2D { width: 1024, height: 768 }
    );
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_acquire_failure_is_fatal() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    gpu.fail_on_acquire(2, vk::Result::ERROR_DEVICE_LOST);

    renderer.draw_frame(&window, &mut ()).unwrap();
    let submits = gpu.submit_calls();

    let err = renderer.draw_frame(&window, &mut ()).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Vulkan {
            result: vk::Result::ERROR_DEVICE_LOST,
            ..
        }
    ));
    assert_eq!(gpu.submit_calls(), submits);
    assert!(!renderer.swapchain().is_stale());
    assert_eq!(renderer.swapchain().generations_built(), 1);
}

#[test]
fn test_present_failure_is_fatal() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    gpu.fail_on_present(1, vk::Result::ERROR_SURFACE_LOST_KHR);

    let err = renderer.draw_frame(&window, &mut ()).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Vulkan {
            result: vk::Result::ERROR_SURFACE_LOST_KHR,
            ..
        }
    ));
    assert!(!renderer.swapchain().is_stale());
    assert_eq!(renderer.sync().frame_index(), 0);
}

#[test]
fn test_suboptimal_present_marks_stale() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    gpu.suboptimal_on_present(2);

    renderer.draw_frame(&window, &mut ()).unwrap();
    assert!(matches!(renderer.swapchain().state(), SwapchainState::Presenting(_)));

    // The frame itself still counts
    let outcome = renderer.draw_frame(&window, &mut ()).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    assert!(renderer.swapchain().is_stale());

    renderer.draw_frame(&window, &mut ()).unwrap();
    assert_eq!(renderer.swapchain().generations_built(), 2);
    assert!(matches!(renderer.swapchain().state(), SwapchainState::Presenting(_)));
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_out_of_date_present_marks_stale() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    gpu.out_of_date_on_present(1);

    renderer.draw_frame(&window, &mut ()).unwrap();
    assert!(renderer.swapchain().is_stale());

    renderer.draw_frame(&window, &mut ()).unwrap();
    assert_eq!(renderer.swapchain().generations_built(), 2);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_resize_rebuilds_at_new_extent() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    renderer.draw_frame(&window, &mut ()).unwrap();
    assert_eq!(
        renderer.swapchain().generation().unwrap().extent,
        vk::Extent2D { width: 800, height: 600 }
    );

    window.resize(1024, 768);
    gpu.set_current_extent(Some(vk::Extent2D { width: 1024, height: 768 }));

    // The resize flag is picked up after present, the rebuild happens next frame
    renderer.draw_frame(&window, &mut ()).unwrap();
    assert!(renderer.swapchain().is_stale());
    renderer.draw_frame(&window, &mut ()).unwrap();

    assert_eq!(
        renderer.swapchain().generation().unwrap().extent,
        vk::Extent2D { width: 1024, height: 768 }
    );
    assert_eq!(gpu.live_count(HandleKind::Swapchain), 1);
    assert_eq!(gpu.live_count(HandleKind::Framebuffer), 3);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_undefined_surface_extent_follows_window() {
    let gpu = common::gpu();
    gpu.set_current_extent(None);
    let window = MockWindow::new(640, 480);
    let mut renderer = common::renderer(&gpu, &window, 2);

    renderer.draw_frame(&window, &mut ()).unwrap();

    assert_eq!(
        renderer.swapchain().generation().unwrap().extent,
        vk::Extent2D { width: 640, height: 480 }
    );
}

#[test]
fn test_minimized_window_waits_before_rebuild() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    renderer.draw_frame(&window, &mut ()).unwrap();
    window.minimize((800, 600));
    renderer.draw_frame(&window, &mut ()).unwrap();
    assert!(renderer.swapchain().is_stale());

    let outcome = renderer.draw_frame(&window, &mut ()).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    assert_eq!(window.wait_count(), 1);
    assert_eq!(renderer.swapchain().generations_built(), 2);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_close_while_minimized_skips_frame() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    renderer.draw_frame(&window, &mut ()).unwrap();
    window.minimize((800, 600));
    renderer.draw_frame(&window, &mut ()).unwrap();
    window.close_after(0);

    let acquires = gpu.acquire_calls();
    assert_eq!(renderer.draw_frame(&window, &mut ()).unwrap(), FrameOutcome::Skipped);
    assert_eq!(gpu.acquire_calls(), acquires);
    assert_eq!(window.wait_count(), 0);
    assert_eq!(renderer.swapchain().generations_built(), 1);
}

#[test]
fn test_uniforms_filled_per_frame() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    let mut data = FrameCounter::default();

    for _ in 0..3 {
        renderer.draw_frame(&window, &mut data).unwrap();
    }

    // Uniform bindings only, in binding order
    assert_eq!(data.fills, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);

    let generation = renderer.swapchain().generation().unwrap();
    let descriptors = generation.descriptors.as_ref().unwrap();
    for image in 0..3 {
        let buffer = descriptors.uniform_buffer(image, 0).unwrap();
        let contents = gpu.buffer_contents(buffer.handle()).unwrap();
        assert_eq!(&contents[..8], &(image as u64).to_le_bytes());
    }
}

#[test]
fn test_recorded_draw() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);

    renderer.draw_frame(&window, &mut ()).unwrap();

    let generation = renderer.swapchain().generation().unwrap();
    let mesh = renderer.mesh().unwrap();
    let commands = gpu.recorded_commands(generation.command_buffers[0]);
    assert_eq!(
        commands,
        vec![
            MockCommand::BeginRenderPass {
                framebuffer: generation.framebuffers[0]
            },
            MockCommand::BindPipeline(generation.pipeline.as_ref().unwrap().pipeline),
            MockCommand::BindVertexBuffer(mesh.vertex_buffer.handle()),
            MockCommand::BindIndexBuffer(mesh.index_buffer.handle()),
            MockCommand::BindDescriptorSet(generation.descriptor_set(0).unwrap()),
            MockCommand::DrawIndexed(6),
            MockCommand::EndRenderPass,
        ]
    );
}

#[test]
fn test_run_until_close() {
    let gpu = common::gpu();
    let window = MockWindow::new(800, 600);
    let mut renderer = common::renderer(&gpu, &window, 2);
    window.close_after(4);

    let presented = renderer.run(&window, &mut ()).unwrap();

    assert_eq!(presented, 3);
    assert_eq!(gpu.pending_submissions(), 0);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}
