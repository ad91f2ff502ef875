//! Integration tests for the frame loop against the headless device.

use std::sync::Arc;

use renderer_renderer::presentation::PresentationSurface;
use renderer_renderer::{FrameConfig, FrameController, FrameState};
use renderer_rhi::headless::{HeadlessConfig, HeadlessDevice};
use renderer_rhi::{Extent2d, RhiError};

const CLEAR: [f32; 4] = [0.1, 0.2, 0.3, 1.0];

fn device(min_image_count: u32) -> Arc<HeadlessDevice> {
    renderer_core::init_logging("warn");
    Arc::new(HeadlessDevice::new(HeadlessConfig {
        min_image_count,
        ..HeadlessConfig::default()
    }))
}

fn started(device: &Arc<HeadlessDevice>, config: FrameConfig) -> FrameController<HeadlessDevice> {
    let mut controller = FrameController::new(device.clone(), Extent2d::new(800, 600), config);
    assert!(controller.startup());
    controller
}

/// Runs one full frame with a clear pass. Returns false if any step skipped.
fn run_frame(controller: &mut FrameController<HeadlessDevice>) -> bool {
    if !controller.start_frame() {
        return false;
    }
    controller.begin_render_pass(CLEAR);
    controller.end_render_pass();
    controller.end_frame()
}

fn current_swapchain(
    controller: &FrameController<HeadlessDevice>,
) -> renderer_rhi::headless::HeadlessSwapchain {
    controller
        .surface()
        .and_then(PresentationSurface::swapchain)
        .expect("surface has a swapchain")
}

#[test]
fn test_ten_frames_cycle_frame_slots() {
    // Three images requested, the surface insists on four: N = 4, M = 3
    let device = device(4);
    let mut controller = started(&device, FrameConfig::default());

    let surface = controller.surface().unwrap();
    assert_eq!(surface.image_count(), 4);
    assert_eq!(surface.frames_in_flight(), 3);

    let mut slots = Vec::new();
    for _ in 0..10 {
        slots.push(controller.current_frame_slot());
        assert!(run_frame(&mut controller));
    }

    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(controller.recreation_count(), 0);
    assert_eq!(device.stats().swapchains_created, 1);
    assert_eq!(device.stats().presents, 10);
}

#[test]
fn test_two_frames_in_flight_alternate() {
    let device = device(2);
    let mut controller = started(&device, FrameConfig::default());
    assert_eq!(controller.surface().unwrap().frames_in_flight(), 2);

    let mut slots = Vec::new();
    for _ in 0..6 {
        slots.push(controller.current_frame_slot());
        assert!(run_frame(&mut controller));
    }
    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
}

#[test]
fn test_resize_mid_run_recreates_once() {
    let device = device(4);
    let mut controller = started(&device, FrameConfig::default());

    for _ in 0..5 {
        assert!(run_frame(&mut controller));
    }

    controller.resize(1280, 720);
    assert!(controller.generations().desired > controller.generations().built);

    // Frame 6 is spent rebuilding
    assert!(!run_frame(&mut controller));
    assert_eq!(controller.recreation_count(), 1);
    assert_eq!(controller.state(), FrameState::AwaitingRecreation);

    for _ in 0..4 {
        assert!(run_frame(&mut controller));
    }

    let generations = controller.generations();
    assert_eq!(generations.built, generations.desired);
    assert_eq!(controller.recreation_count(), 1);
    assert_eq!(device.stats().swapchains_created, 2);
    assert_eq!(
        controller.surface().unwrap().extent(),
        Extent2d::new(1280, 720)
    );
}

#[test]
fn test_zero_sized_resize_waits_for_real_size() {
    let device = device(3);
    let mut controller = started(&device, FrameConfig::default());
    assert!(run_frame(&mut controller));

    controller.resize(0, 600);
    assert!(!controller.start_frame());
    controller.resize(800, 0);
    assert!(!controller.start_frame());
    assert!(!controller.start_frame());
    assert_eq!(controller.recreation_count(), 0);
    assert_eq!(controller.state(), FrameState::AwaitingRecreation);

    controller.resize(800, 600);
    assert!(!controller.start_frame());
    assert_eq!(controller.recreation_count(), 1);
    assert!(run_frame(&mut controller));
}

#[test]
fn test_startup_with_minimized_window_defers_surface() {
    let device = device(3);
    let mut controller =
        FrameController::new(device.clone(), Extent2d::new(0, 0), FrameConfig::default());
    assert!(controller.startup());
    assert!(controller.surface().is_none());
    assert!(!controller.start_frame());
    assert_eq!(device.stats().swapchains_created, 0);

    controller.resize(640, 480);
    assert!(!controller.start_frame());
    assert!(controller.surface().is_some());
    assert_eq!(controller.recreation_count(), 0);
    assert!(run_frame(&mut controller));
}

#[test]
fn test_acquire_out_of_date_skips_without_advancing() {
    let device = device(4);
    let mut controller = started(&device, FrameConfig::default());
    assert!(run_frame(&mut controller));
    assert!(run_frame(&mut controller));

    let slot = controller.current_frame_slot();
    device.invalidate_swapchain(current_swapchain(&controller));

    assert!(!controller.start_frame());
    assert_eq!(controller.current_frame_slot(), slot);
    assert_eq!(controller.recreation_count(), 1);
    assert!(controller.fatal_error().is_none());

    assert!(run_frame(&mut controller));
    assert_eq!(controller.current_frame_slot(), (slot + 1) % 3);
}

#[test]
fn test_present_out_of_date_reports_skip() {
    let device = device(4);
    let mut controller = started(&device, FrameConfig::default());
    assert!(run_frame(&mut controller));

    assert!(controller.start_frame());
    let slot = controller.current_frame_slot();
    device.invalidate_swapchain(current_swapchain(&controller));
    controller.begin_render_pass(CLEAR);
    controller.end_render_pass();

    assert!(!controller.end_frame());
    assert_eq!(controller.current_frame_slot(), slot);
    assert_eq!(controller.recreation_count(), 1);
    assert!(controller.fatal_error().is_none());

    assert!(run_frame(&mut controller));
}

#[test]
fn test_minimized_surface_is_not_rebuilt_at_zero_size() {
    let device = device(3);
    let mut controller = started(&device, FrameConfig::default());
    assert!(run_frame(&mut controller));

    // Minimized before the resize event arrives
    device.set_current_extent(Some(Extent2d::new(0, 0)));
    device.invalidate_swapchain(current_swapchain(&controller));

    for _ in 0..4 {
        assert!(!controller.start_frame());
    }
    assert_eq!(device.stats().swapchains_created, 1);
    assert_eq!(controller.recreation_count(), 0);
    assert!(controller.fatal_error().is_none());

    let surface = controller.surface().unwrap();
    assert_eq!(surface.image_count(), 3);
    assert_eq!(surface.frames_in_flight(), 2);

    device.set_current_extent(None);
    assert!(!controller.start_frame());
    assert_eq!(device.stats().swapchains_created, 2);
    assert_eq!(controller.recreation_count(), 1);
    assert!(run_frame(&mut controller));
}

#[test]
fn test_startup_while_surface_reports_zero_extent() {
    let device = device(3);
    device.set_current_extent(Some(Extent2d::new(0, 0)));
    let mut controller = started(&device, FrameConfig::default());
    assert!(controller.surface().is_none());

    assert!(!controller.start_frame());
    assert!(!controller.start_frame());
    assert_eq!(device.stats().swapchains_created, 0);
    assert!(controller.fatal_error().is_none());

    device.set_current_extent(None);
    assert!(!controller.start_frame());
    assert!(controller.surface().is_some());
    assert!(run_frame(&mut controller));
}

#[test]
fn test_shutdown_stops_the_frame_loop() {
    let device = device(3);
    let mut controller = started(&device, FrameConfig::default());
    assert!(run_frame(&mut controller));

    controller.shutdown();
    assert!(!controller.start_frame());
    assert!(!controller.start_frame());
    assert!(controller.surface().is_none());
    assert_eq!(device.stats().swapchains_created, 1);
    assert!(device.live_objects().is_empty());
}

#[test]
fn test_out_of_date_recreates_only_the_reporting_surface() {
    let device = device(3);
    let config = FrameConfig::default();
    let mut first =
        PresentationSurface::create(device.clone(), Extent2d::new(640, 480), &config).unwrap();
    let mut second =
        PresentationSurface::create(device.clone(), Extent2d::new(320, 240), &config).unwrap();
    let second_swapchain = second.swapchain();

    device.invalidate_swapchain(first.swapchain().unwrap());
    assert!(first.acquire_next_image(0, u64::MAX).unwrap().is_none());

    assert_eq!(first.recreation_count(), 1);
    assert_eq!(second.recreation_count(), 0);
    assert_eq!(second.swapchain(), second_swapchain);
    assert!(second.acquire_next_image(0, u64::MAX).unwrap().is_some());
}

#[test]
fn test_stalled_fence_skips_frame() {
    let device = device(2);
    let config = FrameConfig {
        frame_timeout_ms: Some(5),
        ..FrameConfig::default()
    };
    let mut controller = started(&device, config);

    // Both frame slots now have work pending
    assert!(run_frame(&mut controller));
    assert!(run_frame(&mut controller));

    device.set_stalled(true);
    assert!(!controller.start_frame());
    assert_eq!(controller.state(), FrameState::Idle);
    assert_eq!(controller.current_frame_slot(), 0);
    assert!(controller.fatal_error().is_none());

    device.set_stalled(false);
    assert!(run_frame(&mut controller));
    assert_eq!(controller.recreation_count(), 0);
}

#[test]
fn test_owner_wait_timeout_schedules_rebuild() {
    let device = device(4);
    let mut controller = started(&device, FrameConfig::default());
    // Image 0 every frame, so the second frame must wait on the first's fence
    device.set_acquire_order(vec![0]);

    assert!(run_frame(&mut controller));
    device.set_stalled(true);

    assert!(controller.start_frame());
    assert_eq!(controller.current_image_index(), 0);
    assert_eq!(controller.current_frame_slot(), 1);
    assert!(!controller.end_frame());
    assert!(controller.fatal_error().is_none());

    // The rebuild drains the queue even while stalled
    assert!(!controller.start_frame());
    assert_eq!(controller.recreation_count(), 1);

    device.set_stalled(false);
    assert!(run_frame(&mut controller));
}

#[test]
fn test_device_loss_is_latched() {
    let device = device(3);
    let mut controller = started(&device, FrameConfig::default());
    assert!(run_frame(&mut controller));

    device.lose_device();
    assert!(!controller.start_frame());
    assert!(matches!(
        controller.fatal_error(),
        Some(RhiError::DeviceLost)
    ));

    assert!(!controller.start_frame());
    assert!(!controller.startup());
    assert!(matches!(
        controller.fatal_error(),
        Some(RhiError::DeviceLost)
    ));

    controller.shutdown();
    assert!(device.live_objects().is_empty());
}

#[test]
fn test_suboptimal_swapchain_is_rebuilt() {
    let device = device(3);
    let mut controller = started(&device, FrameConfig::default());
    device.mark_suboptimal(current_swapchain(&controller));

    // Still presented, but a rebuild is scheduled
    assert!(run_frame(&mut controller));
    assert!(!run_frame(&mut controller));
    assert_eq!(controller.recreation_count(), 1);
    assert!(run_frame(&mut controller));
    assert_eq!(controller.recreation_count(), 1);
}

#[test]
fn test_out_of_order_acquire_keeps_single_owners() {
    let device = device(4);
    let mut controller = started(&device, FrameConfig::default());
    device.set_acquire_order(vec![2, 0, 3, 3, 1]);

    let mut images = Vec::new();
    for _ in 0..12 {
        assert!(controller.start_frame());
        images.push(controller.current_image_index());
        controller.begin_render_pass(CLEAR);
        controller.end_render_pass();
        assert!(controller.end_frame());

        let surface = controller.surface().unwrap();
        let frames_in_flight = surface.frames_in_flight();
        assert!(
            surface
                .image_owners()
                .iter()
                .flatten()
                .all(|&owner| owner < frames_in_flight)
        );
    }

    assert!(images.iter().all(|&index| index < 4));
    assert_eq!(&images[..5], &[2, 0, 3, 3, 1]);
}

#[test]
fn test_render_pass_is_recorded() {
    let device = device(3);
    let mut controller = started(&device, FrameConfig::default());

    assert!(controller.start_frame());
    controller.begin_render_pass(CLEAR);
    controller.end_render_pass();

    let raw = controller
        .command_buffer()
        .and_then(|cmd| cmd.raw())
        .unwrap();
    let framebuffer = controller.framebuffer().unwrap().id();
    let commands = device.recorded_commands(raw);
    assert_eq!(
        commands,
        vec![
            renderer_rhi::headless::RecordedCommand::Begin(Default::default()),
            renderer_rhi::headless::RecordedCommand::BeginRenderPass {
                framebuffer,
                clear_color: CLEAR,
            },
            renderer_rhi::headless::RecordedCommand::EndRenderPass { framebuffer },
        ]
    );
    assert!(controller.end_frame());
}

#[test]
fn test_shutdown_releases_everything() {
    let device = device(4);
    let mut controller = started(&device, FrameConfig::default());
    for _ in 0..7 {
        assert!(run_frame(&mut controller));
    }
    controller.resize(1024, 768);
    assert!(!run_frame(&mut controller));
    assert!(run_frame(&mut controller));

    controller.shutdown();
    assert!(device.live_objects().is_empty());
    assert_eq!(device.pending_submissions(), 0);
    assert_eq!(controller.recreation_count(), 0);
    assert!(controller.surface().is_none());
}
