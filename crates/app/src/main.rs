//! Vulkan Renderer - Main Entry Point
//!
//! Drives the frame pipeline from a winit event loop: every redraw runs
//! `start_frame`, records a clear pass and calls `end_frame`.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use renderer_core::FrameTimer;
use renderer_platform::{Surface, Window};
use renderer_renderer::FrameController;
use renderer_rhi::Extent2d;
use renderer_rhi::device::VulkanDevice;
use renderer_rhi::instance::Instance;
use renderer_rhi::physical_device::select_physical_device;

use crate::config::{AppConfig, CONFIG_PATH};

/// GPU objects in teardown order: fields drop top to bottom. Everything
/// after the controller is held only to keep it alive that long.
struct Gpu {
    controller: FrameController<VulkanDevice>,
    _device: Arc<VulkanDevice>,
    _surface: Surface,
    _instance: Instance,
}

impl Gpu {
    fn new(window: &Window, config: &AppConfig) -> Result<Self> {
        let extensions = window.required_extensions()?;
        let instance = Instance::new(c"renderer", &extensions, config.validation)
            .context("Failed to create Vulkan instance")?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())
                .context("Failed to select a GPU")?;

        let device = VulkanDevice::new(&instance, surface.handle(), &physical_device)
            .context("Failed to create logical device")?;

        let (width, height) = window.drawable_size();
        let mut controller = FrameController::new(
            device.clone(),
            Extent2d::new(width, height),
            config.frame.clone(),
        );
        if !controller.startup() {
            match controller.fatal_error() {
                Some(e) => anyhow::bail!("Frame pipeline startup failed: {}", e),
                None => anyhow::bail!("Frame pipeline startup failed"),
            }
        }

        Ok(Self {
            controller,
            _device: device,
            _surface: surface,
            _instance: instance,
        })
    }
}

struct App {
    config: AppConfig,
    /// Dropped before the window it presents to
    gpu: Option<Gpu>,
    window: Option<Window>,
    timer: FrameTimer,
}

impl App {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            gpu: None,
            window: None,
            timer: FrameTimer::default(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_config = &self.config.window;
        let window = Window::new(
            event_loop,
            window_config.width,
            window_config.height,
            &window_config.title,
        )?;
        let gpu = Gpu::new(&window, &self.config)?;

        info!("Initialization complete, entering main loop");
        self.gpu = Some(gpu);
        self.window = Some(window);
        Ok(())
    }

    /// Runs one engine tick. Returns false once the pipeline hit a fatal error.
    fn redraw(&mut self) -> bool {
        let Some(gpu) = self.gpu.as_mut() else {
            return true;
        };
        let controller = &mut gpu.controller;
        let minimized = self.window.as_ref().is_some_and(Window::is_minimized);

        let _delta = self.timer.tick();
        let presented = if !minimized && controller.start_frame() {
            let clear_color = controller.config().clear_color;
            controller.begin_render_pass(clear_color);
            controller.end_render_pass();
            controller.end_frame()
        } else {
            false
        };
        self.timer.record(presented);

        if let Some(e) = controller.fatal_error() {
            error!("Frame pipeline stopped: {}", e);
            return false;
        }

        if let Some(report) = self.timer.take_report() {
            info!(
                "{:.1} fps ({} presented, {} skipped, {} recreation(s))",
                report.fps,
                report.presented,
                report.skipped,
                controller.recreation_count()
            );
        }
        true
    }

    fn shutdown(&mut self) {
        if let Some(mut gpu) = self.gpu.take() {
            gpu.controller.shutdown();
            info!(
                "Renderer shut down after {:.1}s",
                self.timer.elapsed().as_secs_f64()
            );
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            error!("Failed to initialize renderer: {:?}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(ref mut gpu) = self.gpu {
                    gpu.controller.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if !self.redraw() {
                    self.shutdown();
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    let config: AppConfig = renderer_core::config::load_or_default(CONFIG_PATH)?;

    renderer_core::init_logging(&config.log_filter);
    info!("Starting Vulkan Renderer");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
