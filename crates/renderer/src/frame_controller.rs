//! Frame orchestration.
//!
//! [`FrameController`] drives one [`PresentationSurface`] through the frame
//! loop and is the only type the engine loop talks to:
//!
//! ```text
//! startup()
//! loop {
//!     resize(w, h)          // whenever the window reports a new size
//!     if start_frame() {    // false: skip drawing this tick
//!         record commands into command_buffer() / framebuffer()
//!         end_frame();
//!     }
//! }
//! shutdown()
//! ```
//!
//! Two indices roll at different rates. The frame slot advances by one after
//! every presented frame and selects the fence and semaphores. The image
//! index is whatever the presentation engine hands out. The surface's
//! ownership table ties them together: before an image is rendered again,
//! the fence of the frame slot that last rendered it is waited on.
//!
//! Transient failures (timeouts, out-of-date swapchains, zero-sized windows)
//! skip the frame. Fatal failures (device loss, out of memory) are latched:
//! every later call returns false and [`FrameController::fatal_error`]
//! reports the cause.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use renderer_rhi::command::CommandBuffer;
use renderer_rhi::{BeginFlags, ClearValues, Extent2d, GpuDevice, RhiError, RhiResult};

use crate::config::FrameConfig;
use crate::presentation::{PresentOutcome, PresentationSurface};
use crate::resize::{Generations, ResizeReconciler};

/// Where the controller is in the frame cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// Ready for `start_frame`.
    Idle,
    /// The surface was just rebuilt, or cannot be built at the current size.
    AwaitingRecreation,
    /// A frame was started and is being recorded.
    Recording,
}

/// Coordinates command recording, submission and presentation.
///
/// # Thread Safety
///
/// Not shared between threads. All calls come from the thread that submits
/// to the GPU.
pub struct FrameController<D: GpuDevice> {
    device: Arc<D>,
    config: FrameConfig,
    /// Set by `startup`, cleared by `shutdown`.
    started: bool,
    /// `None` until the window first has a non-zero size.
    surface: Option<PresentationSurface<D>>,
    reconciler: ResizeReconciler,
    state: FrameState,
    current_frame_slot: usize,
    current_image_index: u32,
    /// Set by suboptimal swapchains and recoverable failures.
    rebuild_requested: bool,
    fatal: Option<RhiError>,
}

impl<D: GpuDevice> FrameController<D> {
    /// Creates a controller for a drawable area of `extent`.
    ///
    /// Nothing is created on the device until [`startup`](Self::startup).
    pub fn new(device: Arc<D>, extent: Extent2d, config: FrameConfig) -> Self {
        Self {
            device,
            config,
            started: false,
            surface: None,
            reconciler: ResizeReconciler::new(extent),
            state: FrameState::Idle,
            current_frame_slot: 0,
            current_image_index: 0,
            rebuild_requested: false,
            fatal: None,
        }
    }

    /// Creates the presentation surface.
    ///
    /// With a zero-sized drawable area, creation is deferred to the first
    /// `start_frame` after a non-zero resize and this still returns true.
    pub fn startup(&mut self) -> bool {
        if self.fatal.is_some() {
            return false;
        }
        if self.started {
            warn!("Frame controller already started");
            return true;
        }

        let extent = self.reconciler.desired_extent();
        if extent.is_empty() {
            info!("Drawable area is {}, deferring surface creation", extent);
            self.started = true;
            self.state = FrameState::AwaitingRecreation;
            return true;
        }

        match self.create_surface(extent) {
            Ok(()) => {
                info!("Frame controller started on {} at {}", self.device.name(), extent);
                self.started = true;
                true
            }
            Err(RhiError::InvalidExtent(dictated)) => {
                info!("Surface reports {}, deferring surface creation", dictated);
                self.started = true;
                self.state = FrameState::AwaitingRecreation;
                true
            }
            Err(e) => {
                error!("Failed to create presentation surface: {}", e);
                if e.is_fatal() {
                    self.fatal = Some(e);
                }
                false
            }
        }
    }

    /// Prepares a frame for recording.
    ///
    /// Returns false when this tick should not draw: the controller is not
    /// started, the surface was rebuilt, the window has no area, a wait timed
    /// out, or a fatal error is latched.
    /// On true, the current image's command buffer is recording and
    /// [`end_frame`](Self::end_frame) must follow.
    pub fn start_frame(&mut self) -> bool {
        if self.fatal.is_some() || !self.started {
            return false;
        }
        debug_assert_ne!(
            self.state,
            FrameState::Recording,
            "start_frame called while a frame is recording"
        );

        match self.try_start_frame() {
            Ok(started) => started,
            Err(e) => self.handle_error("start_frame", e),
        }
    }

    fn try_start_frame(&mut self) -> RhiResult<bool> {
        let desired = self.reconciler.desired_extent();

        let Some(surface) = self.surface.as_mut() else {
            if desired.is_empty() {
                debug!("Drawable area is {}, skipping frame", desired);
                return Ok(false);
            }
            match self.create_surface(desired) {
                Ok(()) => {}
                Err(RhiError::InvalidExtent(dictated)) => {
                    debug!("Surface reports {}, skipping frame", dictated);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
            self.state = FrameState::AwaitingRecreation;
            return Ok(false);
        };

        if self.reconciler.is_stale() || self.rebuild_requested {
            if desired.is_empty() {
                debug!("Drawable area is {}, skipping frame", desired);
                self.state = FrameState::AwaitingRecreation;
                return Ok(false);
            }

            if surface.recreate(desired.width, desired.height)? {
                self.reconciler.mark_built();
                self.rebuild_requested = false;
                self.current_frame_slot %= surface.frames_in_flight();
            }
            self.state = FrameState::AwaitingRecreation;
            return Ok(false);
        }

        let slot = self.current_frame_slot;
        debug_assert!(
            slot < surface.frames_in_flight(),
            "frame slot {} out of range",
            slot
        );

        match surface
            .frame_sync(slot)
            .in_flight_fence()
            .wait(self.config.frame_timeout_ns())
        {
            Ok(()) => {}
            Err(RhiError::Timeout) => {
                warn!("Timed out waiting for frame slot {}, skipping frame", slot);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let acquired = match surface.acquire_next_image(slot, self.config.acquire_timeout_ns()) {
            Ok(Some(acquired)) => acquired,
            Ok(None) => {
                // The surface rebuilt itself; its frame count may have changed
                self.current_frame_slot %= surface.frames_in_flight();
                self.state = FrameState::AwaitingRecreation;
                return Ok(false);
            }
            Err(RhiError::Timeout) => {
                warn!("Timed out acquiring an image, skipping frame");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if acquired.suboptimal {
            debug!("Swapchain suboptimal on acquire, scheduling rebuild");
            self.rebuild_requested = true;
        }

        let cmd = surface.command_buffer_mut(acquired.index);
        cmd.reset()?;
        cmd.begin(BeginFlags::default())?;

        self.current_image_index = acquired.index;
        self.state = FrameState::Recording;
        trace!("Frame started: slot {}, image {}", slot, acquired.index);
        Ok(true)
    }

    /// Ends recording, submits the frame and presents it.
    ///
    /// Returns true if the image was queued for presentation.
    pub fn end_frame(&mut self) -> bool {
        if self.fatal.is_some() || !self.started {
            return false;
        }
        debug_assert_eq!(
            self.state,
            FrameState::Recording,
            "end_frame called without a recording frame"
        );
        if self.state != FrameState::Recording {
            return false;
        }

        let result = self.try_end_frame();
        self.state = FrameState::Idle;
        match result {
            Ok(presented) => presented,
            Err(e) => self.handle_error("end_frame", e),
        }
    }

    fn try_end_frame(&mut self) -> RhiResult<bool> {
        let Some(surface) = self.surface.as_mut() else {
            return Ok(false);
        };
        let slot = self.current_frame_slot;
        let image = self.current_image_index;

        surface.command_buffer_mut(image).end()?;

        // Work from an earlier frame slot may still be rendering into this image
        if let Some(owner) = surface.image_owner(image) {
            surface.frame_sync(owner).in_flight_fence().wait(u64::MAX)?;
        }

        surface.frame_sync(slot).in_flight_fence().reset()?;
        surface.set_image_owner(image, slot);

        surface.submit(slot, image)?;

        let outcome = surface.present(image, slot)?;
        let frames_in_flight = surface.frames_in_flight();
        match outcome {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => {
                debug!("Swapchain suboptimal on present, scheduling rebuild");
                self.rebuild_requested = true;
            }
            PresentOutcome::Recreated => {
                self.current_frame_slot %= frames_in_flight;
                return Ok(false);
            }
        }

        self.current_frame_slot = (slot + 1) % frames_in_flight;
        trace!("Frame presented: slot {}, image {}", slot, image);
        Ok(true)
    }

    /// Records a new drawable size. The surface is rebuilt at the next
    /// `start_frame`; zero sizes wait for a later non-zero resize.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.reconciler.notify_resize(width, height);
    }

    /// Waits for the GPU and releases the surface. Later frame calls return
    /// false until `startup` is called again.
    pub fn shutdown(&mut self) {
        self.started = false;
        if let Some(mut surface) = self.surface.take() {
            surface.destroy();
            info!(
                "Frame controller shut down after {} recreation(s)",
                surface.recreation_count()
            );
        }
        self.state = FrameState::Idle;
        self.current_frame_slot = 0;
        self.current_image_index = 0;
        self.rebuild_requested = false;
    }

    fn create_surface(&mut self, extent: Extent2d) -> RhiResult<()> {
        let surface = PresentationSurface::create(self.device.clone(), extent, &self.config)?;
        self.surface = Some(surface);
        self.reconciler.mark_built();
        self.current_frame_slot = 0;
        self.state = FrameState::Idle;
        Ok(())
    }

    /// Logs `e`, latching it if fatal or scheduling a rebuild otherwise.
    fn handle_error(&mut self, operation: &str, e: RhiError) -> bool {
        if e.is_fatal() {
            error!("{} failed with a fatal error: {}", operation, e);
            self.fatal = Some(e);
        } else {
            warn!("{} failed: {}, scheduling surface rebuild", operation, e);
            self.rebuild_requested = true;
        }
        false
    }

    // =========================================================================
    // Recording helpers
    // =========================================================================

    /// Begins the frame's render pass, clearing to `clear_color`.
    pub fn begin_render_pass(&mut self, clear_color: [f32; 4]) {
        debug_assert_eq!(self.state, FrameState::Recording);
        let image = self.current_image_index;
        if let Some(surface) = self.surface.as_mut() {
            surface.begin_render_pass(
                image,
                ClearValues {
                    color: clear_color,
                    ..self.config.clear_values()
                },
            );
        }
    }

    pub fn end_render_pass(&mut self) {
        debug_assert_eq!(self.state, FrameState::Recording);
        let image = self.current_image_index;
        if let Some(surface) = self.surface.as_mut() {
            surface.end_render_pass(image);
        }
    }

    /// The command buffer of the frame being recorded.
    pub fn command_buffer(&self) -> Option<&CommandBuffer<D>> {
        if self.state != FrameState::Recording {
            return None;
        }
        self.surface
            .as_ref()
            .map(|surface| surface.image_slot(self.current_image_index).command_buffer())
    }

    /// The render target of the frame being recorded.
    pub fn framebuffer(&self) -> Option<&D::Framebuffer> {
        if self.state != FrameState::Recording {
            return None;
        }
        self.surface
            .as_ref()
            .map(|surface| surface.image_slot(self.current_image_index).framebuffer())
    }

    // =========================================================================
    // Observers
    // =========================================================================

    #[inline]
    pub fn current_frame_slot(&self) -> usize {
        self.current_frame_slot
    }

    #[inline]
    pub fn current_image_index(&self) -> u32 {
        self.current_image_index
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn generations(&self) -> Generations {
        self.reconciler.generations()
    }

    /// Recreations of the current surface.
    pub fn recreation_count(&self) -> u64 {
        self.surface
            .as_ref()
            .map_or(0, PresentationSurface::recreation_count)
    }

    /// The latched fatal error, if any.
    #[inline]
    pub fn fatal_error(&self) -> Option<&RhiError> {
        self.fatal.as_ref()
    }

    #[inline]
    pub fn surface(&self) -> Option<&PresentationSurface<D>> {
        self.surface.as_ref()
    }

    #[inline]
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}
