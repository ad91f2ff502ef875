//! Presentation surface: the swapchain and everything sized by it.
//!
//! A [`PresentationSurface`] owns:
//! - N presentable images, each with a view, a depth attachment, a
//!   framebuffer and its own command buffer ([`ImageSlot`])
//! - M = N - 1 frame slots of synchronization primitives ([`FrameSync`]), so
//!   at least one image is always free for the presentation engine
//! - the image ownership table, mapping each image to the frame slot whose
//!   fence signals when the image's last submitted work is done
//!
//! All of it is torn down and rebuilt together. Individual slots are never
//! destroyed on their own.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use renderer_rhi::Extent2d;
//! use renderer_rhi::headless::HeadlessDevice;
//! use renderer_renderer::FrameConfig;
//! use renderer_renderer::presentation::PresentationSurface;
//!
//! # fn main() -> Result<(), renderer_rhi::RhiError> {
//! let device = Arc::new(HeadlessDevice::default());
//! let surface = PresentationSurface::create(device, Extent2d::new(800, 600), &FrameConfig::default())?;
//!
//! assert_eq!(surface.image_count(), 3);
//! assert_eq!(surface.frames_in_flight(), 2);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, error, info};

use renderer_rhi::command::{CommandBuffer, CommandPool};
use renderer_rhi::swapchain::negotiate;
use renderer_rhi::sync::FrameSync;
use renderer_rhi::{
    AcquiredImage, ClearValues, Extent2d, FramebufferDescriptor, GpuDevice, RhiError, RhiResult,
    Submission, SwapchainDescriptor,
};

use crate::config::FrameConfig;

/// Number of frame slots for a surface with `image_count` images.
///
/// One fewer than the image count, and never less than one.
pub fn frames_in_flight_for(image_count: usize) -> usize {
    image_count.saturating_sub(1).max(1)
}

/// What happened when an image was queued for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// The swapchain was out of date and the image was not shown. The surface
    /// recreated itself unless it currently has no area.
    Recreated,
}

/// One presentable image and the resources rendered into it.
pub struct ImageSlot<D: GpuDevice> {
    device: Arc<D>,
    image: D::Image,
    view: D::ImageView,
    depth: Option<D::DepthAttachment>,
    framebuffer: D::Framebuffer,
    command_buffer: CommandBuffer<D>,
}

impl<D: GpuDevice> ImageSlot<D> {
    fn new(
        device: Arc<D>,
        pool: &CommandPool<D>,
        image: D::Image,
        desc: &SwapchainDescriptor,
    ) -> RhiResult<Self> {
        let view = device.create_image_view(image, desc.format)?;

        let depth = match device.create_depth_attachment(desc.extent) {
            Ok(depth) => depth,
            Err(e) => {
                device.destroy_image_view(view);
                return Err(e);
            }
        };

        let framebuffer = match device.create_framebuffer(&FramebufferDescriptor {
            color_image: image,
            color_view: view,
            depth: &depth,
            extent: desc.extent,
        }) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                device.destroy_depth_attachment(depth);
                device.destroy_image_view(view);
                return Err(e);
            }
        };

        let mut slot = Self {
            command_buffer: CommandBuffer::new(device.clone(), pool),
            device,
            image,
            view,
            depth: Some(depth),
            framebuffer,
        };
        slot.command_buffer.allocate()?;
        Ok(slot)
    }

    #[inline]
    pub fn image(&self) -> D::Image {
        self.image
    }

    #[inline]
    pub fn framebuffer(&self) -> &D::Framebuffer {
        &self.framebuffer
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer<D> {
        &self.command_buffer
    }
}

impl<D: GpuDevice> Drop for ImageSlot<D> {
    fn drop(&mut self) {
        self.command_buffer.free();
        self.device.destroy_framebuffer(self.framebuffer);
        if let Some(depth) = self.depth.take() {
            self.device.destroy_depth_attachment(depth);
        }
        self.device.destroy_image_view(self.view);
    }
}

/// Swapchain, image slots, frame slots and the image ownership table.
///
/// Not thread-safe; driven from the submitting thread only.
pub struct PresentationSurface<D: GpuDevice> {
    device: Arc<D>,
    config: FrameConfig,
    /// Size last asked for; self-recreation reuses it.
    requested_extent: Extent2d,
    swapchain: Option<D::Swapchain>,
    descriptor: Option<SwapchainDescriptor>,
    images: Vec<ImageSlot<D>>,
    frame_syncs: Vec<FrameSync<D>>,
    /// Frame slot whose fence covers each image's last submission.
    image_owners: Vec<Option<usize>>,
    recreating: bool,
    recreation_count: u64,
    /// Declared last so it outlives the command buffers allocated from it.
    command_pool: CommandPool<D>,
}

impl<D: GpuDevice> PresentationSurface<D> {
    /// Creates the swapchain and every per-image and per-frame resource.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidExtent`] if `extent`, or the extent the surface
    ///   dictates, has a zero dimension
    /// - Any negotiation or resource creation error from the device
    pub fn create(device: Arc<D>, extent: Extent2d, config: &FrameConfig) -> RhiResult<Self> {
        if extent.is_empty() {
            return Err(RhiError::InvalidExtent(extent));
        }

        let support = device.surface_support()?;
        let desc = negotiate(&support, &config.swapchain_request(extent))?;
        if desc.extent.is_empty() {
            return Err(RhiError::InvalidExtent(desc.extent));
        }

        let command_pool = CommandPool::new(device.clone())?;
        let mut surface = Self {
            device,
            config: config.clone(),
            requested_extent: extent,
            swapchain: None,
            descriptor: None,
            images: Vec::new(),
            frame_syncs: Vec::new(),
            image_owners: Vec::new(),
            recreating: false,
            recreation_count: 0,
            command_pool,
        };
        surface.build(&desc, None)?;

        info!(
            "Presentation surface created on {}: {} image(s), {} frame(s) in flight",
            surface.device.name(),
            surface.image_count(),
            surface.frames_in_flight()
        );
        Ok(surface)
    }

    /// Builds everything sized by the swapchain. `old` is passed to the
    /// device as a reuse hint; the caller destroys it.
    fn build(&mut self, desc: &SwapchainDescriptor, old: Option<D::Swapchain>) -> RhiResult<()> {
        let swapchain = self.device.create_swapchain(desc, old)?;
        self.swapchain = Some(swapchain);
        self.descriptor = Some(*desc);

        let images = self.device.swapchain_images(swapchain)?;
        for image in images {
            let slot = ImageSlot::new(self.device.clone(), &self.command_pool, image, desc)?;
            self.images.push(slot);
        }

        self.prepare_depth_attachments()?;

        let frame_count = frames_in_flight_for(self.images.len());
        for _ in 0..frame_count {
            self.frame_syncs.push(FrameSync::new(self.device.clone())?);
        }
        self.image_owners = vec![None; self.images.len()];

        debug!(
            "Built {} image slot(s) and {} frame slot(s) at {}",
            self.images.len(),
            frame_count,
            desc.extent
        );
        Ok(())
    }

    /// Moves every new depth attachment into its attachment layout with one
    /// blocking single-use submission.
    fn prepare_depth_attachments(&self) -> RhiResult<()> {
        let mut cmd = CommandBuffer::single_use_allocate_begin(self.device.clone(), &self.command_pool)?;
        for depth in self.images.iter().filter_map(|slot| slot.depth.as_ref()) {
            cmd.prepare_depth_attachment(depth);
        }
        cmd.single_use_end_submit()
    }

    /// Drops image slots, frame slots and ownership. The swapchain stays.
    fn release_slots(&mut self) {
        self.images.clear();
        self.frame_syncs.clear();
        self.image_owners.clear();
    }

    // =========================================================================
    // Acquire / Present
    // =========================================================================

    /// Acquires the next presentable image, signaling `frame_slot`'s
    /// acquire-complete semaphore.
    ///
    /// Returns `Ok(None)` if the swapchain was out of date; the surface has
    /// then recreated itself at its current size, unless the surface has no
    /// area, and the frame should be skipped.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] if no image became available in time, or any
    /// fatal device error.
    pub fn acquire_next_image(
        &mut self,
        frame_slot: usize,
        timeout_ns: u64,
    ) -> RhiResult<Option<AcquiredImage>> {
        debug_assert!(
            frame_slot < self.frame_syncs.len(),
            "frame slot {} out of range",
            frame_slot
        );
        let swapchain = self.current_swapchain()?;
        let signal = self.frame_syncs[frame_slot].acquire_complete().raw();

        match self.device.acquire_next_image(swapchain, timeout_ns, signal) {
            Ok(acquired) => {
                debug_assert!(
                    (acquired.index as usize) < self.images.len(),
                    "acquired image {} out of range",
                    acquired.index
                );
                Ok(Some(acquired))
            }
            Err(RhiError::OutOfDate) => {
                debug!("Swapchain out of date on acquire");
                self.recreate_in_place()?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Queues `image_index` for display once `frame_slot`'s render-complete
    /// semaphore is signaled.
    ///
    /// # Errors
    ///
    /// Any fatal device error. An out-of-date swapchain is not an error: the
    /// surface recreates itself and reports [`PresentOutcome::Recreated`].
    pub fn present(&mut self, image_index: u32, frame_slot: usize) -> RhiResult<PresentOutcome> {
        debug_assert!(frame_slot < self.frame_syncs.len());
        let swapchain = self.current_swapchain()?;
        let wait = self.frame_syncs[frame_slot].render_complete().raw();

        match self.device.present(swapchain, image_index, wait) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(RhiError::OutOfDate) => {
                debug!("Swapchain out of date on present");
                self.recreate_in_place()?;
                Ok(PresentOutcome::Recreated)
            }
            Err(e) => Err(e),
        }
    }

    /// Submits `image_index`'s recorded command buffer for `frame_slot`:
    /// waits on acquire-complete, signals render-complete and the slot's fence.
    ///
    /// The fence must have been reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue submission fails.
    pub fn submit(&mut self, frame_slot: usize, image_index: u32) -> RhiResult<()> {
        let sync = &self.frame_syncs[frame_slot];
        let slot = &mut self.images[image_index as usize];
        let Some(raw) = slot.command_buffer.raw() else {
            return Err(RhiError::SwapchainError(format!(
                "image slot {} has no command buffer",
                image_index
            )));
        };

        self.device.submit(&Submission {
            command_buffers: &[raw],
            wait_semaphores: &[sync.acquire_complete().raw()],
            signal_semaphores: &[sync.render_complete().raw()],
            fence: Some(sync.in_flight_fence().raw()),
        })?;
        slot.command_buffer.mark_submitted();
        Ok(())
    }

    fn current_swapchain(&self) -> RhiResult<D::Swapchain> {
        self.swapchain
            .ok_or_else(|| RhiError::SwapchainError("surface has no swapchain".to_string()))
    }

    // =========================================================================
    // Recreation
    // =========================================================================

    /// Rebuilds the swapchain and every slot at `width` x `height`.
    ///
    /// Waits for the device to go idle first, so no in-flight work references
    /// what is torn down. The old swapchain is handed to the device as a
    /// reuse hint and destroyed afterwards.
    ///
    /// Returns `Ok(false)` without doing anything if a recreation is already
    /// running, or if either dimension, or the extent the surface dictates,
    /// is zero (e.g. a minimized window). The current swapchain and slots are
    /// kept in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if the idle wait or any resource creation fails. The
    /// surface is then left without slots until the next successful call.
    pub fn recreate(&mut self, width: u32, height: u32) -> RhiResult<bool> {
        if self.recreating {
            debug!("Recreation already in progress, ignoring request");
            return Ok(false);
        }

        let extent = Extent2d::new(width, height);
        if extent.is_empty() {
            debug!("Not recreating at zero size {}", extent);
            return Ok(false);
        }

        self.recreating = true;
        let result = self.rebuild(extent);
        self.recreating = false;
        result
    }

    fn recreate_in_place(&mut self) -> RhiResult<bool> {
        let extent = self.requested_extent;
        self.recreate(extent.width, extent.height)
    }

    fn rebuild(&mut self, extent: Extent2d) -> RhiResult<bool> {
        let support = self.device.surface_support()?;
        let desc = negotiate(&support, &self.config.swapchain_request(extent))?;
        if desc.extent.is_empty() {
            debug!("Surface reports {}, keeping the current swapchain", desc.extent);
            return Ok(false);
        }

        self.device.wait_idle()?;
        self.release_slots();

        let old = self.swapchain.take();
        self.requested_extent = extent;
        let result = self.build(&desc, old);
        if let Some(old) = old {
            self.device.destroy_swapchain(old);
        }
        result?;

        self.recreation_count += 1;
        info!(
            "Presentation surface recreated at {} ({} image(s), recreation #{})",
            self.extent(),
            self.image_count(),
            self.recreation_count
        );
        Ok(true)
    }

    /// Waits for the device to go idle and releases everything. Safe to call
    /// more than once; also run on drop.
    pub fn destroy(&mut self) {
        if self.swapchain.is_none() && self.images.is_empty() && self.frame_syncs.is_empty() {
            return;
        }

        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle before surface teardown: {}", e);
        }

        self.release_slots();
        if let Some(swapchain) = self.swapchain.take() {
            self.device.destroy_swapchain(swapchain);
        }
        self.descriptor = None;
        info!("Presentation surface destroyed");
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Begins the render pass of `image_index` with `clear`.
    pub fn begin_render_pass(&mut self, image_index: u32, clear: ClearValues) {
        let slot = &mut self.images[image_index as usize];
        slot.command_buffer.begin_render_pass(&slot.framebuffer, clear);
    }

    pub fn end_render_pass(&mut self, image_index: u32) {
        let slot = &mut self.images[image_index as usize];
        slot.command_buffer.end_render_pass(&slot.framebuffer);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// N, the number of presentable images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// M, the number of frame slots.
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frame_syncs.len()
    }

    #[inline]
    pub fn frame_sync(&self, frame_slot: usize) -> &FrameSync<D> {
        &self.frame_syncs[frame_slot]
    }

    #[inline]
    pub fn image_slot(&self, image_index: u32) -> &ImageSlot<D> {
        &self.images[image_index as usize]
    }

    #[inline]
    pub fn command_buffer_mut(&mut self, image_index: u32) -> &mut CommandBuffer<D> {
        &mut self.images[image_index as usize].command_buffer
    }

    /// Frame slot that last submitted work for `image_index`, if any.
    #[inline]
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.image_owners[image_index as usize]
    }

    /// Records `frame_slot` as the owner of `image_index`. The previous
    /// owner's fence must already have been observed signaled.
    pub fn set_image_owner(&mut self, image_index: u32, frame_slot: usize) {
        debug_assert!(frame_slot < self.frame_syncs.len());
        self.image_owners[image_index as usize] = Some(frame_slot);
    }

    #[inline]
    pub fn image_owners(&self) -> &[Option<usize>] {
        &self.image_owners
    }

    #[inline]
    pub fn swapchain(&self) -> Option<D::Swapchain> {
        self.swapchain
    }

    /// Negotiated parameters of the current swapchain.
    #[inline]
    pub fn descriptor(&self) -> Option<&SwapchainDescriptor> {
        self.descriptor.as_ref()
    }

    /// Extent of the current swapchain, or the requested size if none exists.
    pub fn extent(&self) -> Extent2d {
        self.descriptor
            .map_or(self.requested_extent, |desc| desc.extent)
    }

    /// Completed recreations of this surface instance.
    #[inline]
    pub fn recreation_count(&self) -> u64 {
        self.recreation_count
    }
}

impl<D: GpuDevice> Drop for PresentationSurface<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer_rhi::command::CommandBufferState;
    use renderer_rhi::headless::{HeadlessConfig, HeadlessDevice};
    use renderer_rhi::{PresentMode, SurfaceFormat};

    fn device(min_image_count: u32) -> Arc<HeadlessDevice> {
        Arc::new(HeadlessDevice::new(HeadlessConfig {
            min_image_count,
            ..HeadlessConfig::default()
        }))
    }

    fn surface(device: &Arc<HeadlessDevice>) -> PresentationSurface<HeadlessDevice> {
        PresentationSurface::create(device.clone(), Extent2d::new(800, 600), &FrameConfig::default())
            .unwrap()
    }

    #[test]
    fn test_frames_in_flight_is_one_less_than_images() {
        for n in 2..=8 {
            assert_eq!(frames_in_flight_for(n), n - 1);
        }
        assert_eq!(frames_in_flight_for(1), 1);
        assert_eq!(frames_in_flight_for(0), 1);
    }

    #[test]
    fn test_create_negotiates_counts() {
        let device = device(4);
        let surface = surface(&device);

        assert_eq!(surface.image_count(), 4);
        assert_eq!(surface.frames_in_flight(), 3);
        assert!(surface.image_owners().iter().all(Option::is_none));

        let desc = surface.descriptor().unwrap();
        assert_eq!(desc.present_mode, PresentMode::Mailbox);
        assert_eq!(desc.format, SurfaceFormat::Bgra8Srgb);
        assert_eq!(desc.extent, Extent2d::new(800, 600));
    }

    #[test]
    fn test_create_prepares_depth_with_one_blocking_submit() {
        let device = device(2);
        let surface = surface(&device);

        let stats = device.stats();
        assert_eq!(stats.submissions, 1);
        assert_eq!(stats.queue_idle_waits, 1);
        assert_eq!(device.pending_submissions(), 0);

        let live = device.live_objects();
        assert_eq!(live.depth_attachments, surface.image_count());
        assert_eq!(live.command_buffers, surface.image_count());
        assert_eq!(live.fences, surface.frames_in_flight());
        assert_eq!(live.semaphores, 2 * surface.frames_in_flight());
    }

    #[test]
    fn test_frame_fences_start_signaled() {
        let device = device(3);
        let surface = surface(&device);

        for slot in 0..surface.frames_in_flight() {
            let fence = surface.frame_sync(slot).in_flight_fence();
            assert!(fence.is_signaled());
            fence.wait(0).unwrap();
        }
        assert_eq!(device.stats().fence_waits, 0);
    }

    #[test]
    fn test_zero_extent_is_rejected() {
        let device = device(2);
        let result = PresentationSurface::create(device, Extent2d::new(0, 600), &FrameConfig::default());
        assert!(matches!(result, Err(RhiError::InvalidExtent(_))));
    }

    #[test]
    fn test_recreate_rebuilds_everything() {
        let device = device(3);
        let mut surface = surface(&device);
        let old = surface.swapchain();

        assert!(surface.recreate(1024, 768).unwrap());
        assert_ne!(surface.swapchain(), old);
        assert_eq!(surface.extent(), Extent2d::new(1024, 768));
        assert_eq!(surface.recreation_count(), 1);
        assert_eq!(device.stats().device_idle_waits, 1);

        // Only the new set is alive
        let live = device.live_objects();
        assert_eq!(live.swapchains, 1);
        assert_eq!(live.framebuffers, surface.image_count());
    }

    #[test]
    fn test_recreate_ignores_zero_size() {
        let device = device(3);
        let mut surface = surface(&device);

        assert!(!surface.recreate(0, 768).unwrap());
        assert!(!surface.recreate(1024, 0).unwrap());
        assert_eq!(surface.recreation_count(), 0);
        assert_eq!(device.stats().swapchains_created, 1);
    }

    #[test]
    fn test_acquire_out_of_date_recreates_at_current_size() {
        let device = device(3);
        let mut surface = surface(&device);
        device.invalidate_swapchain(surface.swapchain().unwrap());

        assert_eq!(surface.acquire_next_image(0, u64::MAX).unwrap(), None);
        assert_eq!(surface.recreation_count(), 1);
        assert_eq!(surface.extent(), Extent2d::new(800, 600));

        let acquired = surface.acquire_next_image(0, u64::MAX).unwrap().unwrap();
        assert!((acquired.index as usize) < surface.image_count());
    }

    #[test]
    fn test_minimized_surface_keeps_current_swapchain() {
        let device = device(3);
        let mut surface = surface(&device);
        let swapchain = surface.swapchain();

        device.set_current_extent(Some(Extent2d::new(0, 0)));
        device.invalidate_swapchain(swapchain.unwrap());

        for _ in 0..3 {
            assert_eq!(surface.acquire_next_image(0, u64::MAX).unwrap(), None);
        }
        assert!(!surface.recreate(1024, 768).unwrap());

        assert_eq!(device.stats().swapchains_created, 1);
        assert_eq!(device.stats().device_idle_waits, 0);
        assert_eq!(surface.swapchain(), swapchain);
        assert_eq!(surface.image_count(), 3);
        assert_eq!(surface.frames_in_flight(), 2);
        assert_eq!(surface.recreation_count(), 0);

        // Restored: the next out-of-date acquire rebuilds at the requested size
        device.set_current_extent(None);
        assert_eq!(surface.acquire_next_image(0, u64::MAX).unwrap(), None);
        assert_eq!(surface.recreation_count(), 1);
        assert_eq!(surface.extent(), Extent2d::new(800, 600));
        assert!(surface.acquire_next_image(0, u64::MAX).unwrap().is_some());
    }

    #[test]
    fn test_create_rejects_zero_dictated_extent() {
        let device = device(2);
        device.set_current_extent(Some(Extent2d::new(0, 0)));

        let result =
            PresentationSurface::create(device.clone(), Extent2d::new(800, 600), &FrameConfig::default());
        assert!(matches!(result, Err(RhiError::InvalidExtent(_))));
        assert_eq!(device.stats().swapchains_created, 0);
        assert!(device.live_objects().is_empty());
    }

    #[test]
    fn test_submit_marks_command_buffer() {
        let device = device(3);
        let mut surface = surface(&device);

        let image = surface.acquire_next_image(0, u64::MAX).unwrap().unwrap().index;
        let cmd = surface.command_buffer_mut(image);
        cmd.begin(Default::default()).unwrap();
        cmd.end().unwrap();

        surface.frame_sync(0).in_flight_fence().reset().unwrap();
        surface.submit(0, image).unwrap();
        assert_eq!(
            surface.image_slot(image).command_buffer().state(),
            CommandBufferState::Submitted
        );
        assert_eq!(surface.present(image, 0).unwrap(), PresentOutcome::Presented);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let device = device(4);
        let mut surface = surface(&device);
        surface.destroy();
        surface.destroy();

        let live = device.live_objects();
        assert_eq!(live.swapchains, 0);
        assert_eq!(live.image_views, 0);
        assert_eq!(live.fences, 0);

        drop(surface);
        assert!(device.live_objects().is_empty());
    }
}
