//! In-process device with no GPU behind it.
//!
//! [`HeadlessDevice`] implements [`GpuDevice`] by simulating a single in-order
//! graphics queue and a presentation engine:
//!
//! - Submissions stay pending until the host waits for them. Waiting on a
//!   fence completes every pending submission up to and including the one
//!   that signals it, the way an in-order queue retires work.
//! - Waiting on an unsignaled fence that no pending submission will signal
//!   reports [`RhiError::Timeout`] immediately instead of hanging.
//! - Images are acquired round-robin, skipping images that are still held
//!   by the application. [`HeadlessDevice::set_acquire_order`] scripts a
//!   different order.
//! - Semaphore use is validated with debug assertions: a semaphore must be
//!   signaled exactly once before each wait.
//!
//! Faults can be injected to exercise recovery paths: stale and suboptimal
//! swapchains, device loss, and a stalled queue whose fences never signal.
//! Counters and live-object tallies let tests check what the pipeline did.
//!
//! # Example
//!
//! ```
//! use renderer_rhi::headless::{HeadlessConfig, HeadlessDevice};
//! use renderer_rhi::GpuDevice;
//!
//! let device = HeadlessDevice::new(HeadlessConfig {
//!     min_image_count: 4,
//!     ..HeadlessConfig::default()
//! });
//! let support = device.surface_support().unwrap();
//! assert_eq!(support.min_image_count, 4);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::backend::{
    AcquiredImage, BeginFlags, ClearValues, Extent2d, FramebufferDescriptor, GpuDevice,
    PresentMode, Submission, SurfaceFormat, SurfaceSupport, SwapchainDescriptor,
};
use crate::error::{RhiError, RhiResult};

macro_rules! headless_handle {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name(u64);

            impl $name {
                #[inline]
                pub fn id(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

headless_handle!(
    HeadlessFence,
    HeadlessSemaphore,
    HeadlessCommandPool,
    HeadlessCommandBuffer,
    HeadlessSwapchain,
    HeadlessImage,
    HeadlessImageView,
);

/// Simulated depth attachment.
#[derive(Debug)]
pub struct HeadlessDepthAttachment {
    id: u64,
    extent: Extent2d,
}

impl HeadlessDepthAttachment {
    #[inline]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }
}

/// Simulated render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadlessFramebuffer {
    id: u64,
    pub color_image: HeadlessImage,
    pub color_view: HeadlessImageView,
    pub extent: Extent2d,
}

impl HeadlessFramebuffer {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A command as recorded into a simulated command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    Begin(BeginFlags),
    PrepareDepthAttachment,
    BeginRenderPass { framebuffer: u64, clear_color: [f32; 4] },
    EndRenderPass { framebuffer: u64 },
    End,
}

/// Surface capabilities reported by a [`HeadlessDevice`].
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub min_image_count: u32,
    /// Zero means no upper bound.
    pub max_image_count: u32,
    /// Extent the platform dictates, if any.
    pub current_extent: Option<Extent2d>,
    pub min_extent: Extent2d,
    pub max_extent: Extent2d,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: None,
            min_extent: Extent2d::new(1, 1),
            max_extent: Extent2d::new(16384, 16384),
            formats: vec![SurfaceFormat::Bgra8Srgb, SurfaceFormat::Bgra8Unorm],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
        }
    }
}

/// Operation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Fence waits that reached the device (cached waits are not counted).
    pub fence_waits: u64,
    pub submissions: u64,
    pub queue_idle_waits: u64,
    pub device_idle_waits: u64,
    pub swapchains_created: u64,
    pub acquires: u64,
    pub presents: u64,
}

/// Number of objects currently alive on the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub fences: usize,
    pub semaphores: usize,
    pub command_pools: usize,
    pub command_buffers: usize,
    pub swapchains: usize,
    pub image_views: usize,
    pub depth_attachments: usize,
    pub framebuffers: usize,
}

impl LiveObjects {
    /// Returns true once everything has been destroyed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

struct CommandBufferRecord {
    pool: u64,
    commands: Vec<RecordedCommand>,
    recording: bool,
}

struct SwapchainRecord {
    images: Vec<u64>,
    /// Images handed to the application and not yet presented.
    acquired: Vec<bool>,
    acquire_count: usize,
    out_of_date: bool,
    suboptimal: bool,
    retired: bool,
}

struct PendingSubmission {
    fence: Option<u64>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    pools: HashSet<u64>,
    command_buffers: HashMap<u64, CommandBufferRecord>,
    swapchains: HashMap<u64, SwapchainRecord>,
    image_views: HashSet<u64>,
    depth_attachments: HashSet<u64>,
    framebuffers: HashSet<u64>,
    pending: VecDeque<PendingSubmission>,
    acquire_order: Vec<u32>,
    device_lost: bool,
    stalled: bool,
    stats: HeadlessStats,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_device(&self) -> RhiResult<()> {
        if self.device_lost {
            Err(RhiError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Retires the first `count` pending submissions.
    fn complete(&mut self, count: usize) {
        for submission in self.pending.drain(..count) {
            if let Some(fence) = submission.fence
                && let Some(signaled) = self.fences.get_mut(&fence)
            {
                *signaled = true;
            }
        }
    }

    fn drain_queue(&mut self) {
        let count = self.pending.len();
        self.complete(count);
    }

    fn record(&mut self, buffer: HeadlessCommandBuffer, command: RecordedCommand) {
        match self.command_buffers.get_mut(&buffer.0) {
            Some(record) => {
                debug_assert!(record.recording, "command recorded outside begin/end");
                record.commands.push(command);
            }
            None => debug_assert!(false, "unknown command buffer {:?}", buffer),
        }
    }
}

/// Deterministic in-process [`GpuDevice`].
#[derive(Default)]
pub struct HeadlessDevice {
    config: Mutex<HeadlessConfig>,
    state: Mutex<State>,
}

impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        debug!(
            "Created headless device ({}..{} images)",
            config.min_image_count, config.max_image_count
        );
        Self {
            config: Mutex::new(config),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Makes `swapchain` report out-of-date on every acquire and present.
    pub fn invalidate_swapchain(&self, swapchain: HeadlessSwapchain) {
        if let Some(record) = self.state().swapchains.get_mut(&swapchain.0) {
            record.out_of_date = true;
        }
    }

    /// Makes `swapchain` report suboptimal on every acquire and present.
    pub fn mark_suboptimal(&self, swapchain: HeadlessSwapchain) {
        if let Some(record) = self.state().swapchains.get_mut(&swapchain.0) {
            record.suboptimal = true;
        }
    }

    /// Scripts the order in which image indices are handed out, cycling
    /// through `order`. Indices still held by the application are skipped.
    pub fn set_acquire_order(&self, order: Vec<u32>) {
        self.state().acquire_order = order;
    }

    /// Simulates device loss. Every later wait, submit, acquire and present
    /// fails. Pending work is discarded, so objects can still be destroyed.
    pub fn lose_device(&self) {
        warn!("Headless device lost (injected)");
        let mut state = self.state();
        state.device_lost = true;
        state.pending.clear();
    }

    /// While stalled, fence waits time out instead of retiring work.
    /// Idle waits still drain the queue.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Changes the extent the surface dictates, as a window resize would.
    pub fn set_current_extent(&self, extent: Option<Extent2d>) {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_extent = extent;
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn stats(&self) -> HeadlessStats {
        self.state().stats
    }

    pub fn live_objects(&self) -> LiveObjects {
        let state = self.state();
        LiveObjects {
            fences: state.fences.len(),
            semaphores: state.semaphores.len(),
            command_pools: state.pools.len(),
            command_buffers: state.command_buffers.len(),
            swapchains: state.swapchains.len(),
            image_views: state.image_views.len(),
            depth_attachments: state.depth_attachments.len(),
            framebuffers: state.framebuffers.len(),
        }
    }

    /// Submissions not yet retired.
    pub fn pending_submissions(&self) -> usize {
        self.state().pending.len()
    }

    /// Device-side signaled state of `fence`.
    pub fn is_fence_signaled(&self, fence: HeadlessFence) -> bool {
        self.state().fences.get(&fence.0).copied().unwrap_or(false)
    }

    /// Commands recorded into `buffer` since its last begin or reset.
    pub fn recorded_commands(&self, buffer: HeadlessCommandBuffer) -> Vec<RecordedCommand> {
        self.state()
            .command_buffers
            .get(&buffer.0)
            .map(|record| record.commands.clone())
            .unwrap_or_default()
    }
}

impl GpuDevice for HeadlessDevice {
    type Fence = HeadlessFence;
    type Semaphore = HeadlessSemaphore;
    type CommandPool = HeadlessCommandPool;
    type CommandBuffer = HeadlessCommandBuffer;
    type Swapchain = HeadlessSwapchain;
    type Image = HeadlessImage;
    type ImageView = HeadlessImageView;
    type DepthAttachment = HeadlessDepthAttachment;
    type Framebuffer = HeadlessFramebuffer;

    fn name(&self) -> &str {
        "headless"
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<HeadlessFence> {
        let mut state = self.state();
        let id = state.next_id();
        state.fences.insert(id, signaled);
        Ok(HeadlessFence(id))
    }

    fn destroy_fence(&self, fence: HeadlessFence) {
        let mut state = self.state();
        debug_assert!(
            !state.pending.iter().any(|s| s.fence == Some(fence.0)),
            "fence destroyed while pending"
        );
        state.fences.remove(&fence.0);
    }

    fn wait_fence(&self, fence: HeadlessFence, _timeout_ns: u64) -> RhiResult<()> {
        let mut state = self.state();
        state.stats.fence_waits += 1;
        state.check_device()?;

        if state.fences.get(&fence.0).copied().unwrap_or(false) {
            return Ok(());
        }

        let position = state
            .pending
            .iter()
            .position(|s| s.fence == Some(fence.0));

        match position {
            Some(position) if !state.stalled => {
                state.complete(position + 1);
                trace!("Fence {} signaled after retiring {} submission(s)", fence.0, position + 1);
                Ok(())
            }
            _ => Err(RhiError::Timeout),
        }
    }

    fn reset_fence(&self, fence: HeadlessFence) -> RhiResult<()> {
        let mut state = self.state();
        debug_assert!(
            !state.pending.iter().any(|s| s.fence == Some(fence.0)),
            "fence reset while referenced by a pending submission"
        );
        if let Some(signaled) = state.fences.get_mut(&fence.0) {
            *signaled = false;
        }
        Ok(())
    }

    fn create_semaphore(&self) -> RhiResult<HeadlessSemaphore> {
        let mut state = self.state();
        let id = state.next_id();
        state.semaphores.insert(id, false);
        Ok(HeadlessSemaphore(id))
    }

    fn destroy_semaphore(&self, semaphore: HeadlessSemaphore) {
        self.state().semaphores.remove(&semaphore.0);
    }

    // =========================================================================
    // Command Recording
    // =========================================================================

    fn create_command_pool(&self) -> RhiResult<HeadlessCommandPool> {
        let mut state = self.state();
        let id = state.next_id();
        state.pools.insert(id);
        Ok(HeadlessCommandPool(id))
    }

    fn destroy_command_pool(&self, pool: HeadlessCommandPool) {
        let mut state = self.state();
        debug_assert!(
            !state.command_buffers.values().any(|cb| cb.pool == pool.0),
            "command pool destroyed with live command buffers"
        );
        state.pools.remove(&pool.0);
    }

    fn allocate_command_buffer(&self, pool: HeadlessCommandPool) -> RhiResult<HeadlessCommandBuffer> {
        let mut state = self.state();
        debug_assert!(state.pools.contains(&pool.0), "unknown command pool");
        let id = state.next_id();
        state.command_buffers.insert(
            id,
            CommandBufferRecord {
                pool: pool.0,
                commands: Vec::new(),
                recording: false,
            },
        );
        Ok(HeadlessCommandBuffer(id))
    }

    fn free_command_buffer(&self, _pool: HeadlessCommandPool, buffer: HeadlessCommandBuffer) {
        self.state().command_buffers.remove(&buffer.0);
    }

    fn begin_command_buffer(&self, buffer: HeadlessCommandBuffer, flags: BeginFlags) -> RhiResult<()> {
        let mut state = self.state();
        if let Some(record) = state.command_buffers.get_mut(&buffer.0) {
            record.commands.clear();
            record.commands.push(RecordedCommand::Begin(flags));
            record.recording = true;
        }
        Ok(())
    }

    fn end_command_buffer(&self, buffer: HeadlessCommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        state.record(buffer, RecordedCommand::End);
        if let Some(record) = state.command_buffers.get_mut(&buffer.0) {
            record.recording = false;
        }
        Ok(())
    }

    fn reset_command_buffer(&self, buffer: HeadlessCommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        if let Some(record) = state.command_buffers.get_mut(&buffer.0) {
            record.commands.clear();
            record.recording = false;
        }
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        buffer: HeadlessCommandBuffer,
        framebuffer: &HeadlessFramebuffer,
        clear: ClearValues,
    ) {
        self.state().record(
            buffer,
            RecordedCommand::BeginRenderPass {
                framebuffer: framebuffer.id,
                clear_color: clear.color,
            },
        );
    }

    fn cmd_end_render_pass(&self, buffer: HeadlessCommandBuffer, framebuffer: &HeadlessFramebuffer) {
        self.state().record(
            buffer,
            RecordedCommand::EndRenderPass {
                framebuffer: framebuffer.id,
            },
        );
    }

    fn cmd_prepare_depth_attachment(
        &self,
        buffer: HeadlessCommandBuffer,
        _depth: &HeadlessDepthAttachment,
    ) {
        self.state()
            .record(buffer, RecordedCommand::PrepareDepthAttachment);
    }

    // =========================================================================
    // Queue
    // =========================================================================

    fn submit(&self, submission: &Submission<'_, Self>) -> RhiResult<()> {
        let mut state = self.state();
        state.check_device()?;

        for buffer in submission.command_buffers {
            debug_assert!(
                state
                    .command_buffers
                    .get(&buffer.0)
                    .is_some_and(|record| !record.recording),
                "submitted command buffer {:?} is not fully recorded",
                buffer
            );
        }

        if let Some(fence) = submission.fence {
            debug_assert!(
                !state.fences.get(&fence.0).copied().unwrap_or(false),
                "submitted with a signaled fence"
            );
            debug_assert!(
                !state.pending.iter().any(|s| s.fence == Some(fence.0)),
                "fence already referenced by a pending submission"
            );
        }

        for semaphore in submission.wait_semaphores {
            if let Some(signaled) = state.semaphores.get_mut(&semaphore.0) {
                debug_assert!(*signaled, "submission waits on an unsignaled semaphore");
                *signaled = false;
            }
        }
        for semaphore in submission.signal_semaphores {
            if let Some(signaled) = state.semaphores.get_mut(&semaphore.0) {
                debug_assert!(!*signaled, "semaphore signaled twice without a wait");
                *signaled = true;
            }
        }

        state.pending.push_back(PendingSubmission {
            fence: submission.fence.map(|f| f.0),
        });
        state.stats.submissions += 1;
        trace!("Submitted batch ({} pending)", state.pending.len());
        Ok(())
    }

    fn queue_wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state();
        state.check_device()?;
        state.stats.queue_idle_waits += 1;
        state.drain_queue();
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state();
        state.check_device()?;
        state.stats.device_idle_waits += 1;
        state.drain_queue();
        Ok(())
    }

    // =========================================================================
    // Presentation
    // =========================================================================

    fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        let config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(SurfaceSupport {
            min_image_count: config.min_image_count,
            max_image_count: config.max_image_count,
            current_extent: config.current_extent,
            min_extent: config.min_extent,
            max_extent: config.max_extent,
            formats: config.formats.clone(),
            present_modes: config.present_modes.clone(),
        })
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDescriptor,
        old: Option<HeadlessSwapchain>,
    ) -> RhiResult<HeadlessSwapchain> {
        let mut state = self.state();
        state.check_device()?;

        if let Some(old) = old {
            match state.swapchains.get_mut(&old.0) {
                Some(record) => record.retired = true,
                None => debug_assert!(false, "unknown old swapchain {:?}", old),
            }
        }

        let id = state.next_id();
        let images = (0..desc.image_count).map(|_| state.next_id()).collect();
        state.swapchains.insert(
            id,
            SwapchainRecord {
                images,
                acquired: vec![false; desc.image_count as usize],
                acquire_count: 0,
                out_of_date: false,
                suboptimal: false,
                retired: false,
            },
        );
        state.stats.swapchains_created += 1;

        debug!(
            "Headless swapchain {} created: {}, {} images",
            id, desc.extent, desc.image_count
        );
        Ok(HeadlessSwapchain(id))
    }

    fn destroy_swapchain(&self, swapchain: HeadlessSwapchain) {
        self.state().swapchains.remove(&swapchain.0);
    }

    fn swapchain_images(&self, swapchain: HeadlessSwapchain) -> RhiResult<Vec<HeadlessImage>> {
        let state = self.state();
        let record = state
            .swapchains
            .get(&swapchain.0)
            .ok_or_else(|| RhiError::SwapchainError(format!("unknown swapchain {}", swapchain.0)))?;
        Ok(record.images.iter().map(|&id| HeadlessImage(id)).collect())
    }

    fn acquire_next_image(
        &self,
        swapchain: HeadlessSwapchain,
        _timeout_ns: u64,
        signal: HeadlessSemaphore,
    ) -> RhiResult<AcquiredImage> {
        let mut state = self.state();
        state.check_device()?;
        let order = state.acquire_order.clone();

        let record = state
            .swapchains
            .get_mut(&swapchain.0)
            .ok_or_else(|| RhiError::SwapchainError(format!("unknown swapchain {}", swapchain.0)))?;
        if record.out_of_date || record.retired {
            return Err(RhiError::OutOfDate);
        }

        let count = record.images.len();
        let start = if order.is_empty() {
            record.acquire_count % count
        } else {
            order[record.acquire_count % order.len()] as usize % count
        };
        let index = (0..count)
            .map(|offset| (start + offset) % count)
            .find(|&i| !record.acquired[i])
            .ok_or(RhiError::Timeout)?;

        record.acquired[index] = true;
        record.acquire_count += 1;
        let suboptimal = record.suboptimal;

        if let Some(signaled) = state.semaphores.get_mut(&signal.0) {
            debug_assert!(!*signaled, "acquire signals a semaphore that was never waited on");
            *signaled = true;
        }
        state.stats.acquires += 1;

        Ok(AcquiredImage {
            index: index as u32,
            suboptimal,
        })
    }

    fn present(
        &self,
        swapchain: HeadlessSwapchain,
        image_index: u32,
        wait: HeadlessSemaphore,
    ) -> RhiResult<bool> {
        let mut state = self.state();
        state.check_device()?;

        if let Some(signaled) = state.semaphores.get_mut(&wait.0) {
            debug_assert!(*signaled, "present waits on an unsignaled semaphore");
            *signaled = false;
        }

        let record = state
            .swapchains
            .get_mut(&swapchain.0)
            .ok_or_else(|| RhiError::SwapchainError(format!("unknown swapchain {}", swapchain.0)))?;

        let index = image_index as usize;
        debug_assert!(
            record.acquired.get(index).copied().unwrap_or(false),
            "presented image {} was not acquired",
            image_index
        );
        if let Some(acquired) = record.acquired.get_mut(index) {
            *acquired = false;
        }

        if record.out_of_date || record.retired {
            return Err(RhiError::OutOfDate);
        }

        let suboptimal = record.suboptimal;
        state.stats.presents += 1;
        Ok(suboptimal)
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    fn create_image_view(
        &self,
        _image: HeadlessImage,
        _format: SurfaceFormat,
    ) -> RhiResult<HeadlessImageView> {
        let mut state = self.state();
        let id = state.next_id();
        state.image_views.insert(id);
        Ok(HeadlessImageView(id))
    }

    fn destroy_image_view(&self, view: HeadlessImageView) {
        self.state().image_views.remove(&view.0);
    }

    fn create_depth_attachment(&self, extent: Extent2d) -> RhiResult<HeadlessDepthAttachment> {
        if extent.is_empty() {
            return Err(RhiError::InvalidExtent(extent));
        }
        let mut state = self.state();
        let id = state.next_id();
        state.depth_attachments.insert(id);
        Ok(HeadlessDepthAttachment { id, extent })
    }

    fn destroy_depth_attachment(&self, depth: HeadlessDepthAttachment) {
        self.state().depth_attachments.remove(&depth.id);
    }

    fn create_framebuffer(
        &self,
        desc: &FramebufferDescriptor<'_, Self>,
    ) -> RhiResult<HeadlessFramebuffer> {
        debug_assert_eq!(desc.depth.extent, desc.extent, "depth extent mismatch");
        let mut state = self.state();
        let id = state.next_id();
        state.framebuffers.insert(id);
        Ok(HeadlessFramebuffer {
            id,
            color_image: desc.color_image,
            color_view: desc.color_view,
            extent: desc.extent,
        })
    }

    fn destroy_framebuffer(&self, framebuffer: HeadlessFramebuffer) {
        self.state().framebuffers.remove(&framebuffer.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swapchain(device: &HeadlessDevice, image_count: u32) -> HeadlessSwapchain {
        device
            .create_swapchain(
                &SwapchainDescriptor {
                    image_count,
                    format: SurfaceFormat::Bgra8Srgb,
                    present_mode: PresentMode::Fifo,
                    extent: Extent2d::new(640, 480),
                },
                None,
            )
            .unwrap()
    }

    fn submit_with_fence(device: &HeadlessDevice, fence: HeadlessFence) {
        device
            .submit(&Submission {
                command_buffers: &[],
                wait_semaphores: &[],
                signal_semaphores: &[],
                fence: Some(fence),
            })
            .unwrap();
    }

    #[test]
    fn test_fence_wait_retires_queue_in_order() {
        let device = HeadlessDevice::default();
        let first = device.create_fence(false).unwrap();
        let second = device.create_fence(false).unwrap();
        submit_with_fence(&device, first);
        submit_with_fence(&device, second);

        device.wait_fence(second, u64::MAX).unwrap();
        assert!(device.is_fence_signaled(first));
        assert!(device.is_fence_signaled(second));
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_fence_wait_leaves_later_work_pending() {
        let device = HeadlessDevice::default();
        let first = device.create_fence(false).unwrap();
        let second = device.create_fence(false).unwrap();
        submit_with_fence(&device, first);
        submit_with_fence(&device, second);

        device.wait_fence(first, u64::MAX).unwrap();
        assert!(!device.is_fence_signaled(second));
        assert_eq!(device.pending_submissions(), 1);
    }

    #[test]
    fn test_stalled_queue_times_out() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(false).unwrap();
        submit_with_fence(&device, fence);

        device.set_stalled(true);
        assert!(matches!(
            device.wait_fence(fence, 1_000),
            Err(RhiError::Timeout)
        ));

        device.set_stalled(false);
        device.wait_fence(fence, 1_000).unwrap();
    }

    #[test]
    fn test_device_loss_is_reported() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(true).unwrap();
        device.lose_device();

        assert!(matches!(
            device.wait_fence(fence, 0),
            Err(RhiError::DeviceLost)
        ));
        assert!(matches!(device.wait_idle(), Err(RhiError::DeviceLost)));
    }

    #[test]
    fn test_round_robin_acquire() {
        let device = HeadlessDevice::default();
        let swapchain = swapchain(&device, 3);
        let semaphore = device.create_semaphore().unwrap();

        let mut indices = Vec::new();
        for _ in 0..6 {
            let image = device
                .acquire_next_image(swapchain, u64::MAX, semaphore)
                .unwrap();
            indices.push(image.index);
            // Consume the acquire signal the way a submission would
            device
                .submit(&Submission {
                    command_buffers: &[],
                    wait_semaphores: &[semaphore],
                    signal_semaphores: &[semaphore],
                    fence: None,
                })
                .unwrap();
            device.present(swapchain, image.index, semaphore).unwrap();
        }
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_acquire_skips_held_images() {
        let device = HeadlessDevice::default();
        let swapchain = swapchain(&device, 2);
        let a = device.create_semaphore().unwrap();
        let b = device.create_semaphore().unwrap();
        let c = device.create_semaphore().unwrap();

        assert_eq!(device.acquire_next_image(swapchain, 0, a).unwrap().index, 0);
        assert_eq!(device.acquire_next_image(swapchain, 0, b).unwrap().index, 1);
        assert!(matches!(
            device.acquire_next_image(swapchain, 0, c),
            Err(RhiError::Timeout)
        ));
    }

    #[test]
    fn test_scripted_acquire_order() {
        let device = HeadlessDevice::default();
        let swapchain = swapchain(&device, 3);
        device.set_acquire_order(vec![2, 0, 1]);
        let semaphore = device.create_semaphore().unwrap();

        let image = device.acquire_next_image(swapchain, 0, semaphore).unwrap();
        assert_eq!(image.index, 2);
    }

    #[test]
    fn test_out_of_date_and_retired_swapchains() {
        let device = HeadlessDevice::default();
        let old = swapchain(&device, 2);
        let semaphore = device.create_semaphore().unwrap();

        device.invalidate_swapchain(old);
        assert!(matches!(
            device.acquire_next_image(old, 0, semaphore),
            Err(RhiError::OutOfDate)
        ));

        let desc = SwapchainDescriptor {
            image_count: 2,
            format: SurfaceFormat::Bgra8Srgb,
            present_mode: PresentMode::Fifo,
            extent: Extent2d::new(800, 600),
        };
        let new = device.create_swapchain(&desc, Some(old)).unwrap();
        device.destroy_swapchain(old);

        assert!(device.acquire_next_image(new, 0, semaphore).is_ok());
        assert_eq!(device.stats().swapchains_created, 2);
        assert_eq!(device.live_objects().swapchains, 1);
    }

    #[test]
    fn test_zero_sized_depth_attachment_is_rejected() {
        let device = HeadlessDevice::default();
        assert!(matches!(
            device.create_depth_attachment(Extent2d::new(0, 10)),
            Err(RhiError::InvalidExtent(_))
        ));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "fence reset while referenced by a pending submission")]
    fn test_reset_of_pending_fence_panics() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(false).unwrap();
        submit_with_fence(&device, fence);
        let _ = device.reset_fence(fence);
    }
}
