//! Command pool and command buffer management.
//!
//! [`CommandBuffer`] tracks its lifecycle explicitly:
//!
//! ```text
//!              allocate            begin              begin_render_pass
//! Unallocated ---------> Ready ------------> Recording -----------------> InRenderpass
//!      ^                   ^                  |      ^                         |
//!      |                   |                  |      +-------------------------+
//!      |                   |             end  |           end_render_pass      |
//!      |                   |                  v                                |
//!      |                   |             RecordingEnded <----------------------+
//!      |                   |                  |                       end
//!      |            reset  |  mark_submitted  v
//!      |                   +--------------- Submitted
//!      |
//!      +------------ free (from any state)
//! ```
//!
//! `reset` is valid from any allocated state. Calling an operation from the
//! wrong state is a programming error and trips a debug assertion.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use renderer_rhi::command::{CommandBuffer, CommandBufferState, CommandPool};
//! use renderer_rhi::headless::HeadlessDevice;
//! use renderer_rhi::BeginFlags;
//!
//! # fn main() -> Result<(), renderer_rhi::RhiError> {
//! let device = Arc::new(HeadlessDevice::default());
//! let pool = CommandPool::new(device.clone())?;
//!
//! let mut cmd = CommandBuffer::new(device.clone(), &pool);
//! cmd.allocate()?;
//! cmd.begin(BeginFlags::default())?;
//! // ... record commands ...
//! cmd.end()?;
//! assert_eq!(cmd.state(), CommandBufferState::RecordingEnded);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::backend::{BeginFlags, ClearValues, GpuDevice, Submission};
use crate::error::RhiResult;

/// Owning command pool wrapper.
///
/// Buffers allocated from the pool must be freed or dropped before the pool.
pub struct CommandPool<D: GpuDevice> {
    device: Arc<D>,
    raw: D::CommandPool,
}

impl<D: GpuDevice> CommandPool<D> {
    /// Creates a pool whose buffers can be reset individually.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let raw = device.create_command_pool()?;
        debug!("Created command pool");
        Ok(Self { device, raw })
    }

    /// Returns the backend handle.
    #[inline]
    pub fn raw(&self) -> D::CommandPool {
        self.raw
    }
}

impl<D: GpuDevice> Drop for CommandPool<D> {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.raw);
        debug!("Destroyed command pool");
    }
}

/// Lifecycle state of a [`CommandBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    Unallocated,
    Ready,
    Recording,
    InRenderpass,
    RecordingEnded,
    Submitted,
}

/// A command buffer with an explicitly tracked lifecycle.
pub struct CommandBuffer<D: GpuDevice> {
    device: Arc<D>,
    pool: D::CommandPool,
    raw: Option<D::CommandBuffer>,
    state: CommandBufferState,
    flags: BeginFlags,
}

impl<D: GpuDevice> CommandBuffer<D> {
    /// Creates an unallocated command buffer bound to `pool`.
    pub fn new(device: Arc<D>, pool: &CommandPool<D>) -> Self {
        Self {
            device,
            pool: pool.raw(),
            raw: None,
            state: CommandBufferState::Unallocated,
            flags: BeginFlags::default(),
        }
    }

    /// Allocates the GPU object. Unallocated -> Ready.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails; the buffer stays unallocated.
    pub fn allocate(&mut self) -> RhiResult<()> {
        debug_assert_eq!(
            self.state,
            CommandBufferState::Unallocated,
            "allocate called on an allocated command buffer"
        );

        self.raw = Some(self.device.allocate_command_buffer(self.pool)?);
        self.state = CommandBufferState::Ready;
        Ok(())
    }

    /// Starts recording with the given usage hints. Ready -> Recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to begin recording.
    pub fn begin(&mut self, flags: BeginFlags) -> RhiResult<()> {
        debug_assert_eq!(
            self.state,
            CommandBufferState::Ready,
            "begin called outside the Ready state"
        );

        if let Some(raw) = self.raw {
            self.device.begin_command_buffer(raw, flags)?;
        }
        self.flags = flags;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Begins rendering into `framebuffer`. Recording -> InRenderpass.
    pub fn begin_render_pass(&mut self, framebuffer: &D::Framebuffer, clear: ClearValues) {
        debug_assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "begin_render_pass called outside the Recording state"
        );

        if let Some(raw) = self.raw {
            self.device.cmd_begin_render_pass(raw, framebuffer, clear);
        }
        self.state = CommandBufferState::InRenderpass;
    }

    /// Ends rendering into `framebuffer`. InRenderpass -> Recording.
    pub fn end_render_pass(&mut self, framebuffer: &D::Framebuffer) {
        debug_assert_eq!(
            self.state,
            CommandBufferState::InRenderpass,
            "end_render_pass called outside a render pass"
        );

        if let Some(raw) = self.raw {
            self.device.cmd_end_render_pass(raw, framebuffer);
        }
        self.state = CommandBufferState::Recording;
    }

    /// Records the initial layout transition of a depth attachment.
    pub fn prepare_depth_attachment(&mut self, depth: &D::DepthAttachment) {
        debug_assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "prepare_depth_attachment called outside the Recording state"
        );

        if let Some(raw) = self.raw {
            self.device.cmd_prepare_depth_attachment(raw, depth);
        }
    }

    /// Finishes recording. Recording or InRenderpass -> RecordingEnded.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the recorded commands.
    pub fn end(&mut self) -> RhiResult<()> {
        debug_assert!(
            matches!(
                self.state,
                CommandBufferState::Recording | CommandBufferState::InRenderpass
            ),
            "end called while {:?}",
            self.state
        );

        if let Some(raw) = self.raw {
            self.device.end_command_buffer(raw)?;
        }
        self.state = CommandBufferState::RecordingEnded;
        Ok(())
    }

    /// Notes that the buffer was handed to the queue. RecordingEnded -> Submitted.
    pub fn mark_submitted(&mut self) {
        debug_assert_eq!(
            self.state,
            CommandBufferState::RecordingEnded,
            "mark_submitted called before recording ended"
        );
        self.state = CommandBufferState::Submitted;
    }

    /// Clears recorded content and flags, keeping the allocation.
    /// Any allocated state -> Ready.
    ///
    /// The buffer must not be pending on the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to reset the buffer.
    pub fn reset(&mut self) -> RhiResult<()> {
        debug_assert_ne!(
            self.state,
            CommandBufferState::Unallocated,
            "reset called on an unallocated command buffer"
        );

        if let Some(raw) = self.raw {
            self.device.reset_command_buffer(raw)?;
        }
        self.flags = BeginFlags::default();
        self.state = CommandBufferState::Ready;
        Ok(())
    }

    /// Returns the allocation to its pool. Any state -> Unallocated.
    pub fn free(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.device.free_command_buffer(self.pool, raw);
        }
        self.flags = BeginFlags::default();
        self.state = CommandBufferState::Unallocated;
    }

    /// Returns the current lifecycle state.
    #[inline]
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Returns the usage hints recorded by the last `begin`.
    #[inline]
    pub fn flags(&self) -> BeginFlags {
        self.flags
    }

    /// Returns the backend handle, if allocated.
    #[inline]
    pub fn raw(&self) -> Option<D::CommandBuffer> {
        self.raw
    }

    // =========================================================================
    // Single-use blocking path
    // =========================================================================

    /// Allocates a buffer from `pool` and begins it with the single-use hint.
    ///
    /// Pair with [`CommandBuffer::single_use_end_submit`]. Meant for one-off
    /// setup work, never for per-frame recording.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or begin fails.
    pub fn single_use_allocate_begin(device: Arc<D>, pool: &CommandPool<D>) -> RhiResult<Self> {
        let mut cmd = Self::new(device, pool);
        cmd.allocate()?;
        cmd.begin(BeginFlags::SINGLE_USE)?;
        Ok(cmd)
    }

    /// Ends the buffer, submits it without a fence, blocks the calling thread
    /// until the graphics queue drains, then frees the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if ending, submitting or waiting fails. The buffer is
    /// freed in every case.
    pub fn single_use_end_submit(mut self) -> RhiResult<()> {
        let result = self.end_submit_and_wait();
        self.free();
        result
    }

    fn end_submit_and_wait(&mut self) -> RhiResult<()> {
        self.end()?;

        let Some(raw) = self.raw else {
            return Ok(());
        };

        self.device.submit(&Submission {
            command_buffers: &[raw],
            wait_semaphores: &[],
            signal_semaphores: &[],
            fence: None,
        })?;
        self.mark_submitted();

        self.device.queue_wait_idle()
    }
}

impl<D: GpuDevice> Drop for CommandBuffer<D> {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        Extent2d, FramebufferDescriptor, PresentMode, SurfaceFormat, SwapchainDescriptor,
    };
    use crate::headless::{HeadlessDevice, RecordedCommand};

    fn setup() -> (Arc<HeadlessDevice>, CommandPool<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::default());
        let pool = CommandPool::new(device.clone()).unwrap();
        (device, pool)
    }

    /// Builds one render target on a fresh two-image swapchain.
    fn render_target(
        device: &HeadlessDevice,
    ) -> (
        <HeadlessDevice as GpuDevice>::DepthAttachment,
        <HeadlessDevice as GpuDevice>::Framebuffer,
    ) {
        let extent = Extent2d::new(4, 4);
        let swapchain = device
            .create_swapchain(
                &SwapchainDescriptor {
                    image_count: 2,
                    format: SurfaceFormat::Bgra8Srgb,
                    present_mode: PresentMode::Fifo,
                    extent,
                },
                None,
            )
            .unwrap();
        let image = device.swapchain_images(swapchain).unwrap()[0];
        let view = device
            .create_image_view(image, SurfaceFormat::Bgra8Srgb)
            .unwrap();
        let depth = device.create_depth_attachment(extent).unwrap();
        let framebuffer = device
            .create_framebuffer(&FramebufferDescriptor {
                color_image: image,
                color_view: view,
                depth: &depth,
                extent,
            })
            .unwrap();
        (depth, framebuffer)
    }

    #[test]
    fn test_full_lifecycle() {
        let (device, pool) = setup();
        let mut cmd = CommandBuffer::new(device.clone(), &pool);
        assert_eq!(cmd.state(), CommandBufferState::Unallocated);

        cmd.allocate().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Ready);

        cmd.begin(BeginFlags::default()).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);

        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::RecordingEnded);

        cmd.mark_submitted();
        assert_eq!(cmd.state(), CommandBufferState::Submitted);

        cmd.reset().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Ready);

        cmd.free();
        assert_eq!(cmd.state(), CommandBufferState::Unallocated);
        assert!(cmd.raw().is_none());
        assert_eq!(device.live_objects().command_buffers, 0);
    }

    #[test]
    fn test_end_from_render_pass() {
        let (device, pool) = setup();
        let (depth, framebuffer) = render_target(&device);

        let mut cmd = CommandBuffer::new(device.clone(), &pool);
        cmd.allocate().unwrap();
        cmd.begin(BeginFlags::default()).unwrap();
        cmd.prepare_depth_attachment(&depth);
        cmd.begin_render_pass(&framebuffer, ClearValues::default());
        assert_eq!(cmd.state(), CommandBufferState::InRenderpass);

        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::RecordingEnded);

        let recorded = device.recorded_commands(cmd.raw().unwrap());
        assert_eq!(recorded.len(), 4);
        assert_eq!(recorded[0], RecordedCommand::Begin(BeginFlags::default()));
        assert_eq!(recorded[1], RecordedCommand::PrepareDepthAttachment);
        assert!(matches!(recorded[2], RecordedCommand::BeginRenderPass { .. }));
        assert_eq!(recorded[3], RecordedCommand::End);
    }

    #[test]
    fn test_reset_then_begin_matches_fresh_buffer() {
        let (device, pool) = setup();

        let mut fresh = CommandBuffer::new(device.clone(), &pool);
        fresh.allocate().unwrap();
        fresh.begin(BeginFlags::default()).unwrap();

        let mut reused = CommandBuffer::new(device.clone(), &pool);
        reused.allocate().unwrap();
        reused.begin(BeginFlags::SINGLE_USE).unwrap();
        reused.end().unwrap();
        reused.mark_submitted();
        reused.reset().unwrap();
        assert_eq!(reused.flags(), BeginFlags::default());
        reused.begin(BeginFlags::default()).unwrap();

        assert_eq!(reused.state(), fresh.state());
        assert_eq!(reused.flags(), fresh.flags());
        assert_eq!(
            device.recorded_commands(reused.raw().unwrap()),
            device.recorded_commands(fresh.raw().unwrap())
        );
    }

    #[test]
    fn test_single_use_blocks_until_idle_and_frees() {
        let (device, pool) = setup();

        let cmd = CommandBuffer::single_use_allocate_begin(device.clone(), &pool).unwrap();
        assert_eq!(cmd.flags(), BeginFlags::SINGLE_USE);
        assert_eq!(device.live_objects().command_buffers, 1);

        cmd.single_use_end_submit().unwrap();

        let stats = device.stats();
        assert_eq!(stats.submissions, 1);
        assert_eq!(stats.queue_idle_waits, 1);
        assert_eq!(device.pending_submissions(), 0);
        assert_eq!(device.live_objects().command_buffers, 0);
    }

    #[test]
    fn test_drop_frees_allocation() {
        let (device, pool) = setup();
        {
            let mut cmd = CommandBuffer::new(device.clone(), &pool);
            cmd.allocate().unwrap();
        }
        assert_eq!(device.live_objects().command_buffers, 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "begin called outside the Ready state")]
    fn test_begin_while_recording_panics() {
        let (device, pool) = setup();
        let mut cmd = CommandBuffer::new(device, &pool);
        cmd.allocate().unwrap();
        cmd.begin(BeginFlags::default()).unwrap();
        let _ = cmd.begin(BeginFlags::default());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "mark_submitted called before recording ended")]
    fn test_submit_before_end_panics() {
        let (device, pool) = setup();
        let mut cmd = CommandBuffer::new(device, &pool);
        cmd.allocate().unwrap();
        cmd.begin(BeginFlags::default()).unwrap();
        cmd.mark_submitted();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "end_render_pass called outside a render pass")]
    fn test_end_render_pass_without_begin_panics() {
        let (device, pool) = setup();
        let (_depth, framebuffer) = render_target(&device);
        let mut cmd = CommandBuffer::new(device, &pool);
        cmd.allocate().unwrap();
        cmd.begin(BeginFlags::default()).unwrap();
        cmd.end_render_pass(&framebuffer);
    }
}
