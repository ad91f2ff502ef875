//! Backend interface shared by every GPU device implementation.
//!
//! [`GpuDevice`] is the seam between the frame pipeline and a concrete GPU API.
//! Each backend names its own handle types through associated types, so the
//! pipeline is written once and monomorphized per backend:
//!
//! - [`VulkanDevice`](crate::device::VulkanDevice) drives real hardware through `ash`.
//! - [`HeadlessDevice`](crate::headless::HeadlessDevice) simulates an in-order
//!   queue and a presentation engine in process, for tests and GPU-less runs.
//!
//! # Handle contract
//!
//! Handles passed to a device must have been created by that same device.
//! A handle must not be destroyed while submitted work that references it is
//! still pending; callers establish this with fence waits or
//! [`GpuDevice::wait_idle`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RhiResult;

/// Width and height of a surface or attachment, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if either dimension is zero (e.g. a minimized window).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Extent2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Color formats a presentation surface can expose.
///
/// All formats use the sRGB non-linear color space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SurfaceFormat {
    #[default]
    Bgra8Srgb,
    Bgra8Unorm,
    Rgba8Srgb,
    Rgba8Unorm,
    A2b10g10r10Unorm,
}

/// How presented images are queued for display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresentMode {
    /// No queueing; may tear.
    Immediate,
    /// Single-entry queue where newer images replace older ones.
    #[default]
    Mailbox,
    /// Vsync queue. Always supported.
    Fifo,
    /// Vsync queue that tears when a frame is late.
    FifoRelaxed,
}

/// What a device reports about its presentation surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceSupport {
    pub min_image_count: u32,
    /// Zero means no upper bound.
    pub max_image_count: u32,
    /// Fixed extent the swapchain must use, if the platform dictates one.
    pub current_extent: Option<Extent2d>,
    pub min_extent: Extent2d,
    pub max_extent: Extent2d,
    /// Supported formats, in the platform's order of preference.
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

impl SurfaceSupport {
    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Negotiated swapchain parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    pub image_count: u32,
    pub format: SurfaceFormat,
    pub present_mode: PresentMode,
    pub extent: Extent2d,
}

/// Usage hints recorded when a command buffer begins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BeginFlags {
    /// The buffer is submitted once and then reset or freed.
    pub single_use: bool,
    /// The buffer is entirely inside a render pass begun elsewhere.
    pub continues_pass: bool,
    /// The buffer may be pending on the queue more than once at a time.
    pub simultaneous: bool,
}

impl BeginFlags {
    pub const SINGLE_USE: Self = Self {
        single_use: true,
        continues_pass: false,
        simultaneous: false,
    };
}

/// Clear values applied when a render pass begins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
        }
    }
}

/// Result of a successful image acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The swapchain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

/// One batch of command buffers for the graphics queue.
pub struct Submission<'a, D: GpuDevice> {
    pub command_buffers: &'a [D::CommandBuffer],
    /// Semaphores the batch waits on at the color-output stage.
    pub wait_semaphores: &'a [D::Semaphore],
    /// Semaphores signaled when the batch completes.
    pub signal_semaphores: &'a [D::Semaphore],
    /// Fence signaled when the batch completes. Must be unsignaled.
    pub fence: Option<D::Fence>,
}

/// Attachments making up one presentable render target.
pub struct FramebufferDescriptor<'a, D: GpuDevice> {
    pub color_image: D::Image,
    pub color_view: D::ImageView,
    pub depth: &'a D::DepthAttachment,
    pub extent: Extent2d,
}

/// A GPU device with one graphics queue and one presentation surface.
pub trait GpuDevice: Send + Sync + Sized + 'static {
    type Fence: Copy + fmt::Debug + PartialEq + Send + Sync;
    type Semaphore: Copy + fmt::Debug + PartialEq + Send + Sync;
    type CommandPool: Copy + fmt::Debug + PartialEq + Send + Sync;
    type CommandBuffer: Copy + fmt::Debug + PartialEq + Send + Sync;
    type Swapchain: Copy + fmt::Debug + PartialEq + Send + Sync;
    type Image: Copy + fmt::Debug + PartialEq + Send + Sync;
    type ImageView: Copy + fmt::Debug + PartialEq + Send + Sync;
    type DepthAttachment: fmt::Debug + Send + Sync;
    type Framebuffer: Copy + fmt::Debug + Send + Sync;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<Self::Fence>;
    fn destroy_fence(&self, fence: Self::Fence);

    /// Blocks until `fence` is signaled or `timeout_ns` expires.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`](crate::RhiError::Timeout) if the wait expired,
    /// or a fatal error such as `DeviceLost`.
    fn wait_fence(&self, fence: Self::Fence, timeout_ns: u64) -> RhiResult<()>;

    /// Returns the fence to the unsignaled state. The fence must not be
    /// referenced by pending work.
    fn reset_fence(&self, fence: Self::Fence) -> RhiResult<()>;

    fn create_semaphore(&self) -> RhiResult<Self::Semaphore>;
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);

    // =========================================================================
    // Command Recording
    // =========================================================================

    fn create_command_pool(&self) -> RhiResult<Self::CommandPool>;
    fn destroy_command_pool(&self, pool: Self::CommandPool);
    fn allocate_command_buffer(&self, pool: Self::CommandPool) -> RhiResult<Self::CommandBuffer>;
    fn free_command_buffer(&self, pool: Self::CommandPool, buffer: Self::CommandBuffer);

    fn begin_command_buffer(&self, buffer: Self::CommandBuffer, flags: BeginFlags)
    -> RhiResult<()>;
    fn end_command_buffer(&self, buffer: Self::CommandBuffer) -> RhiResult<()>;
    fn reset_command_buffer(&self, buffer: Self::CommandBuffer) -> RhiResult<()>;

    /// Records the start of rendering into `framebuffer`, clearing it.
    fn cmd_begin_render_pass(
        &self,
        buffer: Self::CommandBuffer,
        framebuffer: &Self::Framebuffer,
        clear: ClearValues,
    );

    /// Records the end of rendering and readies the color image for presentation.
    fn cmd_end_render_pass(&self, buffer: Self::CommandBuffer, framebuffer: &Self::Framebuffer);

    /// Records the one-time transition of a new depth attachment into its
    /// attachment layout.
    fn cmd_prepare_depth_attachment(
        &self,
        buffer: Self::CommandBuffer,
        depth: &Self::DepthAttachment,
    );

    // =========================================================================
    // Queue
    // =========================================================================

    fn submit(&self, submission: &Submission<'_, Self>) -> RhiResult<()>;

    /// Blocks until the graphics queue has drained.
    fn queue_wait_idle(&self) -> RhiResult<()>;

    /// Blocks until every queue on the device has drained.
    fn wait_idle(&self) -> RhiResult<()>;

    // =========================================================================
    // Presentation
    // =========================================================================

    fn surface_support(&self) -> RhiResult<SurfaceSupport>;

    /// Creates a swapchain. `old` is a hint for resource reuse and stays valid;
    /// the caller destroys it afterwards.
    fn create_swapchain(
        &self,
        desc: &SwapchainDescriptor,
        old: Option<Self::Swapchain>,
    ) -> RhiResult<Self::Swapchain>;
    fn destroy_swapchain(&self, swapchain: Self::Swapchain);
    fn swapchain_images(&self, swapchain: Self::Swapchain) -> RhiResult<Vec<Self::Image>>;

    /// Acquires the next presentable image, signaling `signal` when it is
    /// safe to render into it.
    ///
    /// # Errors
    ///
    /// [`RhiError::OutOfDate`](crate::RhiError::OutOfDate) when the swapchain
    /// must be recreated, [`RhiError::Timeout`](crate::RhiError::Timeout) when
    /// no image became available in time.
    fn acquire_next_image(
        &self,
        swapchain: Self::Swapchain,
        timeout_ns: u64,
        signal: Self::Semaphore,
    ) -> RhiResult<AcquiredImage>;

    /// Queues `image_index` for display once `wait` is signaled.
    /// Returns true if the swapchain is suboptimal.
    fn present(
        &self,
        swapchain: Self::Swapchain,
        image_index: u32,
        wait: Self::Semaphore,
    ) -> RhiResult<bool>;

    // =========================================================================
    // Attachments
    // =========================================================================

    fn create_image_view(
        &self,
        image: Self::Image,
        format: SurfaceFormat,
    ) -> RhiResult<Self::ImageView>;
    fn destroy_image_view(&self, view: Self::ImageView);

    fn create_depth_attachment(&self, extent: Extent2d) -> RhiResult<Self::DepthAttachment>;
    fn destroy_depth_attachment(&self, depth: Self::DepthAttachment);

    fn create_framebuffer(
        &self,
        desc: &FramebufferDescriptor<'_, Self>,
    ) -> RhiResult<Self::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: Self::Framebuffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_is_empty() {
        assert!(Extent2d::new(0, 600).is_empty());
        assert!(Extent2d::new(800, 0).is_empty());
        assert!(!Extent2d::new(800, 600).is_empty());
        assert_eq!(Extent2d::new(800, 600).to_string(), "800x600");
    }

    #[test]
    fn test_surface_support_is_adequate() {
        let mut support = SurfaceSupport {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: None,
            min_extent: Extent2d::new(1, 1),
            max_extent: Extent2d::new(4096, 4096),
            formats: vec![SurfaceFormat::Bgra8Srgb],
            present_modes: vec![PresentMode::Fifo],
        };
        assert!(support.is_adequate());

        support.present_modes.clear();
        assert!(!support.is_adequate());
    }

    #[test]
    fn test_single_use_flags() {
        let flags = BeginFlags::SINGLE_USE;
        assert!(flags.single_use);
        assert!(!flags.continues_pass);
        assert!(!flags.simultaneous);
        assert_eq!(BeginFlags::default(), BeginFlags {
            single_use: false,
            continues_pass: false,
            simultaneous: false,
        });
    }
}
