//! GPU device abstraction (Render Hardware Interface).
//!
//! This crate provides the device seam the frame pipeline is written against:
//! - [`GpuDevice`], the backend trait, with a Vulkan implementation over `ash`
//!   and an in-process headless implementation
//! - Instance, physical device and logical device creation
//! - Swapchain negotiation
//! - Command buffer lifecycle tracking
//! - Fence and semaphore wrappers

mod backend;
mod error;

pub mod attachment;
pub mod command;
pub mod conv;
pub mod device;
pub mod headless;
pub mod instance;
pub mod physical_device;
pub mod swapchain;
pub mod sync;

pub use backend::{
    AcquiredImage, BeginFlags, ClearValues, Extent2d, FramebufferDescriptor, GpuDevice,
    PresentMode, Submission, SurfaceFormat, SurfaceSupport, SwapchainDescriptor,
};
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
