//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

use crate::backend::Extent2d;

/// RHI-specific error type.
///
/// Results from fence waits, submission and presentation are split into
/// dedicated variants so callers can tell recoverable conditions
/// ([`RhiError::Timeout`], [`RhiError::OutOfDate`]) from fatal ones
/// (see [`RhiError::is_fatal`]).
#[derive(Error, Debug)]
pub enum RhiError {
    /// A bounded wait expired before the object was signaled
    #[error("Timed out waiting for the GPU")]
    Timeout,

    /// The presentation surface no longer matches the window
    #[error("Presentation surface is out of date")]
    OutOfDate,

    /// The logical device was lost
    #[error("GPU device lost")]
    DeviceLost,

    /// Host memory exhausted
    #[error("Out of host memory")]
    OutOfHostMemory,

    /// Device memory exhausted
    #[error("Out of device memory")]
    OutOfDeviceMemory,

    /// Any other Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface cannot be used for presentation
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Attachment requested with a zero dimension
    #[error("Invalid attachment extent: {0}")]
    InvalidExtent(Extent2d),
}

impl RhiError {
    /// Returns true for errors the frame pipeline cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost | Self::OutOfHostMemory | Self::OutOfDeviceMemory
        )
    }
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            other => Self::VulkanError(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_classification() {
        assert!(matches!(
            RhiError::from(vk::Result::TIMEOUT),
            RhiError::Timeout
        ));
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_OUT_OF_DATE_KHR),
            RhiError::OutOfDate
        ));
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_DEVICE_LOST),
            RhiError::DeviceLost
        ));
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_INITIALIZATION_FAILED),
            RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED)
        ));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(RhiError::DeviceLost.is_fatal());
        assert!(RhiError::OutOfHostMemory.is_fatal());
        assert!(RhiError::OutOfDeviceMemory.is_fatal());

        assert!(!RhiError::Timeout.is_fatal());
        assert!(!RhiError::OutOfDate.is_fatal());
        assert!(!RhiError::SwapchainError("stale".to_string()).is_fatal());
    }
}
