//! Synchronization primitives.
//!
//! This module provides owning wrappers for the backend's synchronization objects:
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations
//! - [`Fence`] - GPU-to-CPU completion signal the host can wait on
//! - [`FrameSync`] - the set of primitives owned by one frame slot
//!
//! # Overview
//!
//! - **Semaphores** order operations on the GPU. Image acquisition signals one,
//!   the frame's submission waits on it; the submission signals another, and
//!   presentation waits on that. The CPU never waits on a semaphore.
//!
//! - **Fences** let the CPU learn that submitted work has finished. A fence is
//!   handed to a submission, waited on by the host, then reset before it is
//!   submitted again.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use renderer_rhi::headless::HeadlessDevice;
//! use renderer_rhi::sync::{Fence, Semaphore};
//!
//! # fn main() -> Result<(), renderer_rhi::RhiError> {
//! let device = Arc::new(HeadlessDevice::default());
//!
//! let image_available = Semaphore::new(device.clone())?;
//! let in_flight = Fence::new(device.clone(), true)?;
//!
//! // A fence created signaled does not block the first frame
//! in_flight.wait(0)?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::backend::GpuDevice;
use crate::error::RhiResult;

/// Owning semaphore wrapper. Destroyed on drop.
pub struct Semaphore<D: GpuDevice> {
    device: Arc<D>,
    raw: D::Semaphore,
}

impl<D: GpuDevice> Semaphore<D> {
    /// Creates a new semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let raw = device.create_semaphore()?;
        Ok(Self { device, raw })
    }

    /// Returns the backend handle.
    #[inline]
    pub fn raw(&self) -> D::Semaphore {
        self.raw
    }
}

impl<D: GpuDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.raw);
    }
}

/// Owning fence wrapper with a cached signaled flag.
///
/// Once a wait has observed the fence signaled, further waits return
/// immediately without calling into the backend until [`Fence::reset`] is
/// called. Destroyed on drop.
pub struct Fence<D: GpuDevice> {
    device: Arc<D>,
    raw: D::Fence,
    signaled: AtomicBool,
}

impl<D: GpuDevice> Fence<D> {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The device that owns the fence
    /// * `signaled` - If true, creates the fence in the signaled state.
    ///   Used for fences that are waited on before the first submission
    ///   that would signal them.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<D>, signaled: bool) -> RhiResult<Self> {
        let raw = device.create_fence(signaled)?;

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self {
            device,
            raw,
            signaled: AtomicBool::new(signaled),
        })
    }

    /// Returns the backend handle.
    #[inline]
    pub fn raw(&self) -> D::Fence {
        self.raw
    }

    /// Waits for the fence to become signaled.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Timeout in nanoseconds. Use `u64::MAX` for infinite wait.
    ///
    /// # Errors
    ///
    /// - [`RhiError::Timeout`](crate::RhiError::Timeout) if the timeout
    ///   expired. The fence may still signal later.
    /// - [`RhiError::DeviceLost`](crate::RhiError::DeviceLost),
    ///   [`RhiError::OutOfHostMemory`](crate::RhiError::OutOfHostMemory) or
    ///   [`RhiError::OutOfDeviceMemory`](crate::RhiError::OutOfDeviceMemory)
    ///   if the device failed.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        if self.is_signaled() {
            return Ok(());
        }

        self.device.wait_fence(self.raw, timeout)?;
        self.signaled.store(true, Ordering::Release);
        Ok(())
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be in use by any pending submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset operation fails.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.raw)?;
        self.signaled.store(false, Ordering::Release);
        Ok(())
    }

    /// Returns the cached signaled flag without touching the device.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.raw);
    }
}

/// Per-frame-slot synchronization primitives.
///
/// # Usage Pattern
///
/// ```text
/// 1. Wait for in_flight_fence (CPU waits for the slot's previous frame)
/// 2. Acquire an image (signals acquire_complete)
/// 3. Reset in_flight_fence
/// 4. Submit the command buffer:
///    - Wait on acquire_complete
///    - Signal render_complete
///    - Signal in_flight_fence on completion
/// 5. Present (waits on render_complete)
/// ```
pub struct FrameSync<D: GpuDevice> {
    /// Signaled when the acquired image may be rendered into.
    acquire_complete: Semaphore<D>,
    /// Signaled when the frame's rendering is done.
    render_complete: Semaphore<D>,
    /// Signaled when the frame's submission has finished executing.
    in_flight_fence: Fence<D>,
}

impl<D: GpuDevice> FrameSync<D> {
    /// Creates a new set of frame synchronization primitives.
    ///
    /// The in-flight fence starts signaled so the first frame on this slot
    /// does not block.
    ///
    /// # Errors
    ///
    /// Returns an error if any synchronization object creation fails.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let acquire_complete = Semaphore::new(device.clone())?;
        let render_complete = Semaphore::new(device.clone())?;
        let in_flight_fence = Fence::new(device, true)?;

        Ok(Self {
            acquire_complete,
            render_complete,
            in_flight_fence,
        })
    }

    #[inline]
    pub fn acquire_complete(&self) -> &Semaphore<D> {
        &self.acquire_complete
    }

    #[inline]
    pub fn render_complete(&self) -> &Semaphore<D> {
        &self.render_complete
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence<D> {
        &self.in_flight_fence
    }
}
