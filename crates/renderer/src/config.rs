//! Frame pipeline settings.
//!
//! Loaded from the `[frame]` table of the application config file. Every
//! field has a default, so an empty table (or no file) gives a working setup.
//!
//! ```toml
//! [frame]
//! requested_image_count = 3
//! preferred_present_mode = "mailbox"
//! preferred_format = "bgra8-srgb"
//! frame_timeout_ms = 1000
//! clear_color = [0.1, 0.1, 0.1, 1.0]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use renderer_rhi::swapchain::{DEFAULT_IMAGE_COUNT, SwapchainRequest};
use renderer_rhi::{ClearValues, Extent2d, PresentMode, SurfaceFormat};

/// Settings for the frame controller and its presentation surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Presentable images to ask for; clamped to what the surface allows.
    pub requested_image_count: u32,
    /// Used when the surface supports it, otherwise FIFO.
    pub preferred_present_mode: PresentMode,
    /// Used when the surface supports it, otherwise the first reported format.
    pub preferred_format: SurfaceFormat,
    /// How long `start_frame` waits for the frame slot's fence.
    /// `None` waits forever.
    pub frame_timeout_ms: Option<u64>,
    /// How long acquisition waits for a presentable image.
    /// `None` waits forever.
    pub acquire_timeout_ms: Option<u64>,
    /// Color the frame's render pass is cleared to.
    pub clear_color: [f32; 4],
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            requested_image_count: DEFAULT_IMAGE_COUNT,
            preferred_present_mode: PresentMode::Mailbox,
            preferred_format: SurfaceFormat::Bgra8Srgb,
            frame_timeout_ms: None,
            acquire_timeout_ms: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl FrameConfig {
    /// Fence wait timeout in nanoseconds.
    pub fn frame_timeout_ns(&self) -> u64 {
        timeout_ns(self.frame_timeout_ms)
    }

    /// Acquire timeout in nanoseconds.
    pub fn acquire_timeout_ns(&self) -> u64 {
        timeout_ns(self.acquire_timeout_ms)
    }

    pub fn clear_values(&self) -> ClearValues {
        ClearValues {
            color: self.clear_color,
            ..ClearValues::default()
        }
    }

    /// Swapchain request for a surface of `extent`.
    pub fn swapchain_request(&self, extent: Extent2d) -> SwapchainRequest {
        SwapchainRequest {
            extent,
            image_count: self.requested_image_count,
            format: self.preferred_format,
            present_mode: self.preferred_present_mode,
        }
    }
}

fn timeout_ns(ms: Option<u64>) -> u64 {
    ms.map_or(u64::MAX, |ms| {
        u64::try_from(Duration::from_millis(ms).as_nanos()).unwrap_or(u64::MAX)
    })
}
