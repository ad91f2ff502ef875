//! Swapchain parameter negotiation.
//!
//! Turns what the application asks for ([`SwapchainRequest`]) and what the
//! surface supports ([`SurfaceSupport`]) into concrete
//! [`SwapchainDescriptor`] values. These functions are backend independent;
//! every [`GpuDevice`](crate::GpuDevice) implementation creates its swapchain
//! from the negotiated descriptor.
//!
//! # Example
//!
//! ```
//! use renderer_rhi::swapchain::{SwapchainRequest, negotiate};
//! use renderer_rhi::{Extent2d, PresentMode, SurfaceFormat, SurfaceSupport};
//!
//! let support = SurfaceSupport {
//!     min_image_count: 2,
//!     max_image_count: 8,
//!     current_extent: None,
//!     min_extent: Extent2d::new(1, 1),
//!     max_extent: Extent2d::new(4096, 4096),
//!     formats: vec![SurfaceFormat::Bgra8Unorm, SurfaceFormat::Bgra8Srgb],
//!     present_modes: vec![PresentMode::Fifo],
//! };
//!
//! let desc = negotiate(&support, &SwapchainRequest::new(Extent2d::new(800, 600))).unwrap();
//! assert_eq!(desc.image_count, 3);
//! assert_eq!(desc.format, SurfaceFormat::Bgra8Srgb);
//! assert_eq!(desc.present_mode, PresentMode::Fifo);
//! ```

use tracing::{debug, info, warn};

use crate::backend::{Extent2d, PresentMode, SurfaceFormat, SurfaceSupport, SwapchainDescriptor};
use crate::error::{RhiError, RhiResult};

/// Image count requested when the caller has no preference.
pub const DEFAULT_IMAGE_COUNT: u32 = 3;

/// What the application would like the swapchain to look like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainRequest {
    pub extent: Extent2d,
    pub image_count: u32,
    pub format: SurfaceFormat,
    pub present_mode: PresentMode,
}

impl SwapchainRequest {
    /// Request for `extent` with default count, format and present mode.
    pub fn new(extent: Extent2d) -> Self {
        Self {
            extent,
            image_count: DEFAULT_IMAGE_COUNT,
            format: SurfaceFormat::default(),
            present_mode: PresentMode::default(),
        }
    }
}

/// Negotiates swapchain parameters.
///
/// # Errors
///
/// Returns [`RhiError::SwapchainError`] if the surface reports no formats or
/// no present modes.
pub fn negotiate(
    support: &SurfaceSupport,
    request: &SwapchainRequest,
) -> RhiResult<SwapchainDescriptor> {
    if !support.is_adequate() {
        return Err(RhiError::SwapchainError(
            "Inadequate swapchain support (no formats or present modes)".to_string(),
        ));
    }

    let desc = SwapchainDescriptor {
        image_count: determine_image_count(support, request.image_count),
        format: choose_surface_format(&support.formats, request.format),
        present_mode: choose_present_mode(&support.present_modes, request.present_mode),
        extent: choose_extent(support, request.extent),
    };

    info!(
        "Negotiated swapchain: {}, {:?}, {:?}, {} images",
        desc.extent, desc.format, desc.present_mode, desc.image_count
    );

    Ok(desc)
}

/// Chooses the surface format.
///
/// Uses `preferred` if the surface supports it, otherwise the first format the
/// surface reports. `formats` must not be empty.
pub fn choose_surface_format(formats: &[SurfaceFormat], preferred: SurfaceFormat) -> SurfaceFormat {
    if formats.contains(&preferred) {
        debug!("Selected preferred surface format: {:?}", preferred);
        return preferred;
    }

    warn!(
        "Preferred surface format {:?} unavailable, using {:?}",
        preferred, formats[0]
    );
    formats[0]
}

/// Chooses the present mode.
///
/// Uses `preferred` if available. Falls back to FIFO, which every surface
/// supports.
pub fn choose_present_mode(present_modes: &[PresentMode], preferred: PresentMode) -> PresentMode {
    if present_modes.contains(&preferred) {
        debug!("Selected {:?} present mode", preferred);
        return preferred;
    }

    debug!("{:?} unavailable, selected FIFO present mode (vsync)", preferred);
    PresentMode::Fifo
}

/// Chooses the swapchain extent.
///
/// If the surface dictates an extent it is used as is; otherwise the requested
/// size is clamped to the surface's min/max extents.
pub fn choose_extent(support: &SurfaceSupport, requested: Extent2d) -> Extent2d {
    if let Some(current) = support.current_extent {
        debug!("Using current surface extent: {}", current);
        return current;
    }

    let extent = Extent2d {
        width: requested
            .width
            .clamp(support.min_extent.width, support.max_extent.width),
        height: requested
            .height
            .clamp(support.min_extent.height, support.max_extent.height),
    };

    debug!(
        "Calculated extent: {} (requested: {}, min: {}, max: {})",
        extent, requested, support.min_extent, support.max_extent
    );

    extent
}

/// Clamps the requested image count to the surface's limits.
///
/// A `max_image_count` of zero means there is no upper bound.
pub fn determine_image_count(support: &SurfaceSupport, requested: u32) -> u32 {
    let mut image_count = requested.max(support.min_image_count);
    if support.max_image_count > 0 {
        image_count = image_count.min(support.max_image_count);
    }

    debug!(
        "Image count: {} (requested: {}, min: {}, max: {})",
        image_count,
        requested,
        support.min_image_count,
        if support.max_image_count == 0 {
            "unlimited".to_string()
        } else {
            support.max_image_count.to_string()
        }
    );

    image_count
}
