//! Conversions between backend-neutral types and Vulkan types.

use ash::vk;

use crate::backend::{BeginFlags, Extent2d, PresentMode, SurfaceFormat, SurfaceSupport};

pub fn map_surface_format(format: SurfaceFormat) -> vk::Format {
    match format {
        SurfaceFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        SurfaceFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        SurfaceFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        SurfaceFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        SurfaceFormat::A2b10g10r10Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
    }
}

/// Maps a reported surface format back. Formats outside the sRGB non-linear
/// color space, or not known to [`SurfaceFormat`], yield `None`.
pub fn surface_format_from_vk(format: vk::SurfaceFormatKHR) -> Option<SurfaceFormat> {
    if format.color_space != vk::ColorSpaceKHR::SRGB_NONLINEAR {
        return None;
    }
    match format.format {
        vk::Format::B8G8R8A8_SRGB => Some(SurfaceFormat::Bgra8Srgb),
        vk::Format::B8G8R8A8_UNORM => Some(SurfaceFormat::Bgra8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(SurfaceFormat::Rgba8Srgb),
        vk::Format::R8G8B8A8_UNORM => Some(SurfaceFormat::Rgba8Unorm),
        vk::Format::A2B10G10R10_UNORM_PACK32 => Some(SurfaceFormat::A2b10g10r10Unorm),
        _ => None,
    }
}

pub fn map_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub fn present_mode_from_vk(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

#[inline]
pub fn map_extent(extent: Extent2d) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

#[inline]
pub fn extent_from_vk(extent: vk::Extent2D) -> Extent2d {
    Extent2d::new(extent.width, extent.height)
}

pub fn map_begin_flags(flags: BeginFlags) -> vk::CommandBufferUsageFlags {
    let mut usage = vk::CommandBufferUsageFlags::empty();
    if flags.single_use {
        usage |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
    }
    if flags.continues_pass {
        usage |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
    }
    if flags.simultaneous {
        usage |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
    }
    usage
}

/// Builds [`SurfaceSupport`] from raw surface queries.
///
/// A current extent of `u32::MAX` means the swapchain picks its own size.
pub fn surface_support_from_vk(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    present_modes: &[vk::PresentModeKHR],
) -> SurfaceSupport {
    let current_extent = (capabilities.current_extent.width != u32::MAX)
        .then(|| extent_from_vk(capabilities.current_extent));

    SurfaceSupport {
        min_image_count: capabilities.min_image_count,
        max_image_count: capabilities.max_image_count,
        current_extent,
        min_extent: extent_from_vk(capabilities.min_image_extent),
        max_extent: extent_from_vk(capabilities.max_image_extent),
        formats: formats
            .iter()
            .filter_map(|&f| surface_format_from_vk(f))
            .collect(),
        present_modes: present_modes
            .iter()
            .filter_map(|&m| present_mode_from_vk(m))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_format_round_trip() {
        for format in [
            SurfaceFormat::Bgra8Srgb,
            SurfaceFormat::Bgra8Unorm,
            SurfaceFormat::Rgba8Srgb,
            SurfaceFormat::Rgba8Unorm,
            SurfaceFormat::A2b10g10r10Unorm,
        ] {
            let raw = vk::SurfaceFormatKHR {
                format: map_surface_format(format),
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            };
            assert_eq!(surface_format_from_vk(raw), Some(format));
        }
    }

    #[test]
    fn test_unknown_color_space_is_skipped() {
        let raw = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        assert_eq!(surface_format_from_vk(raw), None);
    }

    #[test]
    fn test_begin_flags() {
        assert_eq!(
            map_begin_flags(BeginFlags::default()),
            vk::CommandBufferUsageFlags::empty()
        );
        assert_eq!(
            map_begin_flags(BeginFlags::SINGLE_USE),
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        );
        let all = BeginFlags {
            single_use: true,
            continues_pass: true,
            simultaneous: true,
        };
        assert_eq!(
            map_begin_flags(all),
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
                | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE
                | vk::CommandBufferUsageFlags::SIMULTANEOUS_USE
        );
    }

    #[test]
    fn test_surface_support_from_vk() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::SHARED_DEMAND_REFRESH];

        let support = surface_support_from_vk(&capabilities, &formats, &modes);
        assert_eq!(support.current_extent, None);
        assert_eq!(support.formats, vec![SurfaceFormat::Bgra8Srgb]);
        assert_eq!(support.present_modes, vec![PresentMode::Fifo]);
        assert_eq!(support.max_extent, Extent2d::new(4096, 4096));
    }
}
