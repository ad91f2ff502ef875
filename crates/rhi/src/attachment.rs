//! Vulkan render-target attachments.
//!
//! - [`VulkanDepthAttachment`] owns a depth image backed by gpu-allocator
//!   memory, one per presentable image.
//! - [`VulkanRenderTarget`] names the attachments dynamic rendering draws into.
//!   With dynamic rendering there is no `VkFramebuffer`; the render target is a
//!   plain set of handles.
//!
//! Both are created and destroyed through
//! [`VulkanDevice`](crate::device::VulkanDevice)'s [`GpuDevice`](crate::GpuDevice)
//! implementation.

use std::sync::{Mutex, PoisonError};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use tracing::{debug, error, warn};

use crate::backend::Extent2d;
use crate::conv;
use crate::error::{RhiError, RhiResult};

/// Depth format used for every depth attachment (32-bit float).
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Depth image, view and memory for one presentable image.
#[derive(Debug)]
pub struct VulkanDepthAttachment {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: Extent2d,
}

impl VulkanDepthAttachment {
    pub(crate) fn new(
        device: &ash::Device,
        allocator: &Mutex<Allocator>,
        extent: Extent2d,
    ) -> RhiResult<Self> {
        if extent.is_empty() {
            return Err(RhiError::InvalidExtent(extent));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name: "depth_attachment",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let mut attachment = Self {
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            extent,
        };

        if let Err(e) = attachment.bind_and_create_view(device) {
            attachment.destroy(device, allocator);
            return Err(e);
        }

        debug!("Created depth attachment: {}", extent);
        Ok(attachment)
    }

    fn bind_and_create_view(&mut self, device: &ash::Device) -> RhiResult<()> {
        if let Some(allocation) = &self.allocation {
            unsafe {
                device.bind_image_memory(self.image, allocation.memory(), allocation.offset())?
            };
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(subresource_range(vk::ImageAspectFlags::DEPTH));

        self.view = unsafe { device.create_image_view(&view_info, None)? };
        Ok(())
    }

    /// Destroys view, image and memory, in that order.
    pub(crate) fn destroy(mut self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
            device.destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            let mut allocator = allocator.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = allocator.free(allocation) {
                error!("Failed to free depth attachment allocation: {:?}", e);
            }
        }

        debug!("Destroyed depth attachment: {}", self.extent);
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }
}

/// Attachments for one dynamic-rendering pass.
#[derive(Clone, Copy, Debug)]
pub struct VulkanRenderTarget {
    pub color_image: vk::Image,
    pub color_view: vk::ImageView,
    pub depth_image: vk::Image,
    pub depth_view: vk::ImageView,
    pub extent: vk::Extent2D,
}

impl VulkanRenderTarget {
    pub(crate) fn new(
        color_image: vk::Image,
        color_view: vk::ImageView,
        depth: &VulkanDepthAttachment,
        extent: Extent2d,
    ) -> Self {
        Self {
            color_image,
            color_view,
            depth_image: depth.image(),
            depth_view: depth.view(),
            extent: conv::map_extent(extent),
        }
    }

    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Stage and access masks for a layout transition, as
/// `(src_stage, src_access, dst_stage, dst_access)`.
fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        // Orders depth writes of consecutive frames on the same attachment
        (vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => {
            warn!(
                "Unhandled layout transition: {:?} -> {:?}",
                old_layout, new_layout
            );
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    }
}

/// Records an image layout transition barrier.
pub(crate) fn cmd_transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    aspect_mask: vk::ImageAspectFlags,
) {
    let (src_stage, src_access, dst_stage, dst_access) = transition_masks(old_layout, new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect_mask))
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_format() {
        assert_eq!(DEPTH_FORMAT, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_present_transition_waits_on_color_output() {
        let (src_stage, src_access, dst_stage, _) = transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn test_acquire_transition_matches_submit_wait_stage() {
        // The frame submission waits for the acquire semaphore at
        // COLOR_ATTACHMENT_OUTPUT, so the first barrier must start there too.
        let (src_stage, _, _, dst_access) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_depth_frame_barrier_orders_writes() {
        let (src_stage, src_access, _, _) = transition_masks(
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::LATE_FRAGMENT_TESTS);
        assert!(src_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }
}
