//! Vulkan logical device and the [`GpuDevice`] implementation backed by it.
//!
//! [`VulkanDevice`] owns the logical device, its graphics and present queues,
//! the gpu-allocator instance and the swapchain loader. It does not own the
//! presentation surface: the windowing layer creates the surface and must keep
//! it alive until the device is dropped.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::instance::Instance;
//! use renderer_rhi::physical_device::select_physical_device;
//! use renderer_rhi::device::VulkanDevice;
//! use renderer_rhi::vk;
//!
//! let instance = Instance::new(c"demo", &[], false).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No suitable GPU found");
//!
//! let device = VulkanDevice::new(&instance, surface, &info)
//!     .expect("Failed to create logical device");
//! ```

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::attachment::{VulkanDepthAttachment, VulkanRenderTarget, cmd_transition_image_layout};
use crate::backend::{
    AcquiredImage, BeginFlags, ClearValues, Extent2d, FramebufferDescriptor, GpuDevice,
    Submission, SurfaceFormat, SurfaceSupport, SwapchainDescriptor,
};
use crate::conv;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions. Dynamic rendering and synchronization2 are
/// core in Vulkan 1.3.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device with one graphics queue and one presentation surface.
///
/// # Thread Safety
///
/// Shared across threads through `Arc`. The allocator sits behind a `Mutex`;
/// queue access is externally synchronized by the frame pipeline, which
/// submits and presents from a single thread.
pub struct VulkanDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    /// Dropped explicitly before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    graphics_family: u32,
    present_family: u32,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
}

impl VulkanDevice {
    /// Creates a logical device on the selected GPU for presenting to `surface`.
    ///
    /// Enables the swapchain extension and the Vulkan 1.3 dynamic rendering
    /// and synchronization2 features, then initializes gpu-allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The queue families are incomplete
    /// - Device creation fails
    /// - Allocator initialization fails
    pub fn new(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
            graphics_family,
            present_family,
            surface_loader,
            swapchain_loader,
            surface,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    fn image_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.graphics_family != self.present_family {
            (
                vk::SharingMode::CONCURRENT,
                vec![self.graphics_family, self.present_family],
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, vec![])
        }
    }
}

impl GpuDevice for VulkanDevice {
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type CommandPool = vk::CommandPool;
    type CommandBuffer = vk::CommandBuffer;
    type Swapchain = vk::SwapchainKHR;
    type Image = vk::Image;
    type ImageView = vk::ImageView;
    type DepthAttachment = VulkanDepthAttachment;
    type Framebuffer = VulkanRenderTarget;

    fn name(&self) -> &str {
        "vulkan"
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns)? };
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    // =========================================================================
    // Command Recording
    // =========================================================================

    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_family);
        Ok(unsafe { self.device.create_command_pool(&info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        buffers
            .into_iter()
            .next()
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN))
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[buffer]) };
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, flags: BeginFlags) -> RhiResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(conv::map_begin_flags(flags));
        unsafe { self.device.begin_command_buffer(buffer, &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(buffer)? };
        Ok(())
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        target: &VulkanRenderTarget,
        clear: ClearValues,
    ) {
        cmd_transition_image_layout(
            &self.device,
            buffer,
            target.color_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        );
        cmd_transition_image_layout(
            &self.device,
            buffer,
            target.depth_image,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageAspectFlags::DEPTH,
        );

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target.color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear.color,
                },
            });

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target.depth_view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear.depth,
                    stencil: 0,
                },
            });

        let color_attachments = [color_attachment];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(target.render_area())
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        unsafe { self.device.cmd_begin_rendering(buffer, &rendering_info) };
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer, target: &VulkanRenderTarget) {
        unsafe { self.device.cmd_end_rendering(buffer) };
        cmd_transition_image_layout(
            &self.device,
            buffer,
            target.color_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageAspectFlags::COLOR,
        );
    }

    fn cmd_prepare_depth_attachment(
        &self,
        buffer: vk::CommandBuffer,
        depth: &VulkanDepthAttachment,
    ) {
        cmd_transition_image_layout(
            &self.device,
            buffer,
            depth.image(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageAspectFlags::DEPTH,
        );
    }

    // =========================================================================
    // Queue
    // =========================================================================

    fn submit(&self, submission: &Submission<'_, Self>) -> RhiResult<()> {
        let wait_stages = vec![
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
            submission.wait_semaphores.len()
        ];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submission.command_buffers)
            .signal_semaphores(submission.signal_semaphores);

        unsafe {
            self.device.queue_submit(
                self.graphics_queue,
                &[submit_info],
                submission.fence.unwrap_or_default(),
            )?
        };
        Ok(())
    }

    fn queue_wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    // =========================================================================
    // Presentation
    // =========================================================================

    fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                    .map_err(|e| RhiError::SurfaceError(format!("capabilities: {e}")))?,
                self.surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)
                    .map_err(|e| RhiError::SurfaceError(format!("formats: {e}")))?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                    .map_err(|e| RhiError::SurfaceError(format!("present modes: {e}")))?,
            )
        };

        Ok(conv::surface_support_from_vk(
            &capabilities,
            &formats,
            &present_modes,
        ))
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDescriptor,
        old: Option<vk::SwapchainKHR>,
    ) -> RhiResult<vk::SwapchainKHR> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|e| RhiError::SurfaceError(format!("capabilities: {e}")))?
        };

        let (sharing_mode, queue_family_indices) = self.image_sharing();

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(desc.image_count)
            .image_format(conv::map_surface_format(desc.format))
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(conv::map_extent(desc.extent))
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(conv::map_present_mode(desc.present_mode))
            .clipped(true)
            .old_swapchain(old.unwrap_or_default());

        let swapchain = unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| match RhiError::from(e) {
                    fatal if fatal.is_fatal() => fatal,
                    _ => RhiError::SwapchainError(format!("creation failed: {e}")),
                })?
        };

        info!(
            "Swapchain created: {} {:?} {:?}, {} image(s) requested",
            desc.extent, desc.format, desc.present_mode, desc.image_count
        );
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
        debug!("Swapchain destroyed");
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RhiResult<AcquiredImage> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain,
                timeout_ns,
                signal,
                vk::Fence::null(),
            )?
        };
        Ok(AcquiredImage { index, suboptimal })
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        Ok(unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)?
        })
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    fn create_image_view(&self, image: vk::Image, format: SurfaceFormat) -> RhiResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(conv::map_surface_format(format))
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        Ok(unsafe { self.device.create_image_view(&info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_depth_attachment(&self, extent: Extent2d) -> RhiResult<VulkanDepthAttachment> {
        VulkanDepthAttachment::new(&self.device, &self.allocator, extent)
    }

    fn destroy_depth_attachment(&self, depth: VulkanDepthAttachment) {
        depth.destroy(&self.device, &self.allocator);
    }

    fn create_framebuffer(
        &self,
        desc: &FramebufferDescriptor<'_, Self>,
    ) -> RhiResult<VulkanRenderTarget> {
        Ok(VulkanRenderTarget::new(
            desc.color_image,
            desc.color_view,
            desc.depth,
            desc.extent,
        ))
    }

    fn destroy_framebuffer(&self, _framebuffer: VulkanRenderTarget) {
        // Dynamic rendering owns no framebuffer object
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: VulkanDevice is Send+Sync because:
// - ash::Device and the extension loaders are Send+Sync
// - vk handles are plain Copy values
// - Allocator is protected by Mutex
unsafe impl Send for VulkanDevice {}
unsafe impl Sync for VulkanDevice {}
