//! Vulkan swapchain creation and teardown.

use ash::vk;

use super::conversion::{convert_format, convert_present_mode};
use crate::backend::SwapchainDescriptor;
use crate::error::GraphicsError;

/// A `VkSwapchainKHR` with the views of its images.
pub struct VulkanSwapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

/// Surface objects a swapchain is created against.
pub struct SurfaceContext<'a> {
    pub device: &'a ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: &'a ash::khr::surface::Instance,
    pub swapchain_loader: &'a ash::khr::swapchain::Device,
}

impl VulkanSwapchain {
    /// Create a swapchain matching `descriptor`, retiring `old` if given.
    ///
    /// The exact image count and format are required: a driver that can
    /// only honor a larger minimum image count is reported as unsupported.
    pub fn create(
        ctx: &SurfaceContext<'_>,
        descriptor: &SwapchainDescriptor,
        old: vk::SwapchainKHR,
    ) -> Result<Self, GraphicsError> {
        let capabilities = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
        }
        .map_err(|e| surface_query_error("capabilities", e))?;

        if capabilities.min_image_count > descriptor.image_count
            || (capabilities.max_image_count != 0
                && capabilities.max_image_count < descriptor.image_count)
        {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "surface supports {}..{} images, {} requested",
                capabilities.min_image_count,
                capabilities.max_image_count,
                descriptor.image_count
            )));
        }

        let formats = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
        }
        .map_err(|e| surface_query_error("formats", e))?;
        let wanted_format = convert_format(descriptor.format);
        let surface_format = formats
            .iter()
            .find(|f| f.format == wanted_format)
            .copied()
            .ok_or_else(|| {
                GraphicsError::FeatureNotSupported(format!(
                    "surface does not support {:?}",
                    descriptor.format
                ))
            })?;

        let present_modes = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
        }
        .map_err(|e| surface_query_error("present modes", e))?;
        let present_mode = convert_present_mode(descriptor.present_mode);
        let present_mode = if present_modes.contains(&present_mode) {
            present_mode
        } else {
            log::warn!(
                "Present mode {:?} not supported, falling back to FIFO",
                descriptor.present_mode
            );
            vk::PresentModeKHR::FIFO
        };

        let extent = vk::Extent2D {
            width: descriptor.extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: descriptor.extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(descriptor.image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let swapchain = unsafe { ctx.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| match e {
                vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    GraphicsError::OutOfMemory
                }
                other => GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create swapchain: {:?}",
                    other
                )),
            })?;

        let mut created = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
        };

        let images = match unsafe { ctx.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { created.destroy(ctx.device, ctx.swapchain_loader) };
                return Err(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to get swapchain images: {:?}",
                    e
                )));
            }
        };
        created.images = images;

        for &image in &created.images {
            match create_color_view(ctx.device, image, surface_format.format) {
                Ok(view) => created.image_views.push(view),
                Err(e) => {
                    unsafe { created.destroy(ctx.device, ctx.swapchain_loader) };
                    return Err(e);
                }
            }
        }

        log::debug!(
            "Created Vulkan swapchain: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            created.images.len(),
            present_mode
        );

        Ok(created)
    }

    /// Destroy the image views and the swapchain.
    ///
    /// # Safety
    ///
    /// The device must be done with every image of this swapchain.
    pub unsafe fn destroy(
        &mut self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for view in self.image_views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { swapchain_loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, GraphicsError> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!(
            "Failed to create swapchain image view: {:?}",
            e
        ))
    })
}

fn surface_query_error(what: &str, error: vk::Result) -> GraphicsError {
    match error {
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        other => {
            GraphicsError::Internal(format!("Failed to query surface {}: {:?}", what, other))
        }
    }
}
