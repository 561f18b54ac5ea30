//! Native Vulkan backend implementation using ash.
//!
//! Objects are returned to the render system as raw Vulkan handles wrapped
//! in the backend handle newtypes. Textures are identified by their default
//! view, so swapchain image views and owned textures are interchangeable as
//! framebuffer attachments.
//!
//! Memory comes from gpu-allocator. Validation layers are enabled when the
//! configuration asks for them and the layer is installed.

mod allocator;
mod command;
mod conversion;
mod debug;
mod device;
mod instance;
mod pipeline;
mod swapchain;

use std::collections::HashMap;
use std::mem::ManuallyDrop;

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use crate::config::RendererConfig;
use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, Extent2d, SamplerDescriptor, ScissorRect, ShaderStage, ShaderStages,
    TextureDescriptor, Viewport,
};

use super::{
    AcquireResult, BufferBarrier, BufferCopyRegion, BufferHandle, CommandBufferHandle,
    CommandPoolHandle, DescriptorImageWrite, DescriptorPoolDescriptor, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutBinding, DescriptorSetLayoutHandle, FenceHandle,
    FramebufferDescriptor, FramebufferHandle, GpuBackend, GraphicsPipelineDescriptor,
    PipelineHandle, PipelineLayoutDescriptor, PipelineLayoutHandle, PresentResult,
    RenderPassBeginInfo, RenderPassDescriptor, RenderPassHandle, SamplerHandle, SemaphoreHandle,
    ShaderModuleHandle, SubmitInfo, SwapchainDescriptor, SwapchainHandle, TextureHandle,
    WindowTarget,
};

use self::conversion::{
    aspect_mask, convert_access_flags, convert_address_mode, convert_buffer_usage,
    convert_clear_value, convert_filter_mode, convert_format, convert_image_layout,
    convert_memory_location, convert_mipmap_filter_mode, convert_pipeline_stages,
    convert_shader_stages, convert_texture_usage,
};
use self::instance::InstanceBundle;
use self::swapchain::{SurfaceContext, VulkanSwapchain};

/// Owned image with its default view.
struct VulkanTexture {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Allocation,
}

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
}

/// Objects that carry more than a single Vulkan handle, keyed by the raw
/// handle handed out.
#[derive(Default)]
struct ObjectTables {
    textures: HashMap<u64, VulkanTexture>,
    buffers: HashMap<u64, VulkanBuffer>,
    swapchains: HashMap<u64, VulkanSwapchain>,
}

/// Map a failed Vulkan call to a graphics error.
fn vk_error(what: &str, error: vk::Result) -> GraphicsError {
    match error {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => GraphicsError::SurfaceOutdated,
        other => GraphicsError::Internal(format!("{} failed: {:?}", what, other)),
    }
}

/// Vulkan-based GPU backend using ash.
///
/// One graphics queue is used for rendering, transfers and presentation.
pub struct VulkanBackend {
    /// Keeps the Vulkan loader alive for the lifetime of the instance.
    _entry: ash::Entry,
    instance: InstanceBundle,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    /// Queue access must be externally synchronized.
    queue: Mutex<vk::Queue>,
    swapchain_loader: ash::khr::swapchain::Device,
    /// Dropped by hand before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    anisotropy_supported: bool,
    objects: Mutex<ObjectTables>,
    /// Window size for platforms where the surface does not report one.
    surface_hint: Mutex<Extent2d>,
}

impl VulkanBackend {
    /// Create a Vulkan backend presenting to `window`.
    pub fn new(window: &dyn WindowTarget, config: &RendererConfig) -> Result<Self, GraphicsError> {
        let display = window
            .display_handle()
            .map_err(|e| GraphicsError::InitializationFailed(format!("No display handle: {}", e)))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GraphicsError::InitializationFailed(format!("No window handle: {}", e)))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan library: {}", e))
        })?;

        let instance = instance::create_instance(&entry, display, config.validation)?;

        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance.instance, display, window_handle, None)
        } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy() };
                return Err(GraphicsError::InitializationFailed(format!(
                    "Failed to create window surface: {:?}",
                    e
                )));
            }
        };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance.instance);

        let destroy_surface = || unsafe {
            surface_loader.destroy_surface(surface, None);
            instance.destroy();
        };

        let selected =
            match device::select_physical_device(&instance.instance, &surface_loader, surface) {
                Ok(selected) => selected,
                Err(e) => {
                    destroy_surface();
                    return Err(e);
                }
            };

        let device = match device::create_logical_device(&instance.instance, selected) {
            Ok(device) => device,
            Err(e) => {
                destroy_surface();
                return Err(e);
            }
        };

        let allocator = match allocator::create_allocator(
            &instance.instance,
            selected.physical_device,
            device.clone(),
        ) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                destroy_surface();
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance.instance, &device);
        let features =
            unsafe { instance.instance.get_physical_device_features(selected.physical_device) };

        log::info!(
            "Vulkan backend ready (validation: {})",
            instance.debug_messenger.is_some()
        );

        Ok(Self {
            _entry: entry,
            instance,
            surface_loader,
            surface,
            physical_device: selected.physical_device,
            device,
            queue_family: selected.queue_family,
            queue: Mutex::new(queue),
            swapchain_loader,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            anisotropy_supported: features.sampler_anisotropy == vk::TRUE,
            objects: Mutex::new(ObjectTables::default()),
            surface_hint: Mutex::new(config.initial_extent),
        })
    }

    fn surface_context(&self) -> SurfaceContext<'_> {
        SurfaceContext {
            device: &self.device,
            physical_device: self.physical_device,
            surface: self.surface,
            surface_loader: &self.surface_loader,
            swapchain_loader: &self.swapchain_loader,
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        descriptor: &TextureDescriptor,
    ) -> Result<vk::ImageView, GraphicsError> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(convert_format(descriptor.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(descriptor.format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.create_image_view(&create_info, None) }
            .map_err(|e| vk_error("vkCreateImageView", e))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let mut objects = std::mem::take(&mut *self.objects.lock());
            if !objects.textures.is_empty() || !objects.buffers.is_empty() {
                log::warn!(
                    "Vulkan backend dropped with {} textures and {} buffers still alive",
                    objects.textures.len(),
                    objects.buffers.len()
                );
            }
            {
                let mut allocator = self.allocator.lock();
                for (_, texture) in objects.textures.drain() {
                    self.device.destroy_image_view(texture.view, None);
                    self.device.destroy_image(texture.image, None);
                    allocator::free_allocation(&mut allocator, texture.allocation);
                }
                for (_, buffer) in objects.buffers.drain() {
                    self.device.destroy_buffer(buffer.buffer, None);
                    allocator::free_allocation(&mut allocator, buffer.allocation);
                }
            }
            for (_, mut swapchain) in objects.swapchains.drain() {
                swapchain.destroy(&self.device, &self.swapchain_loader);
            }

            // The allocator owns device memory and must go before the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy();
        }
        log::info!("Vulkan backend destroyed");
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    // --- Surface / swapchain ---------------------------------------------

    fn surface_extent(&self) -> Result<Extent2d, GraphicsError> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .map_err(|e| vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?;

        // u32::MAX means the surface size follows the swapchain.
        if capabilities.current_extent.width == u32::MAX {
            return Ok(*self.surface_hint.lock());
        }
        Ok(Extent2d::new(
            capabilities.current_extent.width,
            capabilities.current_extent.height,
        ))
    }

    fn resize_surface(&self, extent: Extent2d) {
        *self.surface_hint.lock() = extent;
    }

    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
        old: Option<SwapchainHandle>,
    ) -> Result<SwapchainHandle, GraphicsError> {
        let old = old
            .filter(|handle| !handle.is_null())
            .map(|handle| vk::SwapchainKHR::from_raw(handle.raw()))
            .unwrap_or_else(vk::SwapchainKHR::null);

        let swapchain = VulkanSwapchain::create(&self.surface_context(), descriptor, old)?;
        let raw = swapchain.swapchain.as_raw();
        self.objects.lock().swapchains.insert(raw, swapchain);
        Ok(SwapchainHandle(raw))
    }

    fn swapchain_images(
        &self,
        swapchain: SwapchainHandle,
    ) -> Result<Vec<TextureHandle>, GraphicsError> {
        let objects = self.objects.lock();
        let swapchain = objects.swapchains.get(&swapchain.raw()).ok_or_else(|| {
            GraphicsError::InvalidHandle(format!("swapchain {:#x}", swapchain.raw()))
        })?;
        Ok(swapchain
            .image_views
            .iter()
            .map(|view| TextureHandle(view.as_raw()))
            .collect())
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> Result<AcquireResult, GraphicsError> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                vk::SwapchainKHR::from_raw(swapchain.raw()),
                u64::MAX,
                vk::Semaphore::from_raw(signal.raw()),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireResult::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(e) => Err(vk_error("vkAcquireNextImageKHR", e)),
        }
    }

    fn present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> Result<PresentResult, GraphicsError> {
        let wait_semaphores = [vk::Semaphore::from_raw(wait.raw())];
        let swapchains = [vk::SwapchainKHR::from_raw(swapchain.raw())];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.queue.lock();
        match unsafe { self.swapchain_loader.queue_present(*queue, &present_info) } {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(vk_error("vkQueuePresentKHR", e)),
        }
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        if swapchain.is_null() {
            return;
        }
        let removed = self.objects.lock().swapchains.remove(&swapchain.raw());
        match removed {
            Some(mut swapchain) => unsafe {
                swapchain.destroy(&self.device, &self.swapchain_loader)
            },
            None => log::warn!("destroy_swapchain: unknown swapchain {:#x}", swapchain.raw()),
        }
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        // Holding the queue lock keeps presentation off the queue meanwhile.
        let _queue = self.queue.lock();
        unsafe { self.device.device_wait_idle() }.map_err(|e| vk_error("vkDeviceWaitIdle", e))
    }

    // --- Resources -------------------------------------------------------

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, GraphicsError> {
        if descriptor.size.is_zero_sized() {
            return Err(GraphicsError::InvalidParameter(
                "texture extent must be non-zero".to_string(),
            ));
        }
        let label = descriptor.label.as_deref().unwrap_or("texture");

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_format(descriptor.format))
            .extent(vk::Extent3D {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, descriptor.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| vk_error("vkCreateImage", e))?;

        let allocation = {
            let mut allocator = self.allocator.lock();
            allocator::allocate_image_memory(&self.device, &mut allocator, image, label)
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = match self.create_image_view(image, descriptor) {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                allocator::free_allocation(&mut self.allocator.lock(), allocation);
                return Err(e);
            }
        };

        let raw = view.as_raw();
        self.objects.lock().textures.insert(
            raw,
            VulkanTexture {
                image,
                view,
                allocation,
            },
        );
        Ok(TextureHandle(raw))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        if texture.is_null() {
            return;
        }
        let Some(removed) = self.objects.lock().textures.remove(&texture.raw()) else {
            log::warn!("destroy_texture: unknown texture {:#x}", texture.raw());
            return;
        };
        unsafe {
            self.device.destroy_image_view(removed.view, None);
            self.device.destroy_image(removed.image, None);
        }
        allocator::free_allocation(&mut self.allocator.lock(), removed.allocation);
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let label = descriptor.label.as_deref().unwrap_or("buffer");

        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| vk_error("vkCreateBuffer", e))?;

        let allocation = {
            let mut allocator = self.allocator.lock();
            allocator::allocate_buffer_memory(
                &self.device,
                &mut allocator,
                buffer,
                label,
                convert_memory_location(descriptor.location),
            )
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let raw = buffer.as_raw();
        self.objects
            .lock()
            .buffers
            .insert(raw, VulkanBuffer { buffer, allocation });
        Ok(BufferHandle(raw))
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut objects = self.objects.lock();
        let target = objects
            .buffers
            .get_mut(&buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {:#x}", buffer.raw())))?;

        let mapped = target.allocation.mapped_slice_mut().ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "buffer {:#x} is not host visible",
                buffer.raw()
            ))
        })?;

        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end <= mapped.len())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "write of {} bytes at {} exceeds buffer size {}",
                    data.len(),
                    offset,
                    mapped.len()
                ))
            })?;
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        if buffer.is_null() {
            return;
        }
        let Some(removed) = self.objects.lock().buffers.remove(&buffer.raw()) else {
            log::warn!("destroy_buffer: unknown buffer {:#x}", buffer.raw());
            return;
        };
        unsafe { self.device.destroy_buffer(removed.buffer, None) };
        allocator::free_allocation(&mut self.allocator.lock(), removed.allocation);
    }

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError> {
        let anisotropy = self.anisotropy_supported && descriptor.anisotropy_clamp > 1;

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.mag_filter))
            .min_filter(convert_filter_mode(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(descriptor.mipmap_filter))
            .address_mode_u(convert_address_mode(descriptor.address_mode_u))
            .address_mode_v(convert_address_mode(descriptor.address_mode_v))
            .address_mode_w(convert_address_mode(descriptor.address_mode_w))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                descriptor.anisotropy_clamp as f32
            } else {
                1.0
            });

        let sampler = unsafe { self.device.create_sampler(&create_info, None) }
            .map_err(|e| vk_error("vkCreateSampler", e))?;
        Ok(SamplerHandle(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        if !sampler.is_null() {
            unsafe {
                self.device
                    .destroy_sampler(vk::Sampler::from_raw(sampler.raw()), None)
            };
        }
    }

    fn create_shader_module(
        &self,
        spirv: &[u32],
        stage: ShaderStage,
    ) -> Result<ShaderModuleHandle, GraphicsError> {
        if spirv.is_empty() {
            return Err(GraphicsError::ShaderCompilationFailed(format!(
                "empty SPIR-V for {:?} stage",
                stage
            )));
        }
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module = unsafe { self.device.create_shader_module(&create_info, None) }.map_err(
            |e| {
                GraphicsError::ShaderCompilationFailed(format!(
                    "Failed to create {:?} shader module: {:?}",
                    stage, e
                ))
            },
        )?;
        Ok(ShaderModuleHandle(module.as_raw()))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        if !module.is_null() {
            unsafe {
                self.device
                    .destroy_shader_module(vk::ShaderModule::from_raw(module.raw()), None)
            };
        }
    }

    // --- Pipeline objects ------------------------------------------------

    fn create_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<RenderPassHandle, GraphicsError> {
        let render_pass = pipeline::create_render_pass(&self.device, descriptor)?;
        Ok(RenderPassHandle(render_pass.as_raw()))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        if !render_pass.is_null() {
            unsafe {
                self.device
                    .destroy_render_pass(vk::RenderPass::from_raw(render_pass.raw()), None)
            };
        }
    }

    fn create_pipeline_layout(
        &self,
        descriptor: &PipelineLayoutDescriptor,
    ) -> Result<PipelineLayoutHandle, GraphicsError> {
        let layout = pipeline::create_pipeline_layout(&self.device, descriptor)?;
        Ok(PipelineLayoutHandle(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        if !layout.is_null() {
            unsafe {
                self.device
                    .destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout.raw()), None)
            };
        }
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineHandle, GraphicsError> {
        let pipeline = pipeline::create_graphics_pipeline(&self.device, descriptor)?;
        Ok(PipelineHandle(pipeline.as_raw()))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        if !pipeline.is_null() {
            unsafe {
                self.device
                    .destroy_pipeline(vk::Pipeline::from_raw(pipeline.raw()), None)
            };
        }
    }

    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferHandle, GraphicsError> {
        let attachments: Vec<vk::ImageView> = descriptor
            .attachments
            .iter()
            .map(|view| vk::ImageView::from_raw(view.raw()))
            .collect();

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(vk::RenderPass::from_raw(descriptor.render_pass.raw()))
            .attachments(&attachments)
            .width(descriptor.extent.width)
            .height(descriptor.extent.height)
            .layers(1);

        let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }
            .map_err(|e| vk_error("vkCreateFramebuffer", e))?;
        Ok(FramebufferHandle(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        if !framebuffer.is_null() {
            unsafe {
                self.device
                    .destroy_framebuffer(vk::Framebuffer::from_raw(framebuffer.raw()), None)
            };
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError> {
        let layout = pipeline::create_descriptor_set_layout(&self.device, bindings)?;
        Ok(DescriptorSetLayoutHandle(layout.as_raw()))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        if !layout.is_null() {
            unsafe {
                self.device.destroy_descriptor_set_layout(
                    vk::DescriptorSetLayout::from_raw(layout.raw()),
                    None,
                )
            };
        }
    }

    fn create_descriptor_pool(
        &self,
        descriptor: &DescriptorPoolDescriptor,
    ) -> Result<DescriptorPoolHandle, GraphicsError> {
        let pool = pipeline::create_descriptor_pool(&self.device, descriptor)?;
        Ok(DescriptorPoolHandle(pool.as_raw()))
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> Result<(), GraphicsError> {
        unsafe {
            self.device.reset_descriptor_pool(
                vk::DescriptorPool::from_raw(pool.raw()),
                vk::DescriptorPoolResetFlags::empty(),
            )
        }
        .map_err(|e| vk_error("vkResetDescriptorPool", e))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        if !pool.is_null() {
            unsafe {
                self.device
                    .destroy_descriptor_pool(vk::DescriptorPool::from_raw(pool.raw()), None)
            };
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError> {
        let set_layouts = [vk::DescriptorSetLayout::from_raw(layout.raw())];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vk::DescriptorPool::from_raw(pool.raw()))
            .set_layouts(&set_layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .map_err(|e| vk_error("vkAllocateDescriptorSets", e))?;
        sets.first()
            .map(|set| DescriptorSetHandle(set.as_raw()))
            .ok_or_else(|| GraphicsError::Internal("Driver returned no descriptor set".to_string()))
    }

    fn write_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorImageWrite],
    ) -> Result<(), GraphicsError> {
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
            .iter()
            .map(|write| {
                [vk::DescriptorImageInfo {
                    sampler: vk::Sampler::from_raw(write.sampler.raw()),
                    image_view: vk::ImageView::from_raw(write.texture.raw()),
                    image_layout: convert_image_layout(write.layout),
                }]
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(&image_infos)
            .map(|(write, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(vk::DescriptorSet::from_raw(set.raw()))
                    .dst_binding(write.binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(info)
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    // --- Commands --------------------------------------------------------

    fn create_command_pool(&self) -> Result<CommandPoolHandle, GraphicsError> {
        let pool = command::create_command_pool(&self.device, self.queue_family)?;
        Ok(CommandPoolHandle(pool.as_raw()))
    }

    fn reset_command_pool(&self, pool: CommandPoolHandle) -> Result<(), GraphicsError> {
        unsafe {
            self.device.reset_command_pool(
                vk::CommandPool::from_raw(pool.raw()),
                vk::CommandPoolResetFlags::empty(),
            )
        }
        .map_err(|e| vk_error("vkResetCommandPool", e))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        if !pool.is_null() {
            unsafe {
                self.device
                    .destroy_command_pool(vk::CommandPool::from_raw(pool.raw()), None)
            };
        }
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, GraphicsError> {
        let command_buffer =
            command::allocate_primary(&self.device, vk::CommandPool::from_raw(pool.raw()))?;
        Ok(CommandBufferHandle(command_buffer.as_raw()))
    }

    fn free_command_buffer(&self, pool: CommandPoolHandle, command_buffer: CommandBufferHandle) {
        if pool.is_null() || command_buffer.is_null() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(
                vk::CommandPool::from_raw(pool.raw()),
                &[vk::CommandBuffer::from_raw(command_buffer.raw())],
            )
        };
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        one_time: bool,
    ) -> Result<(), GraphicsError> {
        command::begin(
            &self.device,
            vk::CommandBuffer::from_raw(command_buffer.raw()),
            one_time,
        )
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), GraphicsError> {
        unsafe {
            self.device
                .end_command_buffer(vk::CommandBuffer::from_raw(command_buffer.raw()))
        }
        .map_err(|e| vk_error("vkEndCommandBuffer", e))
    }

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, info: &RenderPassBeginInfo) {
        let clear_values: Vec<vk::ClearValue> = info
            .clear_values
            .iter()
            .copied()
            .map(convert_clear_value)
            .collect();

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk::RenderPass::from_raw(info.render_pass.raw()))
            .framebuffer(vk::Framebuffer::from_raw(info.framebuffer.raw()))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: info.extent.width,
                    height: info.extent.height,
                },
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                &begin_info,
                vk::SubpassContents::INLINE,
            )
        };
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        unsafe {
            self.device
                .cmd_end_render_pass(vk::CommandBuffer::from_raw(command_buffer.raw()))
        };
    }

    fn cmd_bind_pipeline(&self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device.cmd_bind_pipeline(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::PipelineBindPoint::GRAPHICS,
                vk::Pipeline::from_raw(pipeline.raw()),
            )
        };
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe {
            self.device.cmd_set_viewport(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                0,
                &[vk_viewport],
            )
        };
    }

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, scissor: &ScissorRect) {
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe {
            self.device.cmd_set_scissor(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                0,
                &[rect],
            )
        };
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        if data.is_empty() {
            return;
        }
        unsafe {
            self.device.cmd_push_constants(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::PipelineLayout::from_raw(layout.raw()),
                convert_shader_stages(stages),
                offset,
                data,
            )
        };
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        first_binding: u32,
        buffers: &[(BufferHandle, u64)],
    ) {
        let vk_buffers: Vec<vk::Buffer> = buffers
            .iter()
            .map(|(buffer, _)| vk::Buffer::from_raw(buffer.raw()))
            .collect();
        let offsets: Vec<vk::DeviceSize> = buffers.iter().map(|(_, offset)| *offset).collect();

        unsafe {
            self.device.cmd_bind_vertex_buffers(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                first_binding,
                &vk_buffers,
                &offsets,
            )
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) {
        unsafe {
            self.device.cmd_bind_index_buffer(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::Buffer::from_raw(buffer.raw()),
                offset,
                vk::IndexType::UINT32,
            )
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::PipelineBindPoint::GRAPHICS,
                vk::PipelineLayout::from_raw(layout.raw()),
                0,
                &[vk::DescriptorSet::from_raw(set.raw())],
                &[],
            )
        };
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopyRegion],
    ) {
        let vk_regions: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|region| vk::BufferCopy {
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            })
            .collect();

        unsafe {
            self.device.cmd_copy_buffer(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                vk::Buffer::from_raw(src.raw()),
                vk::Buffer::from_raw(dst.raw()),
                &vk_regions,
            )
        };
    }

    fn cmd_buffer_barrier(&self, command_buffer: CommandBufferHandle, barrier: &BufferBarrier) {
        let buffer_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(convert_access_flags(barrier.src_access))
            .dst_access_mask(convert_access_flags(barrier.dst_access))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(vk::Buffer::from_raw(barrier.buffer.raw()))
            .offset(0)
            .size(vk::WHOLE_SIZE);

        unsafe {
            self.device.cmd_pipeline_barrier(
                vk::CommandBuffer::from_raw(command_buffer.raw()),
                convert_pipeline_stages(barrier.src_stages),
                convert_pipeline_stages(barrier.dst_stages),
                vk::DependencyFlags::empty(),
                &[],
                &[buffer_barrier],
                &[],
            )
        };
    }

    fn submit(&self, info: &SubmitInfo) -> Result<(), GraphicsError> {
        let command_buffers: Vec<vk::CommandBuffer> = info
            .command_buffers
            .iter()
            .map(|cb| vk::CommandBuffer::from_raw(cb.raw()))
            .collect();
        let wait_semaphores: Vec<vk::Semaphore> = info
            .wait_semaphores
            .iter()
            .map(|(semaphore, _)| vk::Semaphore::from_raw(semaphore.raw()))
            .collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = info
            .wait_semaphores
            .iter()
            .map(|(_, stages)| convert_pipeline_stages(*stages))
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = info
            .signal_semaphores
            .iter()
            .map(|semaphore| vk::Semaphore::from_raw(semaphore.raw()))
            .collect();
        let fence = info
            .fence
            .map(|fence| vk::Fence::from_raw(fence.raw()))
            .unwrap_or_else(vk::Fence::null);

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &[submit_info], fence) }
            .map_err(|e| vk_error("vkQueueSubmit", e))
    }

    // --- Synchronization -------------------------------------------------

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle, GraphicsError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&create_info, None) }
            .map_err(|e| vk_error("vkCreateFence", e))?;
        Ok(FenceHandle(fence.as_raw()))
    }

    fn wait_fence(&self, fence: FenceHandle) -> Result<(), GraphicsError> {
        unsafe {
            self.device
                .wait_for_fences(&[vk::Fence::from_raw(fence.raw())], true, u64::MAX)
        }
        .map_err(|e| vk_error("vkWaitForFences", e))
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<(), GraphicsError> {
        unsafe { self.device.reset_fences(&[vk::Fence::from_raw(fence.raw())]) }
            .map_err(|e| vk_error("vkResetFences", e))
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> Result<bool, GraphicsError> {
        unsafe { self.device.get_fence_status(vk::Fence::from_raw(fence.raw())) }
            .map_err(|e| vk_error("vkGetFenceStatus", e))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        if !fence.is_null() {
            unsafe {
                self.device
                    .destroy_fence(vk::Fence::from_raw(fence.raw()), None)
            };
        }
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle, GraphicsError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(|e| vk_error("vkCreateSemaphore", e))?;
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        if !semaphore.is_null() {
            unsafe {
                self.device
                    .destroy_semaphore(vk::Semaphore::from_raw(semaphore.raw()), None)
            };
        }
    }
}
