//! GPU memory allocation using gpu-allocator.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};

use crate::error::GraphicsError;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })
}

fn allocation_error(label: &str, error: gpu_allocator::AllocationError) -> GraphicsError {
    match error {
        gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
        other => GraphicsError::ResourceCreationFailed(format!(
            "Failed to allocate memory for {}: {}",
            label, other
        )),
    }
}

/// Allocate memory for `buffer` and bind it.
pub fn allocate_buffer_memory(
    device: &ash::Device,
    allocator: &mut Allocator,
    buffer: vk::Buffer,
    label: &str,
    location: MemoryLocation,
) -> Result<Allocation, GraphicsError> {
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = allocator
        .allocate(&AllocationCreateDesc {
            name: label,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| allocation_error(label, e))?;

    let bound =
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) };
    if let Err(e) = bound {
        let _ = allocator.free(allocation);
        return Err(GraphicsError::ResourceCreationFailed(format!(
            "Failed to bind buffer memory for {}: {:?}",
            label, e
        )));
    }

    Ok(allocation)
}

/// Allocate device-local memory for `image` and bind it.
pub fn allocate_image_memory(
    device: &ash::Device,
    allocator: &mut Allocator,
    image: vk::Image,
    label: &str,
) -> Result<Allocation, GraphicsError> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let allocation = allocator
        .allocate(&AllocationCreateDesc {
            name: label,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| allocation_error(label, e))?;

    let bound =
        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
    if let Err(e) = bound {
        let _ = allocator.free(allocation);
        return Err(GraphicsError::ResourceCreationFailed(format!(
            "Failed to bind image memory for {}: {:?}",
            label, e
        )));
    }

    Ok(allocation)
}

/// Return an allocation to the allocator, logging failures.
pub fn free_allocation(allocator: &mut Allocator, allocation: Allocation) {
    if let Err(e) = allocator.free(allocation) {
        log::warn!("Failed to free GPU allocation: {}", e);
    }
}
