//! Vulkan command pool and buffer management.

use ash::vk;

use crate::error::GraphicsError;

/// Create a command pool for the graphics queue.
///
/// Buffers are reset together with their pool, never individually.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create command pool: {:?}", e))
    })
}

/// Allocate one primary command buffer from `pool`.
pub fn allocate_primary(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, GraphicsError> {
    let allocate_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&allocate_info) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!(
            "Failed to allocate command buffer: {:?}",
            e
        ))
    })?;

    buffers.into_iter().next().ok_or_else(|| {
        GraphicsError::ResourceCreationFailed("Driver returned no command buffer".to_string())
    })
}

/// Begin recording, optionally for a single submission.
pub fn begin(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    one_time: bool,
) -> Result<(), GraphicsError> {
    let flags = if one_time {
        vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
    } else {
        vk::CommandBufferUsageFlags::empty()
    };
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);

    unsafe { device.begin_command_buffer(command_buffer, &begin_info) }.map_err(|e| {
        GraphicsError::Internal(format!("Failed to begin command buffer: {:?}", e))
    })
}
