//! Per-frame resource bundles.
//!
//! One [`FrameResources`] exists per swapchain image. A frame's resources are
//! only reused after its in-flight fence has been waited on, which is also
//! the point where staging buffers of its last uploads are released.

use crate::backend::{BufferHandle, GpuBackend};
use crate::command::CommandPool;
use crate::error::GraphicsError;
use crate::sync::{Event, Fence};

/// Presentable surface record of a frame: the swapchain image it renders
/// into, once acquired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceRecord {
    /// Set while the frame owns an acquired image.
    pub image_index: Option<u32>,
}

/// Synchronization and recording resources of one frame in flight.
#[derive(Debug, Default)]
pub struct FrameResources {
    /// Signaled when the GPU finished the frame's last submission.
    pub in_flight: Fence,
    /// Signaled by the frame's submission, waited on by presentation.
    pub render_finished: Event,
    /// Pool owning the frame's command buffer.
    pub command_pool: CommandPool,
    pub surface: SurfaceRecord,
    retired_staging: Vec<BufferHandle>,
}

impl FrameResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a staging buffer alive until the frame's fence is next waited on.
    pub fn retire_staging(&mut self, buffer: BufferHandle) {
        self.retired_staging.push(buffer);
    }

    /// Staging buffers still referenced by in-flight work.
    pub fn retired_staging(&self) -> &[BufferHandle] {
        &self.retired_staging
    }

    /// Destroy staging buffers of completed work.
    pub fn release_staging(&mut self, backend: &dyn GpuBackend) {
        for buffer in self.retired_staging.drain(..) {
            backend.destroy_buffer(buffer);
        }
    }

    /// Wait for the frame's last submission, then release its staging buffers.
    pub fn wait(&mut self, backend: &dyn GpuBackend) -> Result<(), GraphicsError> {
        self.in_flight.wait()?;
        self.release_staging(backend);
        Ok(())
    }

    /// Destroy everything the frame owns.
    pub fn destroy(&mut self, backend: &dyn GpuBackend) {
        self.release_staging(backend);
        self.command_pool.destroy(backend);
        self.render_finished.destroy();
        self.in_flight.destroy();
        self.surface = SurfaceRecord::default();
    }
}
