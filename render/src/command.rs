//! Command pools and command buffers.
//!
//! A [`CommandPool`] lazily owns exactly one [`CommandBuffer`]. Resetting the
//! pool returns the buffer to the initial state without freeing it, so the
//! same buffer handle is re-recorded every frame.

use crate::backend::{
    CommandBufferHandle, CommandPoolHandle, FenceHandle, GpuBackend, SemaphoreHandle, SubmitInfo,
};
use crate::error::GraphicsError;
use crate::types::PipelineStages;

/// Parameters of a single-buffer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitCommandParams {
    /// Semaphore waited on before `wait_stage` runs.
    pub wait: Option<SemaphoreHandle>,
    /// Stage that waits on [`Self::wait`].
    pub wait_stage: PipelineStages,
    /// Semaphore signaled when the buffer completes.
    pub signal: Option<SemaphoreHandle>,
    /// Fence signaled when the buffer completes.
    pub fence: Option<FenceHandle>,
}

impl Default for SubmitCommandParams {
    fn default() -> Self {
        Self {
            wait: None,
            wait_stage: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            signal: None,
            fence: None,
        }
    }
}

/// A primary command buffer and its recording state.
#[derive(Debug)]
pub struct CommandBuffer {
    handle: CommandBufferHandle,
    recording: bool,
}

impl CommandBuffer {
    /// Backend handle.
    pub fn handle(&self) -> CommandBufferHandle {
        self.handle
    }

    /// Returns true between [`Self::begin`] and [`Self::end`].
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Start recording.
    pub fn begin(&mut self, backend: &dyn GpuBackend) -> Result<(), GraphicsError> {
        if self.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} is already recording",
                self.handle
            )));
        }
        backend.begin_command_buffer(self.handle, true)?;
        self.recording = true;
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self, backend: &dyn GpuBackend) -> Result<(), GraphicsError> {
        if !self.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} is not recording",
                self.handle
            )));
        }
        backend.end_command_buffer(self.handle)?;
        self.recording = false;
        Ok(())
    }
}

/// Command pool owning at most one command buffer.
#[derive(Debug, Default)]
pub struct CommandPool {
    handle: CommandPoolHandle,
    buffer: Option<CommandBuffer>,
}

impl CommandPool {
    /// Backend handle, null until allocated.
    pub fn handle(&self) -> CommandPoolHandle {
        self.handle
    }

    /// Returns true if no backend pool is allocated.
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    /// Allocate the backend command pool.
    pub fn allocate(&mut self, backend: &dyn GpuBackend) -> Result<(), GraphicsError> {
        if !self.is_null() {
            return Err(GraphicsError::InvalidParameter(format!(
                "command pool {:?} is already allocated",
                self.handle
            )));
        }
        self.handle = backend.create_command_pool()?;
        Ok(())
    }

    /// Reset the pool. The command buffer survives in the initial state.
    pub fn reset(&mut self, backend: &dyn GpuBackend) -> Result<(), GraphicsError> {
        backend.reset_command_pool(self.require()?)?;
        if let Some(buffer) = &mut self.buffer {
            buffer.recording = false;
        }
        Ok(())
    }

    /// Allocate the pool's command buffer. Returns the existing one if it
    /// was already allocated.
    pub fn allocate_command_buffer(
        &mut self,
        backend: &dyn GpuBackend,
    ) -> Result<CommandBufferHandle, GraphicsError> {
        let pool = self.require()?;
        if let Some(buffer) = &self.buffer {
            return Ok(buffer.handle);
        }
        let handle = backend.allocate_command_buffer(pool)?;
        self.buffer = Some(CommandBuffer {
            handle,
            recording: false,
        });
        Ok(handle)
    }

    /// The pool's command buffer, if allocated.
    pub fn command_buffer(&self) -> Option<&CommandBuffer> {
        self.buffer.as_ref()
    }

    /// Mutable access to the pool's command buffer.
    pub fn command_buffer_mut(&mut self) -> Result<&mut CommandBuffer, GraphicsError> {
        self.buffer.as_mut().ok_or_else(|| {
            GraphicsError::InvalidHandle("command buffer is not allocated".to_string())
        })
    }

    /// Free the pool's command buffer.
    pub fn release_command_buffer(&mut self, backend: &dyn GpuBackend) {
        if let Some(buffer) = self.buffer.take() {
            backend.free_command_buffer(self.handle, buffer.handle);
        }
    }

    /// Submit the pool's command buffer.
    pub fn submit(
        &self,
        backend: &dyn GpuBackend,
        params: &SubmitCommandParams,
    ) -> Result<(), GraphicsError> {
        let buffer = self.buffer.as_ref().ok_or_else(|| {
            GraphicsError::InvalidHandle("command buffer is not allocated".to_string())
        })?;
        if buffer.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} is still recording",
                buffer.handle
            )));
        }
        backend.submit(&SubmitInfo {
            command_buffers: vec![buffer.handle],
            wait_semaphores: params
                .wait
                .map(|s| vec![(s, params.wait_stage)])
                .unwrap_or_default(),
            signal_semaphores: params.signal.into_iter().collect(),
            fence: params.fence,
        })
    }

    /// Destroy the pool together with its command buffer.
    pub fn destroy(&mut self, backend: &dyn GpuBackend) {
        self.release_command_buffer(backend);
        backend.destroy_command_pool(std::mem::take(&mut self.handle));
    }

    fn require(&self) -> Result<CommandPoolHandle, GraphicsError> {
        if self.is_null() {
            Err(GraphicsError::InvalidHandle(
                "command pool is not allocated".to_string(),
            ))
        } else {
            Ok(self.handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::backend::dummy::ObjectKind;
    use crate::sync::Fence;

    #[test]
    fn test_command_buffer_allocation_is_idempotent() {
        let backend = DummyBackend::new();
        let mut pool = CommandPool::default();
        pool.allocate(&backend).unwrap();
        let first = pool.allocate_command_buffer(&backend).unwrap();
        let second = pool.allocate_command_buffer(&backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.live_count(ObjectKind::CommandBuffer), 1);
    }

    #[test]
    fn test_unallocated_pool_fails() {
        let backend = DummyBackend::new();
        let mut pool = CommandPool::default();
        assert!(pool.allocate_command_buffer(&backend).is_err());
        assert!(pool.reset(&backend).is_err());
    }

    #[test]
    fn test_record_and_submit() {
        let backend = Arc::new(DummyBackend::new());
        let mut pool = CommandPool::default();
        pool.allocate(&*backend).unwrap();
        pool.allocate_command_buffer(&*backend).unwrap();

        let mut fence = Fence::default();
        fence.allocate(backend.clone(), false).unwrap();

        pool.command_buffer_mut().unwrap().begin(&*backend).unwrap();
        let params = SubmitCommandParams {
            fence: Some(fence.handle()),
            ..Default::default()
        };
        assert!(pool.submit(&*backend, &params).is_err());

        pool.command_buffer_mut().unwrap().end(&*backend).unwrap();
        pool.submit(&*backend, &params).unwrap();
        assert!(fence.wait().is_ok());
    }

    #[test]
    fn test_reset_keeps_buffer() {
        let backend = DummyBackend::new();
        let mut pool = CommandPool::default();
        pool.allocate(&backend).unwrap();
        let handle = pool.allocate_command_buffer(&backend).unwrap();
        pool.command_buffer_mut().unwrap().begin(&backend).unwrap();

        pool.reset(&backend).unwrap();
        let buffer = pool.command_buffer().unwrap();
        assert_eq!(buffer.handle(), handle);
        assert!(!buffer.is_recording());
    }

    #[test]
    fn test_destroy_releases_everything() {
        let backend = DummyBackend::new();
        let mut pool = CommandPool::default();
        pool.allocate(&backend).unwrap();
        pool.allocate_command_buffer(&backend).unwrap();
        pool.destroy(&backend);
        assert!(pool.is_null());
        assert_eq!(backend.live_count(ObjectKind::CommandPool), 0);
        assert_eq!(backend.live_count(ObjectKind::CommandBuffer), 0);
    }
}
