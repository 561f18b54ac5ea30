//! GPU synchronization primitives.
//!
//! Owners of backend fence and semaphore handles. Both start out empty
//! (holding the null handle) and are allocated explicitly, which lets a graph
//! action detect a fence that was never allocated. An allocated primitive
//! keeps its backend alive and destroys the handle when dropped.

use std::sync::Arc;

use crate::backend::{FenceHandle, GpuBackend, SemaphoreHandle};
use crate::error::GraphicsError;

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// CPU-GPU synchronization primitive.
///
/// Fences allow the CPU to wait for GPU work to complete. Each frame owns one
/// in-flight fence that guards reuse of its command pool.
///
/// # Example
///
/// ```ignore
/// let mut fence = Fence::default();
/// fence.allocate(ctx.backend_arc(), true)?;
/// fence.wait()?;
/// fence.reset()?;
/// ```
#[derive(Default)]
pub struct Fence {
    handle: FenceHandle,
    backend: Option<Arc<dyn GpuBackend>>,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").field("handle", &self.handle).finish()
    }
}

impl Fence {
    /// Backend handle, null until allocated.
    pub fn handle(&self) -> FenceHandle {
        self.handle
    }

    /// Returns true if no backend fence is allocated.
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    /// Allocate the backend fence. Frame fences start `signaled` so the
    /// first wait returns immediately.
    pub fn allocate(
        &mut self,
        backend: Arc<dyn GpuBackend>,
        signaled: bool,
    ) -> Result<(), GraphicsError> {
        if !self.is_null() {
            return Err(GraphicsError::InvalidParameter(format!(
                "fence {:?} is already allocated",
                self.handle
            )));
        }
        self.handle = backend.create_fence(signaled)?;
        self.backend = Some(backend);
        Ok(())
    }

    /// Wait for the fence to be signaled (blocking).
    pub fn wait(&self) -> Result<(), GraphicsError> {
        let (backend, handle) = self.require()?;
        backend.wait_fence(handle)
    }

    /// Return the fence to the unsignaled state.
    pub fn reset(&self) -> Result<(), GraphicsError> {
        let (backend, handle) = self.require()?;
        backend.reset_fence(handle)
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> Result<FenceStatus, GraphicsError> {
        let (backend, handle) = self.require()?;
        Ok(if backend.is_fence_signaled(handle)? {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        })
    }

    /// Destroy the backend fence, leaving this fence empty.
    pub fn destroy(&mut self) {
        let handle = std::mem::take(&mut self.handle);
        if let Some(backend) = self.backend.take() {
            backend.destroy_fence(handle);
        }
    }

    fn require(&self) -> Result<(&dyn GpuBackend, FenceHandle), GraphicsError> {
        match &self.backend {
            Some(backend) if !self.is_null() => Ok((backend.as_ref(), self.handle)),
            _ => Err(GraphicsError::InvalidHandle(
                "fence is not allocated".to_string(),
            )),
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// GPU semaphore used to order acquire, submit and present.
///
/// Unlike fences, events cannot be waited on from the CPU.
#[derive(Default)]
pub struct Event {
    handle: SemaphoreHandle,
    backend: Option<Arc<dyn GpuBackend>>,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("handle", &self.handle).finish()
    }
}

impl Event {
    /// Backend handle, null until allocated.
    pub fn handle(&self) -> SemaphoreHandle {
        self.handle
    }

    /// Returns true if no backend semaphore is allocated.
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    /// Allocate the backend semaphore. Allocating twice is a no-op.
    pub fn allocate(&mut self, backend: Arc<dyn GpuBackend>) -> Result<(), GraphicsError> {
        if self.is_null() {
            self.handle = backend.create_semaphore()?;
            self.backend = Some(backend);
        }
        Ok(())
    }

    /// Destroy the backend semaphore, leaving this event empty.
    pub fn destroy(&mut self) {
        let handle = std::mem::take(&mut self.handle);
        if let Some(backend) = self.backend.take() {
            backend.destroy_semaphore(handle);
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::backend::dummy::ObjectKind;

    #[test]
    fn test_fence_lifecycle() {
        let backend = Arc::new(DummyBackend::new());
        let mut fence = Fence::default();
        assert!(fence.is_null());

        fence.allocate(backend.clone(), true).unwrap();
        assert_eq!(fence.status().unwrap(), FenceStatus::Signaled);
        fence.wait().unwrap();

        fence.reset().unwrap();
        assert_eq!(fence.status().unwrap(), FenceStatus::Unsignaled);

        fence.destroy();
        assert!(fence.is_null());
        assert_eq!(backend.live_count(ObjectKind::Fence), 0);
    }

    #[test]
    fn test_null_fence_operations_fail() {
        let fence = Fence::default();
        assert!(matches!(fence.wait(), Err(GraphicsError::InvalidHandle(_))));
        assert!(fence.reset().is_err());
        assert!(fence.status().is_err());
    }

    #[test]
    fn test_double_allocate_rejected() {
        let backend = Arc::new(DummyBackend::new());
        let mut fence = Fence::default();
        fence.allocate(backend.clone(), false).unwrap();
        assert!(fence.allocate(backend.clone(), false).is_err());
        assert_eq!(backend.live_count(ObjectKind::Fence), 1);
    }

    #[test]
    fn test_event_allocate_idempotent() {
        let backend = Arc::new(DummyBackend::new());
        let mut event = Event::default();
        event.allocate(backend.clone()).unwrap();
        let handle = event.handle();
        event.allocate(backend.clone()).unwrap();
        assert_eq!(event.handle(), handle);
        event.destroy();
        assert_eq!(backend.live_count(ObjectKind::Semaphore), 0);
    }

    #[test]
    fn test_dropped_primitives_release_handles() {
        let backend = Arc::new(DummyBackend::new());
        {
            let mut fence = Fence::default();
            fence.allocate(backend.clone(), true).unwrap();
            let mut event = Event::default();
            event.allocate(backend.clone()).unwrap();
            assert_eq!(backend.live_count(ObjectKind::Fence), 1);
            assert_eq!(backend.live_count(ObjectKind::Semaphore), 1);
        }
        assert_eq!(backend.live_count(ObjectKind::Fence), 0);
        assert_eq!(backend.live_count(ObjectKind::Semaphore), 0);
    }

    #[test]
    fn test_destroy_then_drop_releases_once() {
        let backend = Arc::new(DummyBackend::new());
        let mut fence = Fence::default();
        fence.allocate(backend.clone(), false).unwrap();
        fence.destroy();
        fence.allocate(backend.clone(), true).unwrap();
        drop(fence);
        assert_eq!(backend.live_count(ObjectKind::Fence), 0);
    }
}
