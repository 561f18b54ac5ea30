//! Device context shared by every part of the render system.

use std::path::Path;
use std::sync::Arc;

use crate::backend::{
    BufferCopyRegion, BufferHandle, GpuBackend, ShaderModuleHandle, SubmitInfo,
};
use crate::config::RendererConfig;
use crate::error::GraphicsError;
use crate::geometry::StagedGeometry;
use crate::shader::ShaderCompiler;
use crate::types::{BufferDescriptor, Extent2d, ShaderStage};

/// GPU backend, shader compiler and configuration.
pub struct RenderContext {
    backend: Arc<dyn GpuBackend>,
    shaders: ShaderCompiler,
    config: RendererConfig,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("backend", &self.backend.name())
            .field("shader_dir", &self.shaders.shader_dir())
            .finish()
    }
}

impl RenderContext {
    pub fn new(backend: Arc<dyn GpuBackend>, config: RendererConfig) -> Self {
        Self {
            backend,
            shaders: ShaderCompiler::new(config.shader_dir.clone()),
            config,
        }
    }

    /// The GPU backend.
    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    /// Shared handle to the GPU backend.
    pub fn backend_arc(&self) -> Arc<dyn GpuBackend> {
        self.backend.clone()
    }

    pub fn shaders(&self) -> &ShaderCompiler {
        &self.shaders
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Current extent of the presentation surface.
    pub fn surface_extent(&self) -> Result<Extent2d, GraphicsError> {
        self.backend.surface_extent()
    }

    /// Compile a WGSL file and create a shader module for one entry point.
    pub fn create_shader(
        &self,
        path: impl AsRef<Path>,
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<ShaderModuleHandle, GraphicsError> {
        let words = self.shaders.compile_file(path, stage, entry_point)?;
        self.backend.create_shader_module(&words, stage)
    }

    /// Upload packed geometry into a new device-local buffer and wait for
    /// the copy to finish.
    ///
    /// Blocks on a fence; use the graph builder's buffer actions to upload
    /// as part of a frame instead.
    pub fn upload_indexed_geometry(
        &self,
        geometry: &StagedGeometry,
    ) -> Result<BufferHandle, GraphicsError> {
        let backend = self.backend();
        let size = geometry.size();

        let staging =
            backend.create_buffer(&BufferDescriptor::staging(size).with_label("geometry staging"))?;
        let result = backend
            .write_buffer(staging, 0, &geometry.bytes)
            .and_then(|()| {
                backend.create_buffer(&BufferDescriptor::geometry(size).with_label("geometry"))
            })
            .and_then(|buffer| match self.copy_and_wait(staging, buffer, size) {
                Ok(()) => Ok(buffer),
                Err(e) => {
                    backend.destroy_buffer(buffer);
                    Err(e)
                }
            });
        backend.destroy_buffer(staging);
        result
    }

    fn copy_and_wait(
        &self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> Result<(), GraphicsError> {
        let backend = self.backend();
        let pool = backend.create_command_pool()?;
        let fence = match backend.create_fence(false) {
            Ok(fence) => fence,
            Err(e) => {
                backend.destroy_command_pool(pool);
                return Err(e);
            }
        };

        let result = (|| {
            let cb = backend.allocate_command_buffer(pool)?;
            backend.begin_command_buffer(cb, true)?;
            backend.cmd_copy_buffer(
                cb,
                src,
                dst,
                &[BufferCopyRegion {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            );
            backend.end_command_buffer(cb)?;
            backend.submit(&SubmitInfo {
                command_buffers: vec![cb],
                fence: Some(fence),
                ..Default::default()
            })?;
            backend.wait_fence(fence)
        })();

        backend.destroy_fence(fence);
        backend.destroy_command_pool(pool);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::backend::dummy::ObjectKind;
    use crate::geometry::stage_mesh;
    use crate::scene::MeshPrimitive;

    #[test]
    fn test_upload_indexed_geometry() {
        let dummy = Arc::new(DummyBackend::new());
        let ctx = RenderContext::new(dummy.clone(), RendererConfig::default());
        let staged = stage_mesh(&[MeshPrimitive::quad(1.0)]).unwrap();

        let buffer = ctx.upload_indexed_geometry(&staged).unwrap();

        assert_eq!(dummy.buffer_contents(buffer), Some(staged.bytes.clone()));
        assert_eq!(dummy.live_count(ObjectKind::Buffer), 1);
        assert_eq!(dummy.live_count(ObjectKind::CommandPool), 0);
        assert_eq!(dummy.live_count(ObjectKind::Fence), 0);
    }

    #[test]
    fn test_create_shader() {
        let dummy = Arc::new(DummyBackend::new());
        let ctx = RenderContext::new(dummy.clone(), RendererConfig::default());
        ctx.create_shader("opaque.wgsl", ShaderStage::Vertex, "vs_main")
            .unwrap();
        assert_eq!(dummy.live_count(ObjectKind::ShaderModule), 1);
        assert!(
            ctx.create_shader("missing.wgsl", ShaderStage::Vertex, "vs_main")
                .is_err()
        );
    }
}
