//! Geometry staging and the store of uploaded geometry buffers.
//!
//! Meshes are uploaded as one buffer per mesh: every primitive contributes
//! its `u32` indices followed by its vertex stream. [`stage_mesh`] packs the
//! bytes on the CPU and records where each primitive landed; the graph
//! builder's buffer actions (or [`RenderContext::upload_indexed_geometry`])
//! move the bytes into a device-local buffer.
//!
//! [`RenderContext::upload_indexed_geometry`]: crate::context::RenderContext::upload_indexed_geometry

use crate::backend::{BufferHandle, GpuBackend};
use crate::error::GraphicsError;
use crate::scene::MeshPrimitive;

/// Location of one primitive inside a packed geometry buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveRange {
    /// Byte offset of the indices.
    pub index_offset: u64,
    /// Byte offset of the first vertex.
    pub vertex_offset: u64,
    pub index_count: u32,
}

/// Packed geometry bytes ready to be copied into a GPU buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedGeometry {
    pub bytes: Vec<u8>,
    pub ranges: Vec<PrimitiveRange>,
}

impl StagedGeometry {
    /// Size of the packed data in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Pack the indices and vertices of every primitive into one blob.
pub fn stage_mesh(primitives: &[MeshPrimitive]) -> Result<StagedGeometry, GraphicsError> {
    let mut staged = StagedGeometry::default();
    for primitive in primitives {
        if primitive.indices.is_empty() || primitive.vertices.is_empty() {
            log::warn!("Skipping empty primitive while staging geometry");
            continue;
        }

        let index_offset = staged.size();
        staged
            .bytes
            .extend_from_slice(bytemuck::cast_slice(&primitive.indices));
        let vertex_offset = staged.size();
        staged
            .bytes
            .extend_from_slice(bytemuck::cast_slice(&primitive.vertices));

        staged.ranges.push(PrimitiveRange {
            index_offset,
            vertex_offset,
            index_count: primitive.indices.len() as u32,
        });
    }

    if staged.bytes.is_empty() {
        return Err(GraphicsError::InvalidParameter(
            "mesh has no geometry to stage".to_string(),
        ));
    }
    Ok(staged)
}

/// Handle of a geometry buffer in the [`GeometryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryHandle(u32);

impl GeometryHandle {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// Arena of device-local geometry buffers.
///
/// A handle is reserved before its upload runs and resolves once the GPU
/// buffer is allocated.
#[derive(Debug, Default)]
pub struct GeometryStore {
    buffers: Vec<Option<BufferHandle>>,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a handle with no buffer behind it yet.
    pub fn reserve(&mut self) -> GeometryHandle {
        self.buffers.push(None);
        GeometryHandle((self.buffers.len() - 1) as u32)
    }

    /// Add an already uploaded buffer.
    pub fn insert(&mut self, buffer: BufferHandle) -> GeometryHandle {
        self.buffers.push(Some(buffer));
        GeometryHandle((self.buffers.len() - 1) as u32)
    }

    /// Attach `buffer` to a reserved handle, returning the buffer it replaces.
    pub fn assign(
        &mut self,
        handle: GeometryHandle,
        buffer: BufferHandle,
    ) -> Result<Option<BufferHandle>, GraphicsError> {
        let slot = self.buffers.get_mut(handle.0 as usize).ok_or_else(|| {
            GraphicsError::InvalidHandle(format!("unknown geometry handle {:?}", handle))
        })?;
        Ok(slot.replace(buffer))
    }

    /// The buffer behind `handle`, if uploaded.
    pub fn resolve(&self, handle: GeometryHandle) -> Option<BufferHandle> {
        self.buffers.get(handle.0 as usize).copied().flatten()
    }

    /// Number of handles handed out.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Destroy the buffer behind `handle`. The handle stops resolving.
    pub fn release(&mut self, backend: &dyn GpuBackend, handle: GeometryHandle) {
        if let Some(buffer) = self
            .buffers
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
        {
            backend.destroy_buffer(buffer);
        }
    }

    /// Destroy every buffer.
    pub fn destroy(&mut self, backend: &dyn GpuBackend) {
        for buffer in self.buffers.drain(..).flatten() {
            backend.destroy_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::backend::dummy::ObjectKind;
    use crate::scene::Vertex;
    use crate::types::BufferDescriptor;

    fn triangle() -> MeshPrimitive {
        MeshPrimitive::new(
            vec![
                Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
                Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
                Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn test_stage_mesh_layout() {
        let staged = stage_mesh(&[triangle(), MeshPrimitive::quad(1.0)]).unwrap();
        assert_eq!(staged.ranges.len(), 2);

        let first = staged.ranges[0];
        assert_eq!(first.index_offset, 0);
        assert_eq!(first.vertex_offset, 12);
        assert_eq!(first.index_count, 3);

        let second = staged.ranges[1];
        assert_eq!(second.index_offset, 12 + 3 * 24);
        assert_eq!(second.vertex_offset, second.index_offset + 6 * 4);
        assert_eq!(second.index_count, 6);
        assert_eq!(staged.size(), second.vertex_offset + 4 * 24);

        let indices: Vec<u32> = staged.bytes[..12]
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_stage_empty_mesh_fails() {
        assert!(stage_mesh(&[]).is_err());
        assert!(stage_mesh(&[MeshPrimitive::default()]).is_err());
    }

    #[test]
    fn test_store_resolves_after_assign() {
        let backend = DummyBackend::new();
        let mut store = GeometryStore::new();
        let handle = store.reserve();
        assert_eq!(store.resolve(handle), None);

        let buffer = backend.create_buffer(&BufferDescriptor::geometry(64)).unwrap();
        assert_eq!(store.assign(handle, buffer).unwrap(), None);
        assert_eq!(store.resolve(handle), Some(buffer));
        assert!(store.assign(GeometryHandle::new(9), buffer).is_err());

        store.release(&backend, handle);
        assert_eq!(store.resolve(handle), None);
        assert_eq!(backend.live_count(ObjectKind::Buffer), 0);
    }
}
