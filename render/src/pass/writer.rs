//! Packing of push constant blocks.

use crate::scene::{Mat4, Vec3};

/// Writes members of a GPU struct with the padding the shaders expect.
///
/// Every member is padded to a multiple of 8 bytes; 4-byte members take a
/// full 16-byte slot.
#[derive(Debug, Clone, Default)]
pub struct GpuStructWriter {
    bytes: Vec<u8>,
}

impl GpuStructWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw member.
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        let padded = if data.len() == 4 {
            16
        } else {
            data.len().next_multiple_of(8)
        };
        self.bytes.extend_from_slice(data);
        self.bytes.resize(self.bytes.len() + padded - data.len(), 0);
        self
    }

    /// Append a column-major matrix.
    pub fn mat4(&mut self, matrix: &Mat4) -> &mut Self {
        self.bytes(bytemuck::cast_slice(matrix.as_slice()))
    }

    pub fn vec3(&mut self, vector: &Vec3) -> &mut Self {
        self.bytes(bytemuck::cast_slice(vector.as_slice()))
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.bytes(&value.to_ne_bytes())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}
